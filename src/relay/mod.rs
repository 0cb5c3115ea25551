//! Bidirectional stream relay
//!
//! Copies bytes between an accepted local stream and an established remote
//! stream until either direction ends. The first termination event wins,
//! both legs are shut down once, and a single summary line is logged.

mod reader;
mod session;

pub use reader::{cancelled_error, is_cancelled, Cancelled, ContextReader};
pub use session::{Direction, RelaySession, RelayState, Termination, TerminationCause};

use crate::helper::silent_shutdown;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Size of the per-direction copy buffer
pub const DEFAULT_BUFFER_SIZE: usize = 65535;

/// Outcome of one relayed session
#[derive(Debug)]
pub struct RelayReport {
    /// Bytes written from local to remote
    pub bytes_up: u64,
    /// Bytes written from remote to local
    pub bytes_down: u64,
    /// Session duration
    pub elapsed: Duration,
    /// What ended the session
    pub termination: Option<Termination>,
}

impl RelayReport {
    /// Label of the termination cause
    pub fn cause_label(&self) -> &'static str {
        self.termination
            .as_ref()
            .map(|t| t.cause.label())
            .unwrap_or("unknown")
    }
}

/// Relay engine configured with a cancellation token and an optional deadline
#[derive(Debug, Clone)]
pub struct StreamRelay {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    buffer_size: usize,
}

impl StreamRelay {
    /// Create a relay that stops when `cancel` fires
    pub fn new(cancel: CancellationToken) -> Self {
        StreamRelay {
            cancel,
            deadline: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Bound the session by an absolute deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Override the copy buffer size
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Relay until either side ends, then close both
    pub async fn relay<L, R>(&self, local: L, remote: R, peer: SocketAddr) -> RelayReport
    where
        L: AsyncRead + AsyncWrite + Unpin,
        R: AsyncRead + AsyncWrite + Unpin,
    {
        let session = RelaySession::new();

        let (local_read, mut local_write) = tokio::io::split(local);
        let (remote_read, mut remote_write) = tokio::io::split(remote);
        let up = ContextReader::new(local_read, self.cancel.clone());
        let down = ContextReader::new(remote_read, self.cancel.clone());

        session.start();

        let copy = async {
            tokio::join!(
                self.pipe(&session, Direction::Up, up, &mut remote_write),
                self.pipe(&session, Direction::Down, down, &mut local_write),
            )
        };

        match self.deadline {
            Some(deadline) => {
                if tokio::time::timeout_at(deadline, copy).await.is_err() {
                    session.finish(None, TerminationCause::DeadlineExceeded);
                }
            }
            None => {
                copy.await;
            }
        }

        tokio::join!(
            silent_shutdown(&mut remote_write),
            silent_shutdown(&mut local_write)
        );
        session.complete();

        let report = RelayReport {
            bytes_up: session.bytes(Direction::Up),
            bytes_down: session.bytes(Direction::Down),
            elapsed: session.elapsed(),
            termination: session.take_termination(),
        };

        info!(
            from = %peer,
            duration_ms = report.elapsed.as_millis() as u64,
            bytes_sent = report.bytes_up,
            bytes_received = report.bytes_down,
            cause = report.cause_label(),
            "request served"
        );

        report
    }

    /// Copy one direction until it ends or the session is finished elsewhere
    async fn pipe<R, W>(
        &self,
        session: &RelaySession,
        direction: Direction,
        mut reader: ContextReader<R>,
        writer: &mut W,
    ) where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            let n = tokio::select! {
                biased;
                _ = session.done() => return,
                _ = self.cancel.cancelled() => {
                    session.finish(Some(direction), TerminationCause::Cancelled);
                    return;
                }
                result = reader.read(&mut buf) => match result {
                    Ok(0) => {
                        session.finish(Some(direction), TerminationCause::Eof);
                        return;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        session.finish(Some(direction), TerminationCause::from_io(e));
                        return;
                    }
                },
            };

            let write = async {
                writer.write_all(&buf[..n]).await?;
                writer.flush().await
            };

            tokio::select! {
                biased;
                _ = session.done() => return,
                result = write => match result {
                    Ok(()) => session.add_bytes(direction, n),
                    Err(e) => {
                        session.finish(Some(direction), TerminationCause::from_io(e));
                        return;
                    }
                },
            }
        }
    }
}

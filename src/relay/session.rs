//! Per-connection relay state
//!
//! Byte counters, the lifecycle state and the exactly-once termination
//! guard shared by both copy directions.

use super::reader::is_cancelled;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};

/// Copy direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local to remote
    Up,
    /// Remote to local
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Why a session ended
#[derive(Debug)]
pub enum TerminationCause {
    /// A peer closed its side
    Eof,
    /// The connection was already closed or reset in an expected way
    Closed(io::ErrorKind),
    /// Process shutdown
    Cancelled,
    /// The absolute session deadline passed
    DeadlineExceeded,
    /// Any other I/O failure
    Failed(io::Error),
}

impl TerminationCause {
    /// Classify an I/O error
    pub fn from_io(err: io::Error) -> Self {
        if is_cancelled(&err) {
            return TerminationCause::Cancelled;
        }
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => TerminationCause::Closed(err.kind()),
            _ => TerminationCause::Failed(err),
        }
    }

    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            TerminationCause::Eof => "eof",
            TerminationCause::Closed(_) => "closed",
            TerminationCause::Cancelled => "cancelled",
            TerminationCause::DeadlineExceeded => "deadline",
            TerminationCause::Failed(_) => "error",
        }
    }

    /// Whether this is an ordinary end of a session
    pub fn is_expected(&self) -> bool {
        matches!(self, TerminationCause::Eof | TerminationCause::Closed(_))
    }
}

/// The event that ended a session
#[derive(Debug)]
pub struct Termination {
    /// Direction that observed the event; `None` for session-wide causes
    pub direction: Option<Direction>,
    /// What happened
    pub cause: TerminationCause,
}

/// Relay lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RelayState {
    /// Streams are being set up
    Connecting = 0,
    /// Both directions are copying
    Relaying = 1,
    /// A termination event won; legs are being closed
    Terminating = 2,
    /// Both legs closed
    Done = 3,
}

impl RelayState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RelayState::Connecting,
            1 => RelayState::Relaying,
            2 => RelayState::Terminating,
            _ => RelayState::Done,
        }
    }
}

/// Shared state of one relayed connection
#[derive(Debug)]
pub struct RelaySession {
    state: AtomicU8,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
    termination: Mutex<Option<Termination>>,
    done: CancellationToken,
    started: Instant,
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}

impl RelaySession {
    /// Create a session in the `Connecting` state
    pub fn new() -> Self {
        RelaySession {
            state: AtomicU8::new(RelayState::Connecting as u8),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
            termination: Mutex::new(None),
            done: CancellationToken::new(),
            started: Instant::now(),
        }
    }

    /// Current state
    pub fn state(&self) -> RelayState {
        RelayState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from `Connecting` to `Relaying`
    pub fn start(&self) {
        let _ = self.state.compare_exchange(
            RelayState::Connecting as u8,
            RelayState::Relaying as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Record bytes written in a direction
    pub fn add_bytes(&self, direction: Direction, n: usize) {
        let counter = match direction {
            Direction::Up => &self.bytes_up,
            Direction::Down => &self.bytes_down,
        };
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Bytes written in a direction so far
    pub fn bytes(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Up => self.bytes_up.load(Ordering::Relaxed),
            Direction::Down => self.bytes_down.load(Ordering::Relaxed),
        }
    }

    /// Time since the session was created
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// End the session; only the first caller wins
    ///
    /// Returns true for the winner, which logs the cause and fires the done
    /// signal. Every later call is a no-op returning false.
    pub fn finish(&self, direction: Option<Direction>, cause: TerminationCause) -> bool {
        let won = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state < RelayState::Terminating as u8).then_some(RelayState::Terminating as u8)
            })
            .is_ok();

        if !won {
            return false;
        }

        log_termination(direction, &cause);

        if let Ok(mut slot) = self.termination.lock() {
            *slot = Some(Termination { direction, cause });
        }
        self.done.cancel();
        true
    }

    /// Resolves once the session has been finished
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.done.cancelled()
    }

    /// Whether the session has been finished
    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Mark both legs as closed
    pub fn complete(&self) {
        self.state.store(RelayState::Done as u8, Ordering::Release);
    }

    /// Take the recorded termination
    pub fn take_termination(&self) -> Option<Termination> {
        self.termination.lock().ok().and_then(|mut slot| slot.take())
    }
}

fn log_termination(direction: Option<Direction>, cause: &TerminationCause) {
    let direction = direction.map(|d| d.to_string()).unwrap_or_else(|| "both".to_string());
    match cause {
        TerminationCause::Eof => debug!(direction = %direction, "Peer closed connection"),
        TerminationCause::Closed(kind) => {
            debug!(direction = %direction, kind = ?kind, "Connection already closed")
        }
        TerminationCause::Cancelled => {
            info!(direction = %direction, "Session cancelled by shutdown")
        }
        TerminationCause::DeadlineExceeded => info!("Session deadline exceeded"),
        TerminationCause::Failed(e) => warn!(direction = %direction, error = %e, "Relay failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::reader::cancelled_error;
    use std::sync::Arc;

    #[test]
    fn test_from_io_classification() {
        assert!(matches!(
            TerminationCause::from_io(cancelled_error()),
            TerminationCause::Cancelled
        ));
        assert!(matches!(
            TerminationCause::from_io(io::Error::from(io::ErrorKind::BrokenPipe)),
            TerminationCause::Closed(io::ErrorKind::BrokenPipe)
        ));
        assert!(matches!(
            TerminationCause::from_io(io::Error::from(io::ErrorKind::ConnectionReset)),
            TerminationCause::Failed(_)
        ));
        assert!(TerminationCause::Eof.is_expected());
        assert!(!TerminationCause::Cancelled.is_expected());
    }

    #[test]
    fn test_state_transitions() {
        let session = RelaySession::new();
        assert_eq!(session.state(), RelayState::Connecting);

        session.start();
        assert_eq!(session.state(), RelayState::Relaying);
        assert!(!session.is_done());

        assert!(session.finish(Some(Direction::Up), TerminationCause::Eof));
        assert_eq!(session.state(), RelayState::Terminating);
        assert!(session.is_done());

        // start after termination must not revive the session
        session.start();
        assert_eq!(session.state(), RelayState::Terminating);

        session.complete();
        assert_eq!(session.state(), RelayState::Done);
    }

    #[test]
    fn test_finish_first_wins() {
        let session = RelaySession::new();
        session.start();

        assert!(session.finish(Some(Direction::Down), TerminationCause::Eof));
        assert!(!session.finish(
            Some(Direction::Up),
            TerminationCause::Failed(io::Error::from(io::ErrorKind::ConnectionReset))
        ));

        let termination = session.take_termination().unwrap();
        assert_eq!(termination.direction, Some(Direction::Down));
        assert!(matches!(termination.cause, TerminationCause::Eof));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_finish_has_one_winner() {
        for _ in 0..50 {
            let session = Arc::new(RelaySession::new());
            session.start();

            let mut handles = Vec::new();
            for i in 0..8 {
                let session = Arc::clone(&session);
                handles.push(tokio::spawn(async move {
                    let direction = if i % 2 == 0 { Direction::Up } else { Direction::Down };
                    session.finish(Some(direction), TerminationCause::Eof)
                }));
            }

            let mut winners = 0;
            for handle in handles {
                if handle.await.unwrap() {
                    winners += 1;
                }
            }
            assert_eq!(winners, 1);
            assert!(session.take_termination().is_some());
        }
    }

    #[tokio::test]
    async fn test_done_resolves_after_finish() {
        let session = Arc::new(RelaySession::new());
        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.done().await })
        };

        session.finish(None, TerminationCause::DeadlineExceeded);
        waiter.await.unwrap();
    }

    #[test]
    fn test_byte_counters() {
        let session = RelaySession::new();
        session.add_bytes(Direction::Up, 10);
        session.add_bytes(Direction::Up, 5);
        session.add_bytes(Direction::Down, 7);
        assert_eq!(session.bytes(Direction::Up), 15);
        assert_eq!(session.bytes(Direction::Down), 7);
    }
}

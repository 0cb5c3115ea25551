//! Local forwarder
//!
//! Accepts plain TCP connections and relays each one to a fixed upstream,
//! over TLS for the `forward` subcommand or plain TCP for `tcp`.

use crate::config::ForwarderConfig;
use crate::helper::{duration_from_secs, guard_panics};
use crate::metrics::{spawn_metrics_endpoint, ProxyMetrics};
use crate::relay::StreamRelay;
use crate::transport::{SocketOpts, TcpTransport, TlsTransport, Transport};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

/// Pause after a failed accept so a full file table does not spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Plain listener relaying every connection to one upstream
pub struct Forwarder<T: Transport> {
    transport: T,
    remote_addr: String,
    session_timeout: Duration,
    socket_opts: SocketOpts,
    role: &'static str,
    metrics: Arc<ProxyMetrics>,
    conn_counter: AtomicU64,
}

impl<T: Transport> Forwarder<T> {
    /// Create a forwarder; `role` labels its metrics
    pub fn new(
        transport: T,
        remote_addr: impl Into<String>,
        session_timeout: Duration,
        role: &'static str,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Forwarder {
            transport,
            remote_addr: remote_addr.into(),
            session_timeout,
            socket_opts: SocketOpts::default(),
            role,
            metrics,
            conn_counter: AtomicU64::new(0),
        }
    }

    /// Accept connections until `cancel` fires
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!(
            addr = ?listener.local_addr().ok(),
            remote = %self.remote_addr,
            role = self.role,
            "Forwarding connections"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown signal received, stopping forwarder");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let conn_id = self.next_conn_id();
                        let forwarder = Arc::clone(&self);
                        let cancel = cancel.clone();
                        let span = info_span!("conn", conn_id, peer = %peer);
                        let task = async move { forwarder.forward(stream, peer, cancel).await };
                        tokio::spawn(guard_panics(peer, task.instrument(span)));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
        }

        Ok(())
    }

    /// Ids start at 1
    fn next_conn_id(&self) -> u64 {
        self.conn_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn forward(&self, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) {
        let deadline = Instant::now() + self.session_timeout;
        self.socket_opts.hint(&stream);
        let tracker = self.metrics.track_connection(self.role);

        let connect = self.transport.connect(&self.remote_addr);
        let remote = match tokio::time::timeout_at(deadline, connect).await {
            Ok(Ok(remote)) => remote,
            Ok(Err(e)) => {
                warn!(from = %peer, error = %format!("{:#}", e), "Failed to connect to upstream");
                return;
            }
            Err(_) => {
                warn!(from = %peer, "Upstream connection did not complete before the deadline");
                return;
            }
        };

        let report = StreamRelay::new(cancel)
            .with_deadline(deadline)
            .relay(stream, remote, peer)
            .await;

        self.metrics.record_relay(
            self.role,
            report.bytes_up,
            report.bytes_down,
            report.elapsed,
            report.cause_label(),
        );
        tracker.finish("served");
    }
}

/// Run the forwarder until `cancel` fires
///
/// Uses TLS toward the upstream when `config.tls` is set, plain TCP otherwise.
pub async fn run_forwarder(config: ForwarderConfig, cancel: CancellationToken) -> Result<()> {
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let metrics = Arc::new(ProxyMetrics::new().context("Failed to create metrics")?);
    if let Some(ref addr) = config.metrics_addr {
        spawn_metrics_endpoint(addr, Arc::clone(&metrics), cancel.clone()).await?;
    }

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    let connect_timeout = duration_from_secs(config.connect_timeout);
    let session_timeout = duration_from_secs(config.session_timeout);

    match config.tls {
        Some(ref tls) => {
            let transport = TlsTransport::with_config(tls, SocketOpts::default())?
                .with_connect_timeout(connect_timeout);
            let forwarder =
                Forwarder::new(transport, config.remote_addr, session_timeout, "forward", metrics);
            Arc::new(forwarder).serve(listener, cancel).await
        }
        None => {
            let transport = TcpTransport::with_defaults().with_connect_timeout(connect_timeout);
            let forwarder =
                Forwarder::new(transport, config.remote_addr, session_timeout, "tcp", metrics);
            Arc::new(forwarder).serve(listener, cancel).await
        }
    }
}

//! TLS SOCKS5 server
//!
//! Terminates TLS on every accepted connection and runs the SOCKS5 engine
//! over it. Startup loads the destinations table, the htpasswd store and
//! the TLS material; any failure there is fatal.

use crate::auth::{
    load_htpasswd, CredentialCache, CredentialVerifier, Credentials, DestinationAuthorizer,
    DnsResolver, DEFAULT_CREDENTIAL_TTL, DEFAULT_SWEEP_INTERVAL,
};
use crate::config::{load_destinations, ServerConfig};
use crate::helper::{duration_from_secs, guard_panics};
use crate::metrics::{spawn_metrics_endpoint, ProxyMetrics};
use crate::relay::RelayReport;
use crate::socks::Socks5Handler;
use crate::transport::{load_server_config, SocketOpts};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

const ROLE: &str = "server";

/// Pause after a failed accept so a full file table does not spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// TLS-terminating SOCKS5 server
pub struct Server {
    acceptor: TlsAcceptor,
    handler: Socks5Handler,
    session_timeout: Duration,
    socket_opts: SocketOpts,
    metrics: Arc<ProxyMetrics>,
}

impl Server {
    /// Create a server from loaded TLS material and a configured engine
    pub fn new(
        tls: Arc<rustls::ServerConfig>,
        handler: Socks5Handler,
        session_timeout: Duration,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Server {
            acceptor: TlsAcceptor::from(tls),
            handler,
            session_timeout,
            socket_opts: SocketOpts::default(),
            metrics,
        }
    }

    /// Accept connections until `cancel` fires
    ///
    /// Each connection runs in its own task; a panic in one is logged and
    /// does not affect the others.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let server = Arc::new(self);

        info!(addr = ?listener.local_addr().ok(), "Accepting TLS SOCKS5 connections");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&server);
                        let span = info_span!("conn", peer = %peer);
                        let task = async move { server.serve_connection(stream, peer).await };
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

    async fn serve_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let deadline = Instant::now() + self.session_timeout;
        self.socket_opts.hint(&stream);
        let tracker = self.metrics.track_connection(ROLE);

        let status = match self.serve_tls(stream, peer, deadline).await {
            Ok(Some(report)) => {
                self.metrics.record_relay(
                    ROLE,
                    report.bytes_up,
                    report.bytes_down,
                    report.elapsed,
                    report.cause_label(),
                );
                "served"
            }
            Ok(None) => "denied",
            Err(e) => {
                warn!(from = %peer, error = %format!("{:#}", e), "Connection failed");
                "failed"
            }
        };

        tracker.finish(status);
    }

    async fn serve_tls(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        deadline: Instant,
    ) -> Result<Option<RelayReport>> {
        let tls_stream = tokio::time::timeout_at(deadline, self.acceptor.accept(stream))
            .await
            .with_context(|| "TLS handshake timed out")?
            .with_context(|| "TLS handshake failed")?;

        self.handler.handle(tls_stream, peer, deadline).await
    }
}

/// Load everything the server needs and run it until `cancel` fires
pub async fn run_server(config: ServerConfig, cancel: CancellationToken) -> Result<()> {
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let destinations = load_destinations(&config.destinations_path)?;
    let users = load_htpasswd(&config.htpasswd_path)?;
    let tls = load_server_config(&config.tls.cert_path, &config.tls.key_path)?;
    let metrics = Arc::new(ProxyMetrics::new().context("Failed to create metrics")?);

    let cache = if config.disable_auth_cache {
        info!("Credential cache disabled");
        None
    } else {
        let cache = Arc::new(CredentialCache::new(DEFAULT_CREDENTIAL_TTL));
        Arc::clone(&cache).spawn_sweeper(DEFAULT_SWEEP_INTERVAL, cancel.clone());
        Some(cache)
    };
    let verifier: Arc<dyn CredentialVerifier> = Arc::new(Credentials::new(users, cache));

    let authorizer = Arc::new(
        DestinationAuthorizer::new(destinations, Arc::new(DnsResolver))
            .await
            .context("Failed to resolve destinations")?,
    );
    let refresh_every = duration_from_secs(config.refresh_interval);
    Arc::clone(&authorizer).spawn_refresh(refresh_every, cancel.clone());

    if let Some(ref addr) = config.metrics_addr {
        spawn_metrics_endpoint(addr, Arc::clone(&metrics), cancel.clone()).await?;
    }

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    let handler = Socks5Handler::new(
        verifier,
        authorizer,
        config.socks.clone(),
        cancel.clone(),
        Arc::clone(&metrics),
    );
    let server = Server::new(
        tls,
        handler,
        duration_from_secs(config.session_timeout),
        metrics,
    );

    server.serve(listener, cancel).await
}

//! Prometheus metrics
//!
//! Every metric lives in a registry owned by [`ProxyMetrics`]; nothing is
//! registered globally.

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const NAMESPACE: &str = "tlssocks";

/// Proxy metrics
#[derive(Clone)]
pub struct ProxyMetrics {
    connections_total: IntCounterVec,
    connections_active: IntGaugeVec,
    auth_attempts_total: IntCounterVec,
    authorization_decisions_total: IntCounterVec,
    bytes_transferred_total: IntCounterVec,
    relay_duration_seconds: HistogramVec,
    relay_terminations_total: IntCounterVec,
    registry: Registry,
}

impl ProxyMetrics {
    /// Create the metrics and their registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let connections_total = IntCounterVec::new(
            Opts::new("connections_total", "Total number of accepted connections")
                .namespace(NAMESPACE),
            &["role", "status"],
        )?;

        let connections_active = IntGaugeVec::new(
            Opts::new("connections_active", "Number of connections being served")
                .namespace(NAMESPACE),
            &["role"],
        )?;

        let auth_attempts_total = IntCounterVec::new(
            Opts::new("auth_attempts_total", "Total number of password authentication attempts")
                .namespace(NAMESPACE),
            &["result"],
        )?;

        let authorization_decisions_total = IntCounterVec::new(
            Opts::new(
                "authorization_decisions_total",
                "Total number of destination authorization decisions",
            )
            .namespace(NAMESPACE),
            &["result"],
        )?;

        let bytes_transferred_total = IntCounterVec::new(
            Opts::new("bytes_transferred_total", "Total bytes relayed").namespace(NAMESPACE),
            &["role", "direction"],
        )?;

        let relay_duration_seconds = HistogramVec::new(
            HistogramOpts::new("relay_duration_seconds", "Relayed session duration in seconds")
                .namespace(NAMESPACE)
                .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 900.0, 3600.0]),
            &["role"],
        )?;

        let relay_terminations_total = IntCounterVec::new(
            Opts::new("relay_terminations_total", "Relayed sessions by termination cause")
                .namespace(NAMESPACE),
            &["role", "cause"],
        )?;

        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(auth_attempts_total.clone()))?;
        registry.register(Box::new(authorization_decisions_total.clone()))?;
        registry.register(Box::new(bytes_transferred_total.clone()))?;
        registry.register(Box::new(relay_duration_seconds.clone()))?;
        registry.register(Box::new(relay_terminations_total.clone()))?;

        Ok(Self {
            connections_total,
            connections_active,
            auth_attempts_total,
            authorization_decisions_total,
            bytes_transferred_total,
            relay_duration_seconds,
            relay_terminations_total,
            registry,
        })
    }

    /// Record a connection opening
    ///
    /// The returned tracker records the close when dropped, with status
    /// `failed` unless [`ConnectionTracker::finish`] set another one.
    pub fn track_connection<'a>(&'a self, role: &'a str) -> ConnectionTracker<'a> {
        self.connections_active.with_label_values(&[role]).inc();
        ConnectionTracker {
            metrics: self,
            role,
            status: "failed",
        }
    }

    fn connection_closed(&self, role: &str, status: &str) {
        self.connections_active.with_label_values(&[role]).dec();
        self.connections_total
            .with_label_values(&[role, status])
            .inc();
    }

    /// Record a password check
    pub fn record_auth(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.auth_attempts_total.with_label_values(&[result]).inc();
    }

    /// Record a destination decision
    pub fn record_authorization(&self, allowed: bool) {
        let result = if allowed { "allowed" } else { "denied" };
        self.authorization_decisions_total
            .with_label_values(&[result])
            .inc();
    }

    /// Record a finished relay
    pub fn record_relay(
        &self,
        role: &str,
        bytes_up: u64,
        bytes_down: u64,
        elapsed: Duration,
        cause: &str,
    ) {
        self.bytes_transferred_total
            .with_label_values(&[role, "up"])
            .inc_by(bytes_up);
        self.bytes_transferred_total
            .with_label_values(&[role, "down"])
            .inc_by(bytes_down);
        self.relay_duration_seconds
            .with_label_values(&[role])
            .observe(elapsed.as_secs_f64());
        self.relay_terminations_total
            .with_label_values(&[role, cause])
            .inc();
    }

    /// Export metrics in the Prometheus text format
    pub fn export(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// One open connection in the `connections_active` gauge
pub struct ConnectionTracker<'a> {
    metrics: &'a ProxyMetrics,
    role: &'a str,
    status: &'static str,
}

impl ConnectionTracker<'_> {
    /// Close the connection with its outcome
    pub fn finish(mut self, status: &'static str) {
        self.status = status;
    }
}

impl Drop for ConnectionTracker<'_> {
    fn drop(&mut self) {
        self.metrics.connection_closed(self.role, self.status);
    }
}

async fn metrics_handler(State(metrics): State<Arc<ProxyMetrics>>) -> impl IntoResponse {
    match metrics.export() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            format!("Error exporting metrics: {}", e),
        ),
    }
}

/// Serve `/metrics` on the listener until `cancel` fires
pub async fn serve_metrics(
    listener: TcpListener,
    metrics: Arc<ProxyMetrics>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    info!(addr = ?listener.local_addr().ok(), "Serving metrics");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("Metrics endpoint stopped");
    Ok(())
}

/// Bind `addr` and serve `/metrics` in the background
///
/// Binding happens before returning so a bad address fails startup.
pub async fn spawn_metrics_endpoint(
    addr: &str,
    metrics: Arc<ProxyMetrics>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics endpoint on {}", addr))?;

    tokio::spawn(async move {
        if let Err(e) = serve_metrics(listener, metrics, cancel).await {
            error!(error = %e, "Metrics endpoint failed");
        }
    });

    Ok(())
}

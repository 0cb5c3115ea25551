//! Forwarder configuration types
//!
//! Defines the configuration of the local plain-socket forwarder.

use crate::helper::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_SESSION_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_session_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT_SECS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// TLS client settings for the upstream connection
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TlsClientConfig {
    /// Server name for SNI and verification; defaults to the host of the remote address
    #[serde(default)]
    pub server_name: Option<String>,

    /// Extra PEM root certificate to trust
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Skip certificate verification
    #[serde(default)]
    pub skip_verify: bool,
}

/// Forwarder configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ForwarderConfig {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Upstream address (e.g., "socks.example.com:8000")
    pub remote_addr: String,

    /// TLS settings; plain TCP when absent
    #[serde(default)]
    pub tls: Option<TlsClientConfig>,

    /// Upstream dial timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Absolute session lifetime in seconds, counted from accept
    #[serde(default = "default_session_timeout")]
    pub session_timeout: u64,

    /// Address for the Prometheus endpoint
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl ForwarderConfig {
    /// Create a configuration with defaults for everything but the addresses
    pub fn new(listen_addr: impl Into<String>, remote_addr: impl Into<String>) -> Self {
        ForwarderConfig {
            listen_addr: listen_addr.into(),
            remote_addr: remote_addr.into(),
            tls: None,
            connect_timeout: default_connect_timeout(),
            session_timeout: default_session_timeout(),
            metrics_addr: None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.remote_addr.is_empty() {
            return Err("Remote server address is required".to_string());
        }
        if self.listen_addr.is_empty() {
            return Err("Listen address is required".to_string());
        }
        if self.connect_timeout == 0 || self.session_timeout == 0 {
            return Err("Timeouts must be greater than zero".to_string());
        }
        Ok(())
    }
}

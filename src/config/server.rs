//! Server configuration types
//!
//! Defines the configuration of the TLS-terminating SOCKS5 server.

use crate::helper::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_SESSION_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default destination re-resolution interval in seconds
fn default_refresh_interval() -> u64 {
    60
}

fn default_session_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT_SECS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_auth_required() -> bool {
    true
}

/// TLS server material
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TlsServerConfig {
    /// PEM certificate chain
    pub cert_path: PathBuf,
    /// PEM private key
    pub key_path: PathBuf,
}

/// SOCKS5 engine configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SocksConfig {
    /// Require username/password authentication
    #[serde(default = "default_auth_required")]
    pub auth_required: bool,

    /// Timeout for dialing the requested target, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for SocksConfig {
    fn default() -> Self {
        Self {
            auth_required: default_auth_required(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// TLS SOCKS5 server configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:8000")
    pub listen_addr: String,

    /// htpasswd file with bcrypt digests
    pub htpasswd_path: PathBuf,

    /// Destinations file; YAML unless the extension is `.toml`
    pub destinations_path: PathBuf,

    /// Certificate and key
    pub tls: TlsServerConfig,

    /// Skip the credential fast-path cache
    #[serde(default)]
    pub disable_auth_cache: bool,

    /// Destination re-resolution interval in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Absolute session lifetime in seconds, counted from accept
    #[serde(default = "default_session_timeout")]
    pub session_timeout: u64,

    /// SOCKS5 engine settings
    #[serde(default)]
    pub socks: SocksConfig,

    /// Address for the Prometheus endpoint
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.is_empty() {
            return Err("Listen address is required".to_string());
        }
        if self.refresh_interval == 0 {
            return Err("Refresh interval must be greater than zero".to_string());
        }
        if self.session_timeout == 0 {
            return Err("Session timeout must be greater than zero".to_string());
        }
        if self.socks.connect_timeout == 0 {
            return Err("Connect timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> ServerConfig {
        ServerConfig {
            listen_addr: "127.0.0.1:8000".to_string(),
            htpasswd_path: PathBuf::from("users.htpasswd"),
            destinations_path: PathBuf::from("destinations.toml"),
            tls: TlsServerConfig {
                cert_path: PathBuf::from("cert.pem"),
                key_path: PathBuf::from("key.pem"),
            },
            disable_auth_cache: false,
            refresh_interval: default_refresh_interval(),
            session_timeout: default_session_timeout(),
            socks: SocksConfig::default(),
            metrics_addr: None,
        }
    }

    #[test]
    fn test_socks_config_default() {
        let config = SocksConfig::default();
        assert!(config.auth_required);
        assert_eq!(config.connect_timeout, 30);
    }

    #[test]
    fn test_server_config_validate() {
        let config = create_test_config();
        assert!(config.validate().is_ok());

        let mut config = create_test_config();
        config.listen_addr.clear();
        assert!(config.validate().is_err());

        let mut config = create_test_config();
        config.refresh_interval = 0;
        assert!(config.validate().is_err());

        let mut config = create_test_config();
        config.socks.connect_timeout = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_config_from_toml_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
listen_addr = "0.0.0.0:8000"
htpasswd_path = "/etc/tlssocks/htpasswd"
destinations_path = "/etc/tlssocks/destinations.toml"

[tls]
cert_path = "/etc/tlssocks/cert.pem"
key_path = "/etc/tlssocks/key.pem"
"#,
        )
        .unwrap();

        assert_eq!(config.refresh_interval, 60);
        assert_eq!(config.session_timeout, 3600);
        assert!(!config.disable_auth_cache);
        assert!(config.socks.auth_required);
        assert!(config.metrics_addr.is_none());
    }
}

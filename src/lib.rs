//! # Tlssocks - TLS-tunneled SOCKS5 proxy pair
//!
//! Tlssocks is made of two halves. The server terminates TLS and runs a
//! SOCKS5 engine that authenticates clients against an htpasswd store and
//! authorizes every destination against a table of named hosts, ports and
//! users. The forwarder is a plain local listener that tunnels each
//! connection to the server over TLS, so local applications can speak
//! SOCKS5 without TLS support. `fetch` is a small client that GETs a URL
//! through the pair.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tlssocks::config::ServerConfig;
//! use tlssocks::server::run_server;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config: ServerConfig = toml::from_str(&std::fs::read_to_string("server.toml")?)?;
//!     run_server(config, CancellationToken::new()).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! App -> forwarder (plain) -> TLS -> server (SOCKS5 + auth + rules) -> Target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod auth;
pub mod config;
pub mod error;
pub mod fetch;
pub mod forwarder;
pub mod helper;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod socks;
pub mod transport;

// Re-export commonly used items
pub use auth::{AuthContext, CredentialVerifier, DestinationRules};
pub use config::{ForwarderConfig, ServerConfig};
pub use error::{Socks5Error, TlsSocksError};
pub use fetch::fetch;
pub use forwarder::run_forwarder;
pub use relay::{RelayReport, StreamRelay};
pub use server::run_server;

/// Version of the Tlssocks library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");

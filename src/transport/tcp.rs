//! TCP transport implementation
//!
//! Plain TCP dialing, used by the `tcp` forwarding mode and by the SOCKS5
//! engine when it connects to the requested target.

use super::{SocketOpts, Transport};
use crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};

/// Dial `addr` within `timeout` and apply `opts`
///
/// An expired timeout is reported as [`io::ErrorKind::TimedOut`] so callers
/// can map it to a SOCKS5 reply code.
pub async fn connect_tcp<A: ToSocketAddrs>(
    addr: A,
    timeout: Duration,
    opts: &SocketOpts,
) -> io::Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;

    opts.hint(&stream);
    Ok(stream)
}

/// TCP transport for plain connections
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Socket options to apply to connections
    socket_opts: SocketOpts,
    /// Connection timeout
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a new TCP transport with default options
    pub fn with_defaults() -> Self {
        TcpTransport {
            socket_opts: SocketOpts::default(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Set socket options
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn connect(&self, addr: &str) -> Result<Self::Stream> {
        let stream = connect_tcp(addr, self.connect_timeout, &self.socket_opts)
            .await
            .with_context(|| format!("Failed to connect to {}", addr))?;

        tracing::debug!(remote = %addr, "TCP connection established");

        Ok(stream)
    }
}

//! Main SOCKS5 handler
//!
//! Drives one client connection through method negotiation, the CONNECT
//! request, destination authorization and the target dial, then hands both
//! streams to the [`StreamRelay`].

use super::auth::authenticate;
use super::command::{parse_command, send_io_error, send_reply, send_success};
use super::types::SocksCommand;
use crate::auth::{AuthContext, CredentialVerifier, DestinationRules};
use crate::config::SocksConfig;
use crate::error::{Socks5Error, Socks5ReplyCode};
use crate::metrics::ProxyMetrics;
use crate::relay::{RelayReport, StreamRelay};
use crate::transport::{connect_tcp, SocketOpts};
use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// SOCKS5 engine with injected authentication and authorization
pub struct Socks5Handler {
    verifier: Arc<dyn CredentialVerifier>,
    rules: Arc<dyn DestinationRules>,
    config: SocksConfig,
    socket_opts: SocketOpts,
    cancel: CancellationToken,
    metrics: Arc<ProxyMetrics>,
}

impl Socks5Handler {
    /// Create a handler
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        rules: Arc<dyn DestinationRules>,
        config: SocksConfig,
        cancel: CancellationToken,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Socks5Handler {
            verifier,
            rules,
            config,
            socket_opts: SocketOpts::default(),
            cancel,
            metrics,
        }
    }

    /// Set options applied to target connections
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }

    /// Serve one SOCKS5 client until its session ends
    ///
    /// Negotiation and relaying both stop at `deadline`. Returns `Ok(None)`
    /// when the destination was denied, which is not a connection failure.
    pub async fn handle<S>(
        &self,
        mut stream: S,
        peer: SocketAddr,
        deadline: Instant,
    ) -> Result<Option<RelayReport>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let target = tokio::time::timeout_at(deadline, self.negotiate(&mut stream))
            .await
            .with_context(|| "SOCKS5 negotiation timed out")??;

        let target_stream = match target {
            Some(target_stream) => target_stream,
            None => return Ok(None),
        };

        let report = StreamRelay::new(self.cancel.clone())
            .with_deadline(deadline)
            .relay(stream, target_stream, peer)
            .await;

        Ok(Some(report))
    }

    async fn negotiate<S>(&self, stream: &mut S) -> Result<Option<TcpStream>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let ctx = match authenticate(stream, &self.config, &self.verifier).await {
            Ok(ctx) => {
                if ctx.username().is_some() {
                    self.metrics.record_auth(true);
                }
                ctx
            }
            Err(e) => {
                if e.downcast_ref::<Socks5Error>() == Some(&Socks5Error::AuthFailed) {
                    self.metrics.record_auth(false);
                }
                return Err(e.context("Authentication negotiation failed"));
            }
        };

        let (command, target_addr) = match parse_command(stream).await {
            Ok(request) => request,
            Err(e) => {
                let code = match e.downcast_ref::<Socks5Error>() {
                    Some(Socks5Error::CommandNotSupported(_)) => {
                        Some(Socks5ReplyCode::CommandNotSupported)
                    }
                    Some(Socks5Error::AddressTypeNotSupported(_)) => {
                        Some(Socks5ReplyCode::AddressTypeNotSupported)
                    }
                    Some(Socks5Error::InvalidDomain(_)) => Some(Socks5ReplyCode::GeneralFailure),
                    _ => None,
                };
                if let Some(code) = code {
                    send_reply(stream, code, None).await?;
                }
                return Err(e.context("Failed to parse SOCKS5 command"));
            }
        };

        debug!(command = %command, target = %target_addr, user = ?ctx.username(), "SOCKS5 request");

        if command != SocksCommand::Connect {
            send_reply(stream, Socks5ReplyCode::CommandNotSupported, None).await?;
            bail!(Socks5Error::CommandNotSupported(command.to_byte()));
        }

        let target = match target_addr.resolve().await {
            Ok(addr) => addr,
            Err(e) => {
                send_reply(stream, Socks5ReplyCode::HostUnreachable, None).await?;
                return Err(e)
                    .with_context(|| format!("Failed to resolve address: {}", target_addr));
            }
        };

        if !self.allowed(&ctx, target) {
            send_reply(stream, Socks5ReplyCode::ConnectionNotAllowed, None).await?;
            return Ok(None);
        }

        let timeout = Duration::from_secs(self.config.connect_timeout);
        let target_stream = match connect_tcp(target, timeout, &self.socket_opts).await {
            Ok(target_stream) => target_stream,
            Err(e) => {
                warn!(target = %target, error = %e, "Failed to connect to target");
                send_io_error(stream, &e).await?;
                return Err(e).with_context(|| format!("Failed to connect to {}", target));
            }
        };

        send_success(stream, target_stream.local_addr().ok()).await?;

        info!(target = %target, user = ?ctx.username(), "SOCKS5 tunnel established");

        Ok(Some(target_stream))
    }

    fn allowed(&self, ctx: &AuthContext, target: SocketAddr) -> bool {
        let allowed = self.rules.allow(ctx, target.ip(), target.port());
        self.metrics.record_authorization(allowed);
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socks::consts::*;
    use std::net::IpAddr;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct AllowAll;

    impl CredentialVerifier for AllowAll {
        fn verify(&self, _user: &str, _password: &str) -> bool {
            true
        }
    }

    impl DestinationRules for AllowAll {
        fn allow(&self, _ctx: &AuthContext, _dest_ip: IpAddr, _dest_port: u16) -> bool {
            true
        }
    }

    struct DenyAll;

    impl DestinationRules for DenyAll {
        fn allow(&self, _ctx: &AuthContext, _dest_ip: IpAddr, _dest_port: u16) -> bool {
            false
        }
    }

    fn handler(rules: Arc<dyn DestinationRules>) -> Socks5Handler {
        Socks5Handler::new(
            Arc::new(AllowAll),
            rules,
            SocksConfig::default(),
            CancellationToken::new(),
            Arc::new(ProxyMetrics::new().unwrap()),
        )
    }

    fn greeting_and_login() -> Vec<u8> {
        let mut bytes = vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_PASSWORD];
        bytes.extend_from_slice(&[SOCKS5_AUTH_VERSION, 5]);
        bytes.extend_from_slice(b"alice");
        bytes.extend_from_slice(&[6]);
        bytes.extend_from_slice(b"secret");
        bytes
    }

    fn connect_request(cmd: u8, addr: SocketAddr) -> Vec<u8> {
        let mut bytes = vec![SOCKS5_VERSION, cmd, SOCKS5_RESERVED, SOCKS5_ADDR_TYPE_IPV4];
        match addr.ip() {
            IpAddr::V4(ip) => bytes.extend_from_slice(&ip.octets()),
            IpAddr::V6(_) => unreachable!(),
        }
        bytes.extend_from_slice(&addr.port().to_be_bytes());
        bytes
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn test_handle_relays_to_target() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = target.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let (mut client, server) = duplex(4096);
        let handler = handler(Arc::new(AllowAll));
        let task =
            tokio::spawn(async move { handler.handle(server, peer(), far_deadline()).await });

        client.write_all(&greeting_and_login()).await.unwrap();
        client
            .write_all(&connect_request(SOCKS5_CMD_TCP_CONNECT, target_addr))
            .await
            .unwrap();

        let mut negotiation = [0u8; 4 + 10];
        client.read_exact(&mut negotiation).await.unwrap();
        assert_eq!(negotiation[3], SOCKS5_AUTH_SUCCESS);
        assert_eq!(negotiation[5], 0x00);

        client.write_all(b"ping").await.unwrap();
        let mut echoed = [0u8; 4];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping");
        drop(client);

        let report = task.await.unwrap().unwrap().unwrap();
        assert_eq!(report.bytes_up, 4);
        assert_eq!(report.bytes_down, 4);
    }

    #[tokio::test]
    async fn test_handle_denied_destination() {
        let (mut client, server) = duplex(4096);
        let handler = handler(Arc::new(DenyAll));
        let task =
            tokio::spawn(async move { handler.handle(server, peer(), far_deadline()).await });

        client.write_all(&greeting_and_login()).await.unwrap();
        client
            .write_all(&connect_request(SOCKS5_CMD_TCP_CONNECT, "10.0.0.9:22".parse().unwrap()))
            .await
            .unwrap();

        let mut negotiation = [0u8; 4 + 10];
        client.read_exact(&mut negotiation).await.unwrap();
        assert_eq!(negotiation[5], u8::from(Socks5ReplyCode::ConnectionNotAllowed));

        assert!(task.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_handle_bind_not_supported() {
        let (mut client, server) = duplex(4096);
        let handler = handler(Arc::new(AllowAll));
        let task =
            tokio::spawn(async move { handler.handle(server, peer(), far_deadline()).await });

        client.write_all(&greeting_and_login()).await.unwrap();
        client
            .write_all(&connect_request(SOCKS5_CMD_TCP_BIND, "10.0.0.5:5432".parse().unwrap()))
            .await
            .unwrap();

        let mut negotiation = [0u8; 4 + 10];
        client.read_exact(&mut negotiation).await.unwrap();
        assert_eq!(negotiation[5], u8::from(Socks5ReplyCode::CommandNotSupported));

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(
            err.downcast_ref::<Socks5Error>(),
            Some(&Socks5Error::CommandNotSupported(SOCKS5_CMD_TCP_BIND))
        );
    }

    #[tokio::test]
    async fn test_handle_connection_refused() {
        let closed = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let (mut client, server) = duplex(4096);
        let handler = handler(Arc::new(AllowAll));
        let task =
            tokio::spawn(async move { handler.handle(server, peer(), far_deadline()).await });

        client.write_all(&greeting_and_login()).await.unwrap();
        client
            .write_all(&connect_request(SOCKS5_CMD_TCP_CONNECT, closed))
            .await
            .unwrap();

        let mut negotiation = [0u8; 4 + 10];
        client.read_exact(&mut negotiation).await.unwrap();
        assert_eq!(negotiation[5], u8::from(Socks5ReplyCode::ConnectionRefused));
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_negotiation_deadline() {
        let (_client, server) = duplex(4096);
        let handler = handler(Arc::new(AllowAll));

        let deadline = Instant::now() + Duration::from_secs(5);
        let err = handler.handle(server, peer(), deadline).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}

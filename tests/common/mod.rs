//! Test utilities for Tlssocks
//!
//! Listener helpers, fixture paths, a small TLS SOCKS5 server builder and
//! raw SOCKS5 byte builders used as the test client.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tlssocks::auth::{Credentials, DestinationAuthorizer, StaticResolver};
use tlssocks::config::{Destination, DestinationTable, SocksConfig};
use tlssocks::metrics::ProxyMetrics;
use tlssocks::server::Server;
use tlssocks::socks::Socks5Handler;
use tlssocks::transport::load_server_config;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Address nothing listens on
pub async fn closed_addr() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    drop(listener);
    addr
}

/// Spawn a TCP echo server
pub async fn spawn_echo_server() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// Spawn an HTTP server answering every request with `body`
pub async fn spawn_http_server(body: &'static str) -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

/// Path of a file under `tests/data`
pub fn data_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Write `content` to `dir/name`
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Destination entry
pub fn destination(ports: &[u16], users: &[&str]) -> Destination {
    Destination::new(
        ports.iter().copied(),
        users.iter().map(|user| user.to_string()),
    )
}

/// Running TLS SOCKS5 server
pub struct TestServer {
    /// Address the server listens on
    pub addr: SocketAddr,
    /// Stops the server
    pub cancel: CancellationToken,
    /// Metrics of the server
    pub metrics: Arc<ProxyMetrics>,
}

/// Start a TLS SOCKS5 server
///
/// `users` are hashed with a low bcrypt cost; every destination name
/// resolves to 127.0.0.1.
pub async fn spawn_tls_server(
    users: &[(&str, &str)],
    destinations: DestinationTable,
) -> TestServer {
    let users = users
        .iter()
        .map(|(user, password)| (user.to_string(), bcrypt::hash(password, 4).unwrap()))
        .collect();
    let verifier = Arc::new(Credentials::new(users, None));

    let resolver = StaticResolver::new(
        destinations
            .keys()
            .map(|name| (name.clone(), vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]))
            .collect::<BTreeMap<_, _>>(),
    );
    let authorizer = DestinationAuthorizer::new(destinations, Arc::new(resolver))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let metrics = Arc::new(ProxyMetrics::new().unwrap());
    let handler = Socks5Handler::new(
        verifier,
        Arc::new(authorizer),
        SocksConfig::default(),
        cancel.clone(),
        Arc::clone(&metrics),
    );
    let tls = load_server_config(&data_path("cert.pem"), &data_path("key.pem")).unwrap();
    let server = Server::new(tls, handler, Duration::from_secs(60), Arc::clone(&metrics));

    let (listener, addr) = create_test_listener().await;
    tokio::spawn(server.serve(listener, cancel.clone()));

    TestServer {
        addr,
        cancel,
        metrics,
    }
}

/// Raw SOCKS5 client messages
pub mod socks5_mock {
    use std::net::{IpAddr, SocketAddr};
    use tlssocks::socks::*;

    /// Create a no-auth method selection request
    pub fn create_auth_request_no_auth() -> Vec<u8> {
        vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE]
    }

    /// Create a password auth method selection request
    pub fn create_auth_request_password() -> Vec<u8> {
        vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_PASSWORD]
    }

    /// Create an RFC 1929 username/password request
    pub fn create_password_login(username: &str, password: &str) -> Vec<u8> {
        let mut request = vec![SOCKS5_AUTH_VERSION, username.len() as u8];
        request.extend_from_slice(username.as_bytes());
        request.push(password.len() as u8);
        request.extend_from_slice(password.as_bytes());
        request
    }

    /// Create a request for `cmd` to an IP target
    pub fn create_request(cmd: u8, target: SocketAddr) -> Vec<u8> {
        let mut request = vec![SOCKS5_VERSION, cmd, SOCKS5_RESERVED];
        match target.ip() {
            IpAddr::V4(ip) => {
                request.push(SOCKS5_ADDR_TYPE_IPV4);
                request.extend_from_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                request.push(SOCKS5_ADDR_TYPE_IPV6);
                request.extend_from_slice(&ip.octets());
            }
        }
        request.extend_from_slice(&target.port().to_be_bytes());
        request
    }

    /// Create a connect command to an IP target
    pub fn create_connect(target: SocketAddr) -> Vec<u8> {
        create_request(SOCKS5_CMD_TCP_CONNECT, target)
    }

    /// Create a connect command to domain
    pub fn create_connect_domain(domain: &str, port: u16) -> Vec<u8> {
        let mut cmd = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_DOMAIN,
            domain.len() as u8,
        ];
        cmd.extend_from_slice(domain.as_bytes());
        cmd.extend_from_slice(&port.to_be_bytes());
        cmd
    }
}

/// Outcome of a client-side SOCKS5 handshake
#[derive(Debug, PartialEq, Eq)]
pub enum Handshake {
    /// Server refused every offered method
    NoAcceptableMethod,
    /// RFC 1929 status was not success
    AuthRejected,
    /// Reply code of the CONNECT request
    Reply(u8),
}

/// Log in with a password and send `request`
pub async fn socks5_handshake<S>(
    stream: &mut S,
    username: &str,
    password: &str,
    request: &[u8],
) -> Handshake
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&socks5_mock::create_auth_request_password())
        .await
        .unwrap();
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();
    if method[1] != tlssocks::socks::SOCKS5_AUTH_METHOD_PASSWORD {
        return Handshake::NoAcceptableMethod;
    }

    stream
        .write_all(&socks5_mock::create_password_login(username, password))
        .await
        .unwrap();
    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await.unwrap();
    if status[1] != tlssocks::socks::SOCKS5_AUTH_SUCCESS {
        return Handshake::AuthRejected;
    }

    stream.write_all(request).await.unwrap();
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    Handshake::Reply(reply[1])
}

/// Write `payload` and read the same number of bytes back
pub async fn echo_roundtrip<S>(stream: &mut S, payload: &[u8]) -> Vec<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

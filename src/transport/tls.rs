//! TLS transport implementation
//!
//! Server-side certificate loading for the `server` subcommand and the
//! rustls client connector used by the `forward` subcommand.

use super::{connect_tcp, SocketOpts, Transport};
use crate::config::TlsClientConfig;
use crate::error::TlsSocksError;
use crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme,
};
use tokio_rustls::TlsConnector;
use tracing::warn;

/// TLS stream type alias
pub type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

fn tls_error(path: &Path, message: impl Into<String>) -> TlsSocksError {
    TlsSocksError::Tls {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn open_pem(path: &Path) -> Result<BufReader<File>, TlsSocksError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| tls_error(path, e.to_string()))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsSocksError> {
    let mut reader = open_pem(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(path, e.to_string()))?;
    if certs.is_empty() {
        return Err(tls_error(path, "no certificates found"));
    }
    Ok(certs)
}

/// Load the PEM certificate chain and private key for the TLS listener
pub fn load_server_config(
    cert_path: &Path,
    key_path: &Path,
) -> Result<Arc<ServerConfig>, TlsSocksError> {
    let certs = load_certs(cert_path)?;

    let mut reader = open_pem(key_path)?;
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| tls_error(key_path, e.to_string()))?
        .ok_or_else(|| tls_error(key_path, "no private key found"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| tls_error(cert_path, e.to_string()))?;

    Ok(Arc::new(config))
}

/// Server name to present for `remote`
///
/// Uses `override_name` when set, otherwise the host part of the
/// `host:port` address; bracketed IPv6 hosts are unwrapped.
pub fn server_name_for(remote: &str, override_name: Option<&str>) -> Result<ServerName<'static>> {
    let host = match override_name {
        Some(name) => name,
        None => host_of(remote),
    };

    ServerName::try_from(host.to_string()).with_context(|| format!("Invalid server name: {}", host))
}

fn host_of(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some((host, _)) = rest.split_once(']') {
            return host;
        }
    }
    match addr.rsplit_once(':') {
        Some((host, _)) => host,
        None => addr,
    }
}

/// TLS transport for encrypted connections using rustls
#[derive(Clone)]
pub struct TlsTransport {
    /// TLS connector
    connector: TlsConnector,
    /// Server name override for verification
    server_name: Option<String>,
    /// Socket options to apply to connections
    socket_opts: SocketOpts,
    /// Connection timeout
    connect_timeout: Duration,
}

impl std::fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport")
            .field("server_name", &self.server_name)
            .field("socket_opts", &self.socket_opts)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl TlsTransport {
    /// Create a new TLS transport with the given configuration
    pub fn with_config(config: &TlsClientConfig, socket_opts: SocketOpts) -> Result<Self> {
        let tls_config = if config.skip_verify {
            warn!("TLS certificate verification is disabled");
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth()
        } else {
            let mut root_store = RootCertStore::empty();

            let native_certs = rustls_native_certs::load_native_certs();
            for cert in native_certs.certs {
                root_store.add(cert).ok();
            }

            if let Some(ref ca_file) = config.ca_file {
                for cert in load_certs(ca_file)? {
                    root_store
                        .add(cert)
                        .with_context(|| format!("Failed to add certificate from {:?}", ca_file))?;
                }
            }

            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        };

        Ok(TlsTransport {
            connector: TlsConnector::from(Arc::new(tls_config)),
            server_name: config.server_name.clone(),
            socket_opts,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        })
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Certificate verifier that accepts all certificates
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[async_trait]
impl Transport for TlsTransport {
    type Stream = TlsStream;

    async fn connect(&self, addr: &str) -> Result<Self::Stream> {
        let server_name = server_name_for(addr, self.server_name.as_deref())?;

        let tcp_stream = connect_tcp(addr, self.connect_timeout, &self.socket_opts)
            .await
            .with_context(|| format!("Failed to connect to {}", addr))?;

        let tls_stream = self
            .connector
            .connect(server_name.clone(), tcp_stream)
            .await
            .with_context(|| format!("TLS handshake failed with {}", addr))?;

        tracing::debug!(remote = %addr, server_name = ?server_name, "TLS connection established");

        Ok(tls_stream)
    }
}

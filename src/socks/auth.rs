//! SOCKS5 method negotiation and username/password authentication
//!
//! Implements the method selection message and RFC 1929. Password checks
//! are handed to the injected [`CredentialVerifier`] on the blocking pool
//! because the slow hash can take tens of milliseconds.

use super::consts::*;
use crate::auth::{AuthContext, CredentialVerifier};
use crate::config::SocksConfig;
use crate::error::Socks5Error;
use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Authentication method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication required
    None,
    /// Username/password authentication
    Password,
}

impl AuthMethod {
    /// Convert to SOCKS5 method byte
    pub fn to_byte(self) -> u8 {
        match self {
            AuthMethod::None => SOCKS5_AUTH_METHOD_NONE,
            AuthMethod::Password => SOCKS5_AUTH_METHOD_PASSWORD,
        }
    }
}

/// Negotiate a method and authenticate the client
///
/// Returns the resulting [`AuthContext`]. A rejected password yields
/// [`Socks5Error::AuthFailed`] after the RFC 1929 failure status is sent.
pub async fn authenticate<S>(
    stream: &mut S,
    config: &SocksConfig,
    verifier: &Arc<dyn CredentialVerifier>,
) -> Result<AuthContext>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    let version = buf[0];
    let num_methods = buf[1];

    if version != SOCKS5_VERSION {
        return Err(Socks5Error::UnsupportedVersion(version).into());
    }

    let mut methods = vec![0u8; num_methods as usize];
    stream.read_exact(&mut methods).await?;

    let selected = select_auth_method(&methods, config);

    stream
        .write_all(&[
            SOCKS5_VERSION,
            selected
                .map(|m| m.to_byte())
                .unwrap_or(SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE),
        ])
        .await?;
    stream.flush().await?;

    match selected {
        None => Err(Socks5Error::NoAcceptableMethod.into()),
        Some(AuthMethod::None) => Ok(AuthContext::anonymous()),
        Some(AuthMethod::Password) => authenticate_password(stream, verifier).await,
    }
}

/// Pick the method to use from the client's offer
fn select_auth_method(methods: &[u8], config: &SocksConfig) -> Option<AuthMethod> {
    if methods.contains(&SOCKS5_AUTH_METHOD_PASSWORD) {
        return Some(AuthMethod::Password);
    }
    if !config.auth_required && methods.contains(&SOCKS5_AUTH_METHOD_NONE) {
        return Some(AuthMethod::None);
    }
    None
}

/// RFC 1929 exchange
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 0 to 255 |
/// +----+------+----------+------+----------+
/// ```
async fn authenticate_password<S>(
    stream: &mut S,
    verifier: &Arc<dyn CredentialVerifier>,
) -> Result<AuthContext>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;

    let version = buf[0];
    let username_len = buf[1] as usize;

    if version != SOCKS5_AUTH_VERSION {
        send_auth_result(stream, SOCKS5_AUTH_FAILURE).await?;
        bail!("Invalid auth version: {}", version);
    }

    let mut username = vec![0u8; username_len];
    stream.read_exact(&mut username).await?;

    let mut len = [0u8; 1];
    stream.read_exact(&mut len).await?;
    let mut password = vec![0u8; len[0] as usize];
    stream.read_exact(&mut password).await?;

    let (username, password) = match (String::from_utf8(username), String::from_utf8(password)) {
        (Ok(u), Ok(p)) => (u, p),
        _ => {
            send_auth_result(stream, SOCKS5_AUTH_FAILURE).await?;
            return Err(Socks5Error::AuthFailed.into());
        }
    };

    let valid = if username.is_empty() {
        false
    } else {
        let verifier = Arc::clone(verifier);
        let user = username.clone();
        tokio::task::spawn_blocking(move || verifier.verify(&user, &password))
            .await
            .unwrap_or(false)
    };

    if !valid {
        send_auth_result(stream, SOCKS5_AUTH_FAILURE).await?;
        debug!(user = %username, "Password authentication failed");
        return Err(Socks5Error::AuthFailed.into());
    }

    send_auth_result(stream, SOCKS5_AUTH_SUCCESS).await?;
    debug!(user = %username, "Password authentication succeeded");
    Ok(AuthContext::user(username))
}

async fn send_auth_result<S: AsyncWrite + Unpin>(stream: &mut S, status: u8) -> Result<()> {
    stream.write_all(&[SOCKS5_AUTH_VERSION, status]).await?;
    stream.flush().await?;
    Ok(())
}

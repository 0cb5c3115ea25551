//! Error types for Tlssocks
//!
//! This module defines the typed errors raised while loading configuration,
//! resolving destinations and speaking SOCKS5.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Tlssocks operations
#[derive(Error, Debug)]
pub enum TlsSocksError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential store error
    #[error("Credential store error: {0}")]
    Credentials(String),

    /// A destination name could not be resolved
    #[error("Failed to resolve {name}: {source}")]
    Resolution {
        /// Destination name that failed
        name: String,
        /// Underlying lookup error
        #[source]
        source: io::Error,
    },

    /// TLS material could not be loaded
    #[error("TLS error ({path}): {message}")]
    Tls {
        /// File that failed to load
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// SOCKS5 protocol error
    #[error("SOCKS5 error: {0}")]
    Socks5(#[from] Socks5Error),
}

/// SOCKS5 specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Socks5Error {
    /// Unsupported SOCKS version
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// No acceptable authentication method
    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    /// Authentication failed
    #[error("Authentication failed")]
    AuthFailed,

    /// Command not supported
    #[error("Command not supported: {0}")]
    CommandNotSupported(u8),

    /// Address type not supported
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Connection not allowed by ruleset
    #[error("Connection not allowed by ruleset")]
    ConnectionNotAllowed,

    /// Invalid domain name
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Socks5ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl From<Socks5ReplyCode> for u8 {
    fn from(code: Socks5ReplyCode) -> Self {
        code as u8
    }
}

impl From<&io::Error> for Socks5ReplyCode {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Socks5ReplyCode::ConnectionRefused,
            io::ErrorKind::TimedOut => Socks5ReplyCode::HostUnreachable,
            io::ErrorKind::AddrNotAvailable => Socks5ReplyCode::HostUnreachable,
            io::ErrorKind::PermissionDenied => Socks5ReplyCode::ConnectionNotAllowed,
            _ => Socks5ReplyCode::GeneralFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socks5_reply_code_to_u8() {
        assert_eq!(u8::from(Socks5ReplyCode::Succeeded), 0x00);
        assert_eq!(u8::from(Socks5ReplyCode::ConnectionNotAllowed), 0x02);
        assert_eq!(u8::from(Socks5ReplyCode::HostUnreachable), 0x04);
        assert_eq!(u8::from(Socks5ReplyCode::CommandNotSupported), 0x07);
    }

    #[test]
    fn test_socks5_reply_code_from_io_error() {
        let cases = [
            (io::ErrorKind::ConnectionRefused, Socks5ReplyCode::ConnectionRefused),
            (io::ErrorKind::TimedOut, Socks5ReplyCode::HostUnreachable),
            (io::ErrorKind::AddrNotAvailable, Socks5ReplyCode::HostUnreachable),
            (io::ErrorKind::PermissionDenied, Socks5ReplyCode::ConnectionNotAllowed),
            (io::ErrorKind::Other, Socks5ReplyCode::GeneralFailure),
        ];

        for (kind, expected) in cases {
            let err = io::Error::new(kind, "test");
            assert_eq!(Socks5ReplyCode::from(&err), expected);
        }
    }

    #[test]
    fn test_error_display() {
        let err = TlsSocksError::Config("missing --addr".to_string());
        assert_eq!(format!("{}", err), "Configuration error: missing --addr");

        let err = TlsSocksError::Resolution {
            name: "db.internal".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such host"),
        };
        assert_eq!(
            format!("{}", err),
            "Failed to resolve db.internal: no such host"
        );

        let err = TlsSocksError::Tls {
            path: PathBuf::from("/etc/tlssocks/cert.pem"),
            message: "no certificates found".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "TLS error (/etc/tlssocks/cert.pem): no certificates found"
        );
    }

    #[test]
    fn test_error_from_socks5() {
        let err: TlsSocksError = Socks5Error::AuthFailed.into();
        assert!(matches!(err, TlsSocksError::Socks5(Socks5Error::AuthFailed)));
        assert_eq!(format!("{}", err), "SOCKS5 error: Authentication failed");
    }
}

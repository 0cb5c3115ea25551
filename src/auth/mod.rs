//! Authentication and authorization
//!
//! The SOCKS5 engine consults two plugins: a [`CredentialVerifier`] while
//! negotiating username/password authentication, and [`DestinationRules`]
//! once per CONNECT request. The concrete implementations are
//! [`Credentials`] (htpasswd digests with a fast-path cache) and
//! [`DestinationAuthorizer`] (resolved destination names with port and user
//! policies).

mod cache;
mod credentials;
mod digest;
mod htpasswd;
mod resolver;
mod rules;

pub use cache::{CredentialCache, DEFAULT_CREDENTIAL_TTL, DEFAULT_SWEEP_INTERVAL};
pub use credentials::{Bcrypt, Credentials, SlowHash};
pub use digest::{constant_time_eq, fast_digest, FastDigest};
pub use htpasswd::{load_htpasswd, parse_htpasswd};
pub use resolver::{DnsResolver, NameResolver, ResolvedNameTable, StaticResolver};
pub use rules::DestinationAuthorizer;

use std::net::IpAddr;

/// Identity established during SOCKS5 authentication
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    username: Option<String>,
}

impl AuthContext {
    /// Context for a client that did not authenticate
    pub fn anonymous() -> Self {
        AuthContext { username: None }
    }

    /// Context for an authenticated user
    pub fn user(username: impl Into<String>) -> Self {
        AuthContext {
            username: Some(username.into()),
        }
    }

    /// The authenticated username, if any; an empty name counts as none
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|name| !name.is_empty())
    }
}

/// Checks a username/password pair
pub trait CredentialVerifier: Send + Sync {
    /// Return true if the password is valid for the user
    fn verify(&self, user: &str, password: &str) -> bool;
}

/// Decides whether a CONNECT request may proceed
pub trait DestinationRules: Send + Sync {
    /// Return true if the authenticated client may reach the destination
    fn allow(&self, ctx: &AuthContext, dest_ip: IpAddr, dest_port: u16) -> bool;
}

impl<H: SlowHash> CredentialVerifier for Credentials<H> {
    fn verify(&self, user: &str, password: &str) -> bool {
        Credentials::verify(self, user, password)
    }
}

impl DestinationRules for DestinationAuthorizer {
    fn allow(&self, ctx: &AuthContext, dest_ip: IpAddr, dest_port: u16) -> bool {
        DestinationAuthorizer::allow(self, ctx.username(), dest_ip, dest_port)
    }
}

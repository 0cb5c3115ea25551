//! Password verification against htpasswd digests
//!
//! Every decision is backed by the slow hash unless the supplied password
//! has the same fast digest as one that verified against the same stored
//! digest within the cache TTL.

use super::cache::CredentialCache;
use super::digest::{constant_time_eq, fast_digest, FastDigest};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Slow password hash used as the authoritative check
pub trait SlowHash: Send + Sync {
    /// Return true if `password` matches the stored `digest`
    fn matches(&self, password: &str, digest: &str) -> bool;
}

/// bcrypt as the slow hash
#[derive(Debug, Clone, Copy, Default)]
pub struct Bcrypt;

impl SlowHash for Bcrypt {
    fn matches(&self, password: &str, digest: &str) -> bool {
        bcrypt::verify(password, digest).unwrap_or(false)
    }
}

/// htpasswd-backed credential verifier with an optional fast-path cache
pub struct Credentials<H = Bcrypt> {
    users: HashMap<String, String>,
    cache: Option<Arc<CredentialCache<String, FastDigest>>>,
    hasher: H,
}

impl Credentials<Bcrypt> {
    /// Create a bcrypt verifier; pass `None` to disable caching
    pub fn new(
        users: HashMap<String, String>,
        cache: Option<Arc<CredentialCache<String, FastDigest>>>,
    ) -> Self {
        Self::with_hasher(users, cache, Bcrypt)
    }
}

impl<H: SlowHash> Credentials<H> {
    /// Create a verifier with a custom slow hash
    pub fn with_hasher(
        users: HashMap<String, String>,
        cache: Option<Arc<CredentialCache<String, FastDigest>>>,
        hasher: H,
    ) -> Self {
        Credentials {
            users,
            cache,
            hasher,
        }
    }

    /// Number of known users
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are configured
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Check a username/password pair
    pub fn verify(&self, user: &str, password: &str) -> bool {
        let stored = match self.users.get(user) {
            Some(digest) => digest,
            None => {
                debug!(user = %user, "Unknown user");
                return false;
            }
        };

        let cache = match &self.cache {
            Some(cache) => cache,
            None => return self.hasher.matches(password, stored),
        };

        let candidate = fast_digest(password.as_bytes());

        match cache.get(stored.as_str()) {
            Some(cached) if constant_time_eq(&cached, &candidate) => true,
            // a different password may still be valid; the slow hash decides
            Some(_) => self.hasher.matches(password, stored),
            None => {
                if !self.hasher.matches(password, stored) {
                    return false;
                }
                cache.set(stored.clone(), candidate);
                true
            }
        }
    }
}

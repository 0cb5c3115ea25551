//! Destination name resolution
//!
//! Resolves every configured destination name in one pass. Any failure
//! aborts the whole pass so callers never see a partial table.

use crate::error::TlsSocksError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::net::IpAddr;
use std::sync::Mutex;

/// Destination name -> addresses it currently resolves to
pub type ResolvedNameTable = BTreeMap<String, Vec<IpAddr>>;

/// Resolves a set of names to address sets
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve all names, failing on the first lookup error
    async fn resolve_all(&self, names: &[String]) -> Result<ResolvedNameTable, TlsSocksError>;
}

/// System resolver backed by `tokio::net::lookup_host`
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

impl DnsResolver {
    async fn lookup(name: &str) -> Result<Vec<IpAddr>, TlsSocksError> {
        let addrs = tokio::net::lookup_host((name, 0))
            .await
            .map_err(|source| TlsSocksError::Resolution {
                name: name.to_string(),
                source,
            })?;

        let mut ips: Vec<IpAddr> = addrs.map(|addr| addr.ip().to_canonical()).collect();
        ips.sort();
        ips.dedup();

        if ips.is_empty() {
            return Err(TlsSocksError::Resolution {
                name: name.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
            });
        }

        Ok(ips)
    }
}

#[async_trait]
impl NameResolver for DnsResolver {
    async fn resolve_all(&self, names: &[String]) -> Result<ResolvedNameTable, TlsSocksError> {
        let mut table = ResolvedNameTable::new();
        for name in names {
            let ips = Self::lookup(name).await?;
            tracing::debug!(name = %name, addrs = ?ips, "Resolved destination");
            table.insert(name.clone(), ips);
        }
        Ok(table)
    }
}

/// Resolver answering from a fixed, replaceable table
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: Mutex<ResolvedNameTable>,
}

impl StaticResolver {
    /// Create a resolver from name/address pairs
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<IpAddr>)>,
        S: Into<String>,
    {
        StaticResolver {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(name, ips)| (name.into(), ips))
                    .collect(),
            ),
        }
    }

    /// Replace the addresses of a name
    pub fn set(&self, name: impl Into<String>, ips: Vec<IpAddr>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(name.into(), ips);
        }
    }

    /// Make a name unresolvable
    pub fn remove(&self, name: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(name);
        }
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn resolve_all(&self, names: &[String]) -> Result<ResolvedNameTable, TlsSocksError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| TlsSocksError::Config("resolver table poisoned".to_string()))?;

        let mut table = ResolvedNameTable::new();
        for name in names {
            match entries.get(name) {
                Some(ips) if !ips.is_empty() => {
                    table.insert(name.clone(), ips.clone());
                }
                _ => {
                    return Err(TlsSocksError::Resolution {
                        name: name.clone(),
                        source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
                    })
                }
            }
        }
        Ok(table)
    }
}

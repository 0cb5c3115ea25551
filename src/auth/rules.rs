//! Destination authorization
//!
//! Maps a (user, destination IP, destination port) tuple to an allow/deny
//! decision using the destinations table and the latest resolved addresses.
//! The resolved table is published through a `watch` channel and replaced
//! wholesale on every successful refresh, so a decision always sees one
//! consistent snapshot.

use super::resolver::{NameResolver, ResolvedNameTable};
use crate::config::DestinationTable;
use crate::error::TlsSocksError;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-request destination policy engine
pub struct DestinationAuthorizer {
    destinations: Arc<DestinationTable>,
    names: Vec<String>,
    resolver: Arc<dyn NameResolver>,
    table: watch::Sender<Arc<ResolvedNameTable>>,
}

impl DestinationAuthorizer {
    /// Resolve every destination name and build the authorizer
    ///
    /// Fails if any name cannot be resolved.
    pub async fn new(
        destinations: DestinationTable,
        resolver: Arc<dyn NameResolver>,
    ) -> Result<Self, TlsSocksError> {
        let names: Vec<String> = destinations.keys().cloned().collect();
        let resolved = resolver.resolve_all(&names).await?;
        info!(destinations = names.len(), "Resolved destinations");

        let (table, _) = watch::channel(Arc::new(resolved));

        Ok(DestinationAuthorizer {
            destinations: Arc::new(destinations),
            names,
            resolver,
            table,
        })
    }

    /// Current resolved table
    pub fn resolved(&self) -> Arc<ResolvedNameTable> {
        self.table.borrow().clone()
    }

    /// Subscribe to table replacements
    pub fn subscribe(&self) -> watch::Receiver<Arc<ResolvedNameTable>> {
        self.table.subscribe()
    }

    /// Decide whether the user may reach `dest_ip:dest_port`
    ///
    /// IPv4-mapped IPv6 addresses match the IPv4 address they carry.
    pub fn allow(&self, username: Option<&str>, dest_ip: IpAddr, dest_port: u16) -> bool {
        let dest_ip = dest_ip.to_canonical();
        let username = username.filter(|name| !name.is_empty());
        let user = username.unwrap_or("");
        let resolved = self.resolved();

        for (name, ips) in resolved.iter() {
            if !ips.iter().any(|ip| ip.to_canonical() == dest_ip) {
                continue;
            }
            let destination = match self.destinations.get(name) {
                Some(destination) => destination,
                None => continue,
            };
            if !destination.allows_port(dest_port) {
                continue;
            }

            if destination.is_open_to_all_users() {
                info!(name = %name, to = %dest_ip, port = dest_port, user = %user, "allowed");
                return true;
            }

            // port matched; the user list decides
            return match username {
                None => {
                    info!(
                        name = %name,
                        to = %dest_ip,
                        port = dest_port,
                        "denied - no user found"
                    );
                    false
                }
                Some(u) if destination.users.contains(u) => {
                    info!(name = %name, to = %dest_ip, port = dest_port, user = %u, "allowed");
                    true
                }
                Some(u) => {
                    info!(name = %name, to = %dest_ip, port = dest_port, user = %u, "denied");
                    false
                }
            };
        }

        info!(
            to = %dest_ip,
            port = dest_port,
            user = %user,
            "denied - no matching destination"
        );
        false
    }

    /// Re-resolve all names and swap in the new table
    ///
    /// On failure the previous table stays in force.
    pub async fn refresh(&self) -> Result<(), TlsSocksError> {
        let resolved = self.resolver.resolve_all(&self.names).await?;
        self.table.send_replace(Arc::new(resolved));
        debug!(destinations = self.names.len(), "Refreshed resolved destinations");
        Ok(())
    }

    /// Spawn the recurring refresh task; it stops when `cancel` fires
    pub fn spawn_refresh(
        self: Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            let mut failures: u64 = 0;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.refresh().await {
                            Ok(()) => {
                                if failures > 0 {
                                    info!(
                                        after_failures = failures,
                                        "Destination resolution recovered"
                                    );
                                }
                                failures = 0;
                            }
                            Err(e) => {
                                failures += 1;
                                warn!(
                                    error = %e,
                                    consecutive_failures = failures,
                                    "Could not resolve names, keeping previous table"
                                );
                            }
                        }
                    }
                }
            }
            debug!("Destination refresh stopped");
        })
    }
}

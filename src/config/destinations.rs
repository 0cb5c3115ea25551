//! Destination policy types
//!
//! A destination names a resolvable host together with the ports and users
//! that may reach it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Destinations keyed by name, iterated in name order
pub type DestinationTable = BTreeMap<String, Destination>;

/// Access policy for one destination
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Destination {
    /// Users allowed to connect; empty means every authenticated user
    #[serde(default, alias = "Users")]
    pub users: BTreeSet<String>,

    /// Ports that may be connected to
    #[serde(default, alias = "Ports")]
    pub ports: BTreeSet<u16>,
}

impl Destination {
    /// Create a destination from port and user lists
    pub fn new<P, U, S>(ports: P, users: U) -> Self
    where
        P: IntoIterator<Item = u16>,
        U: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Destination {
            users: users.into_iter().map(Into::into).collect(),
            ports: ports.into_iter().collect(),
        }
    }

    /// Check whether the port is allowed
    pub fn allows_port(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }

    /// Check whether any authenticated user may connect
    pub fn is_open_to_all_users(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_new() {
        let dest = Destination::new([22, 443], ["alice"]);
        assert!(dest.allows_port(22));
        assert!(dest.allows_port(443));
        assert!(!dest.allows_port(80));
        assert!(!dest.is_open_to_all_users());
    }

    #[test]
    fn test_destination_default_is_closed_ports_open_users() {
        let dest = Destination::default();
        assert!(dest.is_open_to_all_users());
        assert!(!dest.allows_port(22));
    }
}

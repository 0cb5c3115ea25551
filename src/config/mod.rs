//! Configuration module for Tlssocks
//!
//! This module provides the configuration types for the server and the
//! forwarder, and loading of the destinations file (YAML or TOML).

mod destinations;
mod forwarder;
mod server;

pub use destinations::{Destination, DestinationTable};
pub use forwarder::{ForwarderConfig, TlsClientConfig};
pub use server::{ServerConfig, SocksConfig, TlsServerConfig};

use anyhow::{Context, Result};
use std::path::Path;
use tracing::warn;

/// Encoding of a destinations file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationFormat {
    /// YAML mapping, the default
    Yaml,
    /// TOML tables
    Toml,
}

impl DestinationFormat {
    /// Pick the format from the file extension; `.toml` is TOML, anything else YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => DestinationFormat::Toml,
            _ => DestinationFormat::Yaml,
        }
    }
}

/// Load the destinations table from a YAML or TOML file
pub fn load_destinations<P: AsRef<Path>>(path: P) -> Result<DestinationTable> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read destinations file: {:?}", path))?;

    parse_destinations(&content, DestinationFormat::from_path(path))
        .with_context(|| format!("Invalid destinations file: {:?}", path))
}

/// Parse the destinations table from a string in the given format
pub fn parse_destinations(content: &str, format: DestinationFormat) -> Result<DestinationTable> {
    let table = match format {
        DestinationFormat::Toml => {
            toml::from_str(content).with_context(|| "Failed to parse destinations")?
        }
        // an empty or comment-only document is an empty table
        DestinationFormat::Yaml if is_blank_yaml(content) => DestinationTable::new(),
        DestinationFormat::Yaml => serde_yaml::from_str::<Option<DestinationTable>>(content)
            .with_context(|| "Failed to parse destinations")?
            .unwrap_or_default(),
    };

    for (name, destination) in &table {
        if destination.ports.is_empty() {
            warn!(name = %name, "destination allows no ports and will never match");
        }
    }

    Ok(table)
}

fn is_blank_yaml(content: &str) -> bool {
    content
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with('#'))
}

//! Service and builder configuration.

use std::collections::HashSet;
use std::str::FromStr;

use ethereum_types::Address;
use serde::Deserialize;
use thiserror::Error;

/// Options shared by the builder and the service.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    /// Addresses whose diffs are reported; with an empty list every address
    /// is. Hex strings, `0x` prefix optional, case-insensitive.
    #[serde(default)]
    pub watched_addresses: Vec<String>,

    /// Attach the nibble path and Merkle proof to every emitted entry.
    #[serde(default)]
    pub paths_and_proofs: bool,

    /// Also emit changed non-leaf trie nodes.
    #[serde(default)]
    pub intermediate_nodes: bool,
}

/// An error encountered while interpreting a [`Config`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ConfigError {
    /// A watched address did not parse as 20 bytes of hex.
    #[error("invalid watched address {0:?}")]
    InvalidAddress(String),
}

impl Config {
    /// Parses the watched-address list into a set. Parsing normalizes case,
    /// so later membership checks are case-insensitive.
    pub fn watched_address_set(&self) -> Result<HashSet<Address>, ConfigError> {
        self.watched_addresses
            .iter()
            .map(|raw| {
                let stripped = raw.strip_prefix("0x").unwrap_or(raw);
                Address::from_str(stripped).map_err(|_| ConfigError::InvalidAddress(raw.clone()))
            })
            .collect()
    }
}

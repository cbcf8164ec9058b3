//! Configuration for the gossip membership layer.

use std::collections::HashMap;
use std::net::SocketAddr;

/// Tag key every node MUST publish so peers can route consensus RPCs to it.
pub const CONSENSUS_ADDR_TAG: &str = "consensus_addr";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("tags must include a `{CONSENSUS_ADDR_TAG}` entry")]
    MissingConsensusAddr,
}

/// Static configuration for a node's gossip participation.
#[derive(Clone, Debug)]
pub struct Config {
    pub node_name: String,
    pub bind_addr: SocketAddr,
    pub tags: HashMap<String, String>,
    pub join_addrs: Vec<SocketAddr>,
    pub gossip_interval: std::time::Duration,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tags.contains_key(CONSENSUS_ADDR_TAG) {
            return Err(ConfigError::MissingConsensusAddr);
        }
        Ok(())
    }

    pub fn consensus_addr(&self) -> &str {
        // `validate` guarantees this is present before a `Membership` is built from it.
        self.tags.get(CONSENSUS_ADDR_TAG).map(String::as_str).unwrap_or_default()
    }
}

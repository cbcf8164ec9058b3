//! Node configuration (spec §6, "Node configuration").

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Command-line / environment configuration for a single cluster node.
///
/// Every field has a corresponding `GALLERY_*` environment variable (via clap's `env`
/// feature) so nodes can be configured identically from a process supervisor without a
/// config file.
#[derive(Parser, Debug, Clone)]
#[command(name = "messages-node", about = "A replicated, per-user message store node")]
pub struct Args {
    /// Stable unique identifier for this node.
    #[arg(long, env = "GALLERY_NODE_ID")]
    pub node_id: u64,

    /// Node name advertised over gossip; defaults to the decimal `node_id`, which the
    /// membership handler relies on to recover a `NodeId` from a gossip `Join`/`Leave` event
    /// without needing a side-channel.
    #[arg(long, env = "GALLERY_NODE_NAME")]
    pub node_name: Option<String>,

    /// Directory holding this node's durable stores and message repository.
    #[arg(long, env = "GALLERY_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Gossip endpoint.
    #[arg(long, env = "GALLERY_BIND_ADDR")]
    pub bind_addr: SocketAddr,

    /// Consensus RPC endpoint, advertised to peers via the `consensus_addr` gossip tag.
    #[arg(long, env = "GALLERY_CONSENSUS_ADDR")]
    pub consensus_addr: SocketAddr,

    /// Address to bind the client-facing and inter-node gRPC server on. Defaults to
    /// `consensus_addr`.
    #[arg(long, env = "GALLERY_RPC_ADDR")]
    pub rpc_addr: Option<SocketAddr>,

    /// Seed gossip peers (`host:port`, repeatable).
    #[arg(long, env = "GALLERY_JOIN_ADDRS", value_delimiter = ',')]
    pub join_addrs: Vec<SocketAddr>,

    /// Bootstrap a fresh single-node cluster. Refused if this node already has on-disk state.
    #[arg(long, env = "GALLERY_BOOTSTRAP", default_value_t = false)]
    pub bootstrap: bool,

    #[arg(long, env = "GALLERY_HEARTBEAT_TIMEOUT_MS", default_value_t = 0)]
    pub heartbeat_timeout_ms: u64,

    #[arg(long, env = "GALLERY_ELECTION_TIMEOUT_MS", default_value_t = 0)]
    pub election_timeout_ms: u64,

    #[arg(long, env = "GALLERY_COMMIT_TIMEOUT_MS", default_value_t = 0)]
    pub commit_timeout_ms: u64,

    /// Unused by the engine directly: async-raft enforces the same stale-read guarantee through
    /// `client_read`'s quorum confirmation rather than a standalone lease timer. Kept so nodes
    /// can be configured uniformly with the other three timers named in spec §6.
    #[arg(long, env = "GALLERY_LEADER_LEASE_TIMEOUT_MS", default_value_t = 0)]
    pub leader_lease_timeout_ms: u64,

    /// Extra `key=value` gossip tags, beyond the mandatory `consensus_addr` tag.
    #[arg(long = "tag", value_parser = parse_tag)]
    pub tags: Vec<(String, String)>,
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    let (k, v) = raw
        .split_once('=')
        .ok_or_else(|| format!("tag `{raw}` is not in `key=value` form"))?;
    Ok((k.to_string(), v.to_string()))
}

impl Args {
    pub fn node_name(&self) -> String {
        self.node_name.clone().unwrap_or_else(|| self.node_id.to_string())
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr.unwrap_or(self.consensus_addr)
    }

    pub fn gossip_tags(&self) -> HashMap<String, String> {
        let mut tags: HashMap<String, String> = self.tags.iter().cloned().collect();
        tags.insert(membership::CONSENSUS_ADDR_TAG.to_string(), self.consensus_addr.to_string());
        tags
    }

    /// `0` means "let the engine default apply"; a node only overrides what it sets.
    pub fn commit_timeout(&self) -> Duration {
        if self.commit_timeout_ms == 0 {
            Duration::from_millis(500)
        } else {
            Duration::from_millis(self.commit_timeout_ms)
        }
    }
}

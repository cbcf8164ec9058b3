//! gRPC transport for the consensus engine's `RaftNetwork`.
//!
//! The engine only knows `NodeId`s; this module maps each one to a `consensus_addr`
//! learned from gossip (or configured directly, for the bootstrap node) and lazily
//! dials a `Consensus` client per target, reconnecting on failure. Request/response
//! payloads are the engine's own bincode-serialized types, carried as opaque bytes —
//! mirroring how the durable log store already serializes entries (see `storage::log_store`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use raft::raft::AppendEntriesRequest;
use raft::raft::AppendEntriesResponse;
use raft::raft::InstallSnapshotRequest;
use raft::raft::InstallSnapshotResponse;
use raft::raft::VoteRequest;
use raft::raft::VoteResponse;
use raft::NodeId;
use raft::RaftNetwork;
use tokio::sync::Mutex;
use tonic::transport::Channel;
use tonic::transport::Endpoint;

use storage::ProposeMessage;

use crate::proto::consensus_client::ConsensusClient;
use crate::proto::AppendEntriesEnvelope;
use crate::proto::InstallSnapshotEnvelope;
use crate::proto::VoteEnvelope;

/// Tracks which `consensus_addr` each known `NodeId` is reachable at.
///
/// Populated from `messages::Binder::join`/`leave` as gossip discovers peers, and
/// read by `GrpcNetwork` before every RPC.
#[derive(Default)]
pub struct AddressBook {
    addrs: std::sync::RwLock<HashMap<NodeId, String>>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: NodeId, addr: impl Into<String>) {
        self.addrs.write().unwrap().insert(id, addr.into());
    }

    pub fn remove(&self, id: NodeId) {
        self.addrs.write().unwrap().remove(&id);
    }

    pub fn get(&self, id: NodeId) -> Option<String> {
        self.addrs.read().unwrap().get(&id).cloned()
    }

    pub fn entries(&self) -> Vec<(NodeId, String)> {
        self.addrs.read().unwrap().iter().map(|(id, addr)| (*id, addr.clone())).collect()
    }
}

/// `RaftNetwork` backed by a pool of lazily-connected gRPC channels, one per peer.
pub struct GrpcNetwork {
    addresses: Arc<AddressBook>,
    clients: Mutex<HashMap<NodeId, ConsensusClient<Channel>>>,
}

impl GrpcNetwork {
    pub fn new(addresses: Arc<AddressBook>) -> Self {
        Self {
            addresses,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client_for(&self, target: NodeId) -> anyhow::Result<ConsensusClient<Channel>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&target) {
            return Ok(client.clone());
        }

        let addr = self
            .addresses
            .get(target)
            .ok_or_else(|| anyhow::anyhow!("no known consensus_addr for node {target}"))?;
        let uri = if addr.starts_with("http") { addr } else { format!("http://{addr}") };

        // connect_lazy dials on first use and reconnects automatically, so a momentarily
        // unreachable peer doesn't block the caller beyond its own RPC timeout.
        let channel = Endpoint::from_shared(uri)?
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(5))
            .connect_lazy();
        let client = ConsensusClient::new(channel);
        clients.insert(target, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl RaftNetwork<ProposeMessage> for GrpcNetwork {
    async fn send_append_entries(
        &self,
        target: NodeId,
        rpc: AppendEntriesRequest<ProposeMessage>,
    ) -> anyhow::Result<AppendEntriesResponse> {
        let term = rpc.term;
        let leader_id = rpc.leader_id;
        let payload = bincode::serialize(&rpc)?;

        let mut client = self.client_for(target).await?;
        let reply = client
            .append_entries(AppendEntriesEnvelope { term, leader_id, payload })
            .await?
            .into_inner();
        Ok(bincode::deserialize(&reply.payload)?)
    }

    async fn send_install_snapshot(
        &self,
        target: NodeId,
        rpc: InstallSnapshotRequest,
    ) -> anyhow::Result<InstallSnapshotResponse> {
        let term = rpc.term;
        let payload = bincode::serialize(&rpc)?;

        let mut client = self.client_for(target).await?;
        let reply = client
            .install_snapshot(InstallSnapshotEnvelope { term, payload })
            .await?
            .into_inner();
        Ok(bincode::deserialize(&reply.payload)?)
    }

    async fn send_vote(&self, target: NodeId, rpc: VoteRequest) -> anyhow::Result<VoteResponse> {
        let term = rpc.term;
        let candidate_id = rpc.candidate_id;
        let payload = bincode::serialize(&rpc)?;

        let mut client = self.client_for(target).await?;
        let reply = client
            .request_vote(VoteEnvelope { term, candidate_id, payload })
            .await?
            .into_inner();
        Ok(bincode::deserialize(&reply.payload)?)
    }
}

//! The binder: wires the consensus engine, the message repository, and the membership layer
//! together behind the operations the wire API and the gossip handler actually call.
//!
//! Proposals and membership changes go through [`Raft`]; reads bypass consensus entirely and hit
//! the local [`Repository`] handle shared with the applier (spec §4.2 control-flow note).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use raft::raft::ClientWriteRequest;
use raft::NodeId;
use raft::Raft;
use repository::Message;
use storage::MessageResponse;
use storage::ProposeMessage;
use storage::Store;

use crate::error::membership_result;
use crate::error::BinderError;
use crate::network::AddressBook;
use crate::network::GrpcNetwork;

pub type NodeRaft = Raft<ProposeMessage, MessageResponse, GrpcNetwork, Store>;

/// The node's single point of contact between the wire API, the membership layer, and consensus.
pub struct Binder {
    node_id: NodeId,
    raft: NodeRaft,
    repo: repository::Repository,
    addresses: Arc<AddressBook>,
    commit_timeout: Duration,
}

impl Binder {
    pub fn new(
        node_id: NodeId,
        raft: NodeRaft,
        store: &Store,
        addresses: Arc<AddressBook>,
        self_consensus_addr: String,
        commit_timeout: Duration,
    ) -> Self {
        addresses.set(node_id, self_consensus_addr);
        Self {
            node_id,
            raft,
            repo: store.repository(),
            addresses,
            commit_timeout,
        }
    }

    pub fn raft(&self) -> &NodeRaft {
        &self.raft
    }

    /// `SaveMessage`: routed to the leader only. Stamps `create_time` at proposal time so every
    /// replica applies the same value regardless of when it processes the entry (spec §9,
    /// "create_time format" open question — resolved here as an RFC3339 string).
    pub async fn save_message(
        &self,
        user_id: u64,
        value: Vec<u8>,
        file_name: String,
        file_id: String,
    ) -> Result<Message, BinderError> {
        let propose = ProposeMessage {
            user_id,
            create_time: chrono::Utc::now().to_rfc3339(),
            value,
            file_name,
            file_id,
        };

        let write = self.raft.client_write(ClientWriteRequest::new(propose));
        let response = match tokio::time::timeout(self.commit_timeout, write).await {
            Ok(res) => res?,
            Err(_) => return Err(BinderError::Timeout),
        };
        Ok(response.data.message)
    }

    /// `ReadUserMessages`: bypasses consensus, reading the local repository directly. Pagination
    /// follows spec §6: 0-based offset, `asc` selects ascending/descending id order, and
    /// `is_last_page` is true once fewer than `limit` rows remain beyond this page.
    pub async fn read_user_messages(
        &self,
        user_id: u64,
        offset: u64,
        limit: u64,
        asc: bool,
    ) -> Result<(Vec<Message>, bool), BinderError> {
        let mut all = self.repo.get_by_user(user_id).await?;
        if !asc {
            all.reverse();
        }

        let total = all.len() as u64;
        let start = offset.min(total) as usize;
        let end = offset.saturating_add(limit).min(total) as usize;
        let page = all[start..end].to_vec();
        let is_last_page = offset.saturating_add(limit) >= total;

        Ok((page, is_last_page))
    }

    /// `GetServers`: the current voting configuration, each annotated with its `consensus_addr`
    /// (learned from gossip, or this node's own) and whether it is the current leader.
    pub fn get_servers(&self) -> Vec<(NodeId, String, bool)> {
        let metrics = self.raft.metrics().borrow().clone();
        let leader = metrics.current_leader;
        metrics
            .membership_config
            .all_nodes()
            .into_iter()
            .map(|id| {
                let addr = self.addresses.get(id).unwrap_or_default();
                (id, addr, Some(id) == leader)
            })
            .collect()
    }

    /// `LeaderWithID`: the current leader's `consensus_addr` and id, if a leader is known.
    pub fn leader_with_id(&self) -> Option<(String, NodeId)> {
        let leader = self.raft.metrics().borrow().current_leader?;
        let addr = self.addresses.get(leader)?;
        Some((addr, leader))
    }

    /// `WaitForLeader`: polls until a leader exists or `timeout` elapses.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<(String, NodeId), BinderError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(found) = self.leader_with_id() {
                return Ok(found);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BinderError::Timeout);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[async_trait]
impl membership::Handler for Binder {
    /// A remote node joined the gossip cluster. Adds it as a voter iff this node is the current
    /// leader; idempotent both because `AddVoter` with a matching `(id, addr)` is a no-op per
    /// spec §4.3, and because `ChangeConfigError::Noop` is folded into success regardless.
    async fn join(&self, node_name: &str, consensus_addr: &str) -> anyhow::Result<()> {
        let target: NodeId = match node_name.parse() {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!(node = node_name, "gossip join event with a non-numeric node name, ignoring");
                return Ok(());
            }
        };

        // Every node — not just the leader — learns peer addresses from gossip: a follower that
        // becomes a candidate still has to dial every other voter to request votes, and
        // `GetServers`/`LeaderWithID` read this book on any node. The address book isn't part of
        // the replicated config (only node ids are), so recording it here is the only place it's
        // ever written.
        let addr_matched_before = self.addresses.get(target).as_deref() == Some(consensus_addr);
        self.addresses.set(target, consensus_addr.to_string());

        let metrics = self.raft.metrics().borrow().clone();
        if metrics.current_leader != Some(self.node_id) {
            return Ok(());
        }

        let already_present = metrics.membership_config.contains(&target);
        if already_present && addr_matched_before {
            return Ok(());
        }

        if !already_present {
            let mut members = metrics.membership_config.all_nodes();
            members.insert(target);
            membership_result(self.raft.change_membership(members).await)?;
        }

        Ok(())
    }

    /// A remote node left or was declared failed. Removes it as a voter iff this node is the
    /// current leader.
    async fn leave(&self, node_name: &str) -> anyhow::Result<()> {
        let target: NodeId = match node_name.parse() {
            Ok(id) => id,
            Err(_) => return Ok(()),
        };

        let metrics = self.raft.metrics().borrow().clone();
        if metrics.current_leader != Some(self.node_id) {
            return Ok(());
        }

        if !metrics.membership_config.contains(&target) {
            return Ok(());
        }

        let mut members = metrics.membership_config.all_nodes();
        members.remove(&target);
        membership_result(self.raft.change_membership(members).await)?;
        self.addresses.remove(target);

        Ok(())
    }

    fn print_leader(&self) {
        let leader = self.raft.metrics().borrow().current_leader;
        tracing::info!(?leader, "current leader");
    }

    fn print_config(&self) {
        let members = self.raft.metrics().borrow().membership_config.clone();
        tracing::info!(?members, "current configuration");
    }

    fn print_my_addr(&self) {
        let addr = self.addresses.get(self.node_id).unwrap_or_default();
        tracing::info!(node_id = self.node_id, %addr, "this node's address");
    }
}

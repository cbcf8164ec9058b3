//! The bridge between gossip membership events and consensus configuration changes.

use async_trait::async_trait;

/// Consumed by the membership layer to turn join/leave events into `AddVoter`/`RemoveServer`
/// calls against whichever node currently holds leadership.
///
/// Local events (`local_member.name == event.name`) never reach these methods — the membership
/// layer filters them out before dispatch, since a node never adds or removes itself.
#[async_trait]
pub trait Handler: Send + Sync {
    /// A remote node joined the gossip cluster. Implementations invoke `AddVoter` iff this node
    /// is the current leader; otherwise the call is a no-op, since the leader will observe its
    /// own join event.
    async fn join(&self, node_name: &str, consensus_addr: &str) -> anyhow::Result<()>;

    /// A remote node left or was declared failed. Implementations invoke `RemoveServer` iff this
    /// node is the current leader.
    async fn leave(&self, node_name: &str) -> anyhow::Result<()>;

    /// Operator-triggered `leader` user event: log the current leader. Observational only.
    fn print_leader(&self);

    /// Operator-triggered `config` user event: log the current cluster configuration.
    fn print_config(&self);

    /// Operator-triggered `me` user event: log this node's own address.
    fn print_my_addr(&self);
}

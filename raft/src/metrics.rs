//! Metrics emitted by a running Raft node, for observability and for awaiting specific state
//! transitions in tests and orchestration code.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::core::State;
use crate::raft::MembershipConfig;
use crate::replication::ReplicationMetrics;
use crate::LogId;
use crate::NodeId;

/// A snapshot of the state of a single Raft node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RaftMetrics {
    /// This node's ID.
    pub id: NodeId,
    /// The node's current state.
    pub state: State,
    /// The node's current term.
    pub current_term: u64,
    /// The node's last log index.
    pub last_log_index: u64,
    /// The index of the last log applied to this node's state machine.
    pub last_applied: u64,
    /// The current cluster leader, if any.
    pub current_leader: Option<NodeId>,
    /// The current membership config of the cluster.
    pub membership_config: MembershipConfig,
    /// The last log id covered by this node's most recent snapshot.
    pub snapshot: LogId,
    /// Metrics about this node's peers, only present when this node is the leader.
    pub leader_metrics: Option<LeaderMetrics>,
}

impl RaftMetrics {
    pub(crate) fn new_initial(id: NodeId) -> Self {
        Self {
            id,
            state: State::Follower,
            current_term: 0,
            last_log_index: 0,
            last_applied: 0,
            current_leader: None,
            membership_config: MembershipConfig::new_initial(id),
            snapshot: LogId { term: 0, index: 0 },
            leader_metrics: None,
        }
    }
}

/// Replication metrics for every other node in the cluster, as observed by the current leader.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LeaderMetrics {
    /// A mapping of node ID to its most recently known-replicated log id.
    pub replication: HashMap<NodeId, ReplicationMetrics>,
}

/// A handle used to await some condition on a node's metrics stream.
pub struct Wait {
    pub timeout: Duration,
    pub rx: watch::Receiver<RaftMetrics>,
}

/// An error indicating that a timeout was hit while waiting on a metrics condition.
#[derive(Debug, thiserror::Error)]
#[error("timed out while waiting for metrics condition: {0}")]
pub struct WaitError(pub String);

impl Wait {
    /// Wait for the metrics to satisfy the given predicate, or error out after the configured timeout.
    pub async fn metrics<T>(&self, func: T, msg: impl AsRef<str>) -> Result<RaftMetrics, WaitError>
    where T: Fn(&RaftMetrics) -> bool {
        let mut rx = self.rx.clone();
        let fut = async {
            loop {
                {
                    let latest = rx.borrow();
                    if func(&latest) {
                        return latest.clone();
                    }
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
            rx.borrow().clone()
        };

        match timeout(self.timeout, fut).await {
            Ok(metrics) => {
                if func(&metrics) {
                    Ok(metrics)
                } else {
                    Err(WaitError(msg.as_ref().to_string()))
                }
            }
            Err(_) => Err(WaitError(msg.as_ref().to_string())),
        }
    }

    /// Wait for the node's last log index to reach the given value.
    pub async fn log(&self, want_log: u64) -> Result<RaftMetrics, WaitError> {
        self.metrics(|m| m.last_log_index == want_log, format!("log index to become {}", want_log)).await
    }

    /// Wait for the node's last applied log index to reach the given value.
    pub async fn applied_index(&self, want: u64) -> Result<RaftMetrics, WaitError> {
        self.metrics(|m| m.last_applied == want, format!("applied index to become {}", want)).await
    }

    /// Wait for the node's current state to become the given state.
    pub async fn state(&self, want_state: State) -> Result<RaftMetrics, WaitError> {
        self.metrics(|m| m.state == want_state, format!("state to become {:?}", want_state)).await
    }

    /// Wait for the node's current leader to become the given node.
    pub async fn current_leader(&self, want_leader: NodeId) -> Result<RaftMetrics, WaitError> {
        self.metrics(
            |m| m.current_leader == Some(want_leader),
            format!("current leader to become {}", want_leader),
        )
        .await
    }

    /// Wait for the node's snapshot to cover at least the given index.
    pub async fn snapshot(&self, want: LogId) -> Result<RaftMetrics, WaitError> {
        self.metrics(|m| m.snapshot.index >= want.index, format!("snapshot to cover {}", want)).await
    }

    /// Wait for the node's membership config to equal the given set of member node IDs.
    pub async fn members(&self, want: BTreeMap<NodeId, ()>) -> Result<RaftMetrics, WaitError> {
        let want_members: std::collections::BTreeSet<NodeId> = want.keys().cloned().collect();
        self.metrics(
            |m| m.membership_config.members == want_members,
            format!("membership to become {:?}", want_members),
        )
        .await
    }
}

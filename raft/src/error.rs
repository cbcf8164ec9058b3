//! Error taxonomy for the consensus engine.
//!
//! Every variant here traces back to spec §7: callers distinguish
//! "not the leader" (retryable elsewhere), "no leader yet" (retryable here),
//! timeouts/cancellation (retryable), and storage corruption (fatal, the
//! node must stop serving).

use crate::raft_types::NodeId;
use crate::raft_types::SnapshotSegmentId;

/// Errors that can occur inside the core Raft loop.
#[derive(Debug, thiserror::Error)]
pub enum RaftError {
    #[error("raft is shutting down")]
    ShuttingDown,

    #[error("error from storage: {0}")]
    RaftStorage(anyhow::Error),

    #[error("error from network: {0}")]
    RaftNetwork(anyhow::Error),

    #[error("snapshot mismatch: expected {expect}, got {got}")]
    SnapshotMismatch {
        expect: SnapshotSegmentId,
        got: SnapshotSegmentId,
    },
}

pub type RaftResult<T> = std::result::Result<T, RaftError>;

/// Error returned from a client read (linearizable barrier) request.
#[derive(Debug, thiserror::Error)]
pub enum ClientReadError {
    #[error(transparent)]
    RaftError(#[from] RaftError),

    #[error("this node could not confirm leadership within the configured timeout")]
    QuorumNotReached,

    #[error("this node is not the leader; forward to {0:?}")]
    ForwardToLeader(Option<NodeId>),
}

/// Error returned from a client write (propose) request.
#[derive(Debug, thiserror::Error)]
pub enum ClientWriteError<D: crate::raft_types::AppData> {
    #[error(transparent)]
    RaftError(RaftError),

    #[error("this node is not the leader; forward to {1:?}")]
    ForwardToLeader(D, Option<NodeId>),
}

/// Error returned when attempting to initialize a fresh single-node cluster.
#[derive(Debug, thiserror::Error)]
pub enum InitializeError {
    #[error("this node already has log entries or has voted in a term; bootstrap refused")]
    NotAllowed,

    #[error("the given membership set does not contain this node ({0})")]
    NotInMembers(NodeId),

    #[error(transparent)]
    RaftError(#[from] RaftError),
}

/// Error returned when adding or removing a voter from the cluster.
#[derive(Debug, thiserror::Error)]
pub enum ChangeConfigError {
    #[error("no-op: the requested change is already satisfied")]
    Noop,

    #[error("refusing to change to an empty membership set")]
    InoperableConfig,

    #[error("a config change is already in progress")]
    ConfigChangeInProgress,

    #[error("this node is not the leader; current leader is {0:?}")]
    NodeNotLeader(Option<NodeId>),

    #[error(transparent)]
    RaftError(#[from] RaftError),
}

/// Carried over an internal oneshot reply channel for requests that have no
/// client-facing response type of their own (membership changes, etc.).
pub type ResponseError = ChangeConfigError;

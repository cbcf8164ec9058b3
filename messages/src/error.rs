//! Error taxonomy for the binder and RPC layers (spec §7).

use raft::error::ChangeConfigError;
use raft::error::ClientWriteError;
use raft::error::RaftError;
use raft::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum BinderError {
    /// Carries the current leader hint, per spec §6/§7 `NotLeader`.
    #[error("this node is not the leader; current leader is {0:?}")]
    NotLeader(Option<NodeId>),

    #[error("no leader is currently known")]
    NoLeader,

    #[error("timed out waiting for a leader")]
    Timeout,

    #[error(transparent)]
    Repository(#[from] repository::RepositoryError),

    #[error(transparent)]
    Raft(#[from] RaftError),
}

impl From<ClientWriteError<storage::ProposeMessage>> for BinderError {
    fn from(err: ClientWriteError<storage::ProposeMessage>) -> Self {
        match err {
            ClientWriteError::ForwardToLeader(_, leader) => BinderError::NotLeader(leader),
            ClientWriteError::RaftError(e) => BinderError::Raft(e),
        }
    }
}

/// Folds the result of a membership change into the binder's error type.
///
/// `ChangeConfigError::Noop` means the requested change was already in effect; per spec §7
/// (`AlreadyExists` — treated as success) that's success, not failure, so it's handled here
/// rather than through a blanket `From` impl that would have no way to return `Ok`.
pub fn membership_result(result: Result<(), ChangeConfigError>) -> Result<(), BinderError> {
    match result {
        Ok(()) => Ok(()),
        Err(ChangeConfigError::Noop) => Ok(()),
        Err(ChangeConfigError::NodeNotLeader(leader)) => Err(BinderError::NotLeader(leader)),
        Err(ChangeConfigError::RaftError(e)) => Err(BinderError::Raft(e)),
        Err(other) => Err(BinderError::Raft(RaftError::RaftStorage(anyhow::anyhow!(other.to_string())))),
    }
}

impl From<BinderError> for tonic::Status {
    fn from(err: BinderError) -> Self {
        match err {
            BinderError::NotLeader(leader) => tonic::Status::failed_precondition(format!(
                "not the leader; current leader is {}",
                leader.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string())
            )),
            BinderError::NoLeader => tonic::Status::unavailable(err.to_string()),
            BinderError::Timeout => tonic::Status::deadline_exceeded(err.to_string()),
            BinderError::Repository(repository::RepositoryError::NotFound) => {
                tonic::Status::not_found("message not found")
            }
            BinderError::Repository(e) => tonic::Status::internal(e.to_string()),
            BinderError::Raft(RaftError::ShuttingDown) => tonic::Status::unavailable(err.to_string()),
            BinderError::Raft(e) => tonic::Status::internal(e.to_string()),
        }
    }
}

//! Fundamental types shared across the consensus engine.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// The identity of a node participating in consensus.
pub type NodeId = u64;

/// A log entry's position: the index at which it lives and the term during
/// which it was created. Ordering a `LogId` is equivalent to ordering
/// `(term, index)` lexically, which is what the election-safety and
/// log-matching checks need.
#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogId {
    pub term: u64,
    pub index: u64,
}

impl LogId {
    pub fn new(term: u64, index: u64) -> Self {
        Self { term, index }
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.term, self.index)
    }
}

/// Identifies a snapshot independent of the log entries it covers.
pub type SnapshotId = String;

/// Identifies a specific chunk of a specific snapshot, used to detect a
/// leader restarting an `InstallSnapshot` stream from scratch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSegmentId {
    pub id: SnapshotId,
    pub offset: u64,
}

impl fmt::Display for SnapshotSegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.offset)
    }
}

/// Marker trait for application data proposed through `client_write`.
pub trait AppData: Clone + fmt::Debug + Send + Sync + Serialize + serde::de::DeserializeOwned + 'static {}

/// Marker trait for the application's response to an applied entry.
pub trait AppDataResponse: Clone + fmt::Debug + Send + Sync + Serialize + serde::de::DeserializeOwned + 'static {}

/// Implemented by the RPC/event payloads so that log lines can render a
/// compact, structured summary instead of a full `Debug` dump.
pub trait MessageSummary {
    fn summary(&self) -> String;
}

impl<T: MessageSummary> MessageSummary for Option<T> {
    fn summary(&self) -> String {
        match self {
            Some(t) => t.summary(),
            None => "None".to_string(),
        }
    }
}

impl<T: MessageSummary> MessageSummary for &[T] {
    fn summary(&self) -> String {
        let entries: Vec<_> = self.iter().map(|t| t.summary()).collect();
        format!("[{}]", entries.join(", "))
    }
}

impl<T: MessageSummary> MessageSummary for Vec<T> {
    fn summary(&self) -> String {
        self.as_slice().summary()
    }
}

/// Distinguishes "replace the field with this value" from "leave it alone"
/// when reporting metrics, so callers don't need to re-send unchanged state.
#[derive(Debug, Clone)]
pub enum Update<T> {
    Update(T),
    Ignore,
}

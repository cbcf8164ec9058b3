//! An implementation of the Raft distributed consensus protocol.
//!
//! This crate provides the `Raft` type, which runs the full protocol — leader
//! election, log replication, cluster membership changes, and snapshot-based
//! log compaction — on top of a pluggable `RaftStorage` and `RaftNetwork`.
//! Application state lives behind `RaftStorage`; this crate only knows how to
//! keep a replicated log consistent across a cluster.

mod config;
mod core;
mod error;
mod metrics;
mod network;
mod quorum;
pub mod raft;
mod raft_types;
mod replication;
mod storage;

pub use async_trait;

pub use config::Config;
pub use config::ConfigBuilder;
pub use config::ConfigError;
pub use config::SnapshotPolicy;
pub use core::State;
pub use error;
pub use metrics;
pub use metrics::LeaderMetrics;
pub use metrics::RaftMetrics;
pub use network::RaftNetwork;
pub use raft::Raft;
pub use raft_types::AppData;
pub use raft_types::AppDataResponse;
pub use raft_types::LogId;
pub use raft_types::MessageSummary;
pub use raft_types::NodeId;
pub use raft_types::SnapshotId;
pub use raft_types::SnapshotSegmentId;
pub use raft_types::Update;
pub use replication::ReplicationMetrics;
pub use storage;
pub use storage::HardState;
pub use storage::InitialState;
pub use storage::RaftStorage;
pub use storage::RaftStorageDebug;
pub use storage::Snapshot;
pub use storage::SnapshotMeta;

//! Durable per-node storage: the log, stable, and snapshot stores, plus the state-machine
//! applier that wires them — and the message repository — behind `raft::RaftStorage`.

mod data;
mod error;
mod log_store;
mod snapshot_store;
mod stable_store;
mod state_machine;

pub use data::MessageResponse;
pub use data::ProposeMessage;
pub use error::Result;
pub use error::StoreError;
pub use log_store::LogStore;
pub use snapshot_store::SnapshotStore;
pub use stable_store::StableStore;
pub use state_machine::ShutdownError;
pub use state_machine::Store;

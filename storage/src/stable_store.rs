//! The stable store: `current_term`, `voted_for`, and the last-applied log id, overwritten in
//! place with an `fsync` (via `sled::Tree::flush`) before any RPC that references the new value.

use raft::storage::HardState;
use raft::LogId;
use raft::NodeId;

use crate::error::Result;

const KEY_HARD_STATE: &str = "hard_state";
const KEY_LAST_APPLIED: &str = "last_applied";
const KEY_NODE_ID: &str = "node_id";

pub struct StableStore {
    tree: sled::Tree,
}

impl StableStore {
    pub fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    pub fn get_hard_state(&self) -> Result<Option<HardState>> {
        match self.tree.get(KEY_HARD_STATE)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn save_hard_state(&self, hs: &HardState) -> Result<()> {
        self.tree.insert(KEY_HARD_STATE, bincode::serialize(hs)?)?;
        self.tree.flush()?;
        Ok(())
    }

    pub fn get_last_applied(&self) -> Result<LogId> {
        match self.tree.get(KEY_LAST_APPLIED)? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(LogId::default()),
        }
    }

    pub fn save_last_applied(&self, id: LogId) -> Result<()> {
        self.tree.insert(KEY_LAST_APPLIED, bincode::serialize(&id)?)?;
        self.tree.flush()?;
        Ok(())
    }

    /// Persist this node's own ID so it's stable across restarts even before any log entry
    /// records a membership config.
    pub fn save_node_id(&self, id: NodeId) -> Result<()> {
        self.tree.insert(KEY_NODE_ID, bincode::serialize(&id)?)?;
        self.tree.flush()?;
        Ok(())
    }

    pub fn get_node_id(&self) -> Result<Option<NodeId>> {
        match self.tree.get(KEY_NODE_ID)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether this store holds any consensus bookkeeping — `current_term`/`voted_for` or a
    /// last-applied log id. Used to refuse bootstrap on non-pristine on-disk state.
    ///
    /// Deliberately excludes `KEY_NODE_ID`: `Store::open` writes that key unconditionally on
    /// every open, fresh or not, so it carries no information about prior cluster participation.
    pub fn has_consensus_state(&self) -> Result<bool> {
        Ok(self.tree.contains_key(KEY_HARD_STATE)? || self.tree.contains_key(KEY_LAST_APPLIED)?)
    }
}

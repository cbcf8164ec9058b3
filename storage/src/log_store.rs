//! The log store: append-only, crash-safe storage for the replicated log.
//!
//! Backed by a `sled::Tree` keyed by the entry's big-endian-encoded index, which keeps entries in
//! index order under iteration and range scans. Every `append` calls `flush` before returning so a
//! successful append is guaranteed to be on stable media, per the durable-stores contract.

use std::ops::Bound;
use std::ops::RangeBounds;

use raft::raft::Entry;
use raft::LogId;

use crate::data::ProposeMessage;
use crate::error::Result;
use crate::error::StoreError;

fn index_key(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

fn key_index(key: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(key);
    u64::from_be_bytes(buf)
}

/// Durable storage for the raft log.
pub struct LogStore {
    tree: sled::Tree,
}

impl LogStore {
    pub fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    /// Append entries in index order. Entries are always presented in order by the engine, but
    /// each entry's own index is used to place it, same as the contract other `RaftStorage`
    /// callers rely on.
    pub fn append(&self, entries: &[&Entry<ProposeMessage>]) -> Result<()> {
        for entry in entries {
            let bytes = bincode::serialize(*entry)?;
            self.tree.insert(index_key(entry.log_id.index), bytes)?;
        }
        self.tree.flush()?;
        Ok(())
    }

    pub fn get_entry(&self, index: u64) -> Result<Option<Entry<ProposeMessage>>> {
        match self.tree.get(index_key(index))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn first_index(&self) -> Result<Option<u64>> {
        Ok(self.tree.iter().keys().next().transpose()?.map(|k| key_index(&k)))
    }

    pub fn last_index(&self) -> Result<Option<u64>> {
        Ok(self.tree.iter().keys().next_back().transpose()?.map(|k| key_index(&k)))
    }

    pub fn last_log_id(&self) -> Result<Option<LogId>> {
        match self.tree.iter().values().next_back().transpose()? {
            Some(bytes) => {
                let entry: Entry<ProposeMessage> = bincode::deserialize(&bytes)?;
                Ok(Some(entry.log_id))
            }
            None => Ok(None),
        }
    }

    /// Delete all entries with an index in `range`. Used both for snapshot compaction (a prefix)
    /// and for conflict truncation (a suffix).
    pub fn delete_range<RNG: RangeBounds<u64>>(&self, range: RNG) -> Result<()> {
        let start = match range.start_bound() {
            Bound::Included(v) => *v,
            Bound::Excluded(v) => v + 1,
            Bound::Unbounded => self.first_index()?.unwrap_or(0),
        };
        let stop = match range.end_bound() {
            Bound::Included(v) => *v + 1,
            Bound::Excluded(v) => *v,
            Bound::Unbounded => self.last_index()?.map(|i| i + 1).unwrap_or(0),
        };
        let mut batch = sled::Batch::default();
        for index in start..stop {
            batch.remove(&index_key(index)[..]);
        }
        self.tree.apply_batch(batch)?;
        self.tree.flush()?;
        Ok(())
    }

    /// Entries with an index in `range`, in index order.
    pub fn range<RNG: RangeBounds<u64>>(&self, range: RNG) -> Result<Vec<Entry<ProposeMessage>>> {
        let start = match range.start_bound() {
            Bound::Included(v) => index_key(*v),
            Bound::Excluded(v) => index_key(v + 1),
            Bound::Unbounded => index_key(0),
        };
        let end = match range.end_bound() {
            Bound::Included(v) => index_key(v + 1),
            Bound::Excluded(v) => index_key(*v),
            Bound::Unbounded => index_key(u64::MAX),
        };
        let mut out = Vec::new();
        for item in self.tree.range(start..end) {
            let (_, bytes) = item?;
            out.push(bincode::deserialize::<Entry<ProposeMessage>>(&bytes).map_err(StoreError::from)?);
        }
        Ok(out)
    }
}

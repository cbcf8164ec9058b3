//! A purely in-memory `RaftStorage` implementation.
//!
//! This store keeps its log, hard state, and state machine entirely in memory behind
//! `RwLock`s. It exists only to exercise the consensus engine in tests; nothing here
//! survives a process restart.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::ops::Bound;
use std::ops::RangeBounds;
use std::sync::Arc;

use async_trait::async_trait;
use raft::raft::Entry;
use raft::raft::EntryPayload;
use raft::raft::MembershipConfig;
use raft::storage::HardState;
use raft::storage::InitialState;
use raft::storage::Snapshot;
use raft::storage::SnapshotMeta;
use raft::AppData;
use raft::AppDataResponse;
use raft::LogId;
use raft::NodeId;
use raft::RaftStorage;
use raft::RaftStorageDebug;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::RwLock;

/// A client request proposed to a `MemStore`-backed Raft cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientRequest {
    /// The ID of the client which sent this request.
    pub client: String,
    /// A serial number, unique per client, identifying this request.
    pub serial: u64,
    /// A description of the status to record for this request.
    pub status: String,
}

impl AppData for ClientRequest {}

/// The response applied to the state machine for a `ClientRequest`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientResponse(pub Option<String>);

impl AppDataResponse for ClientResponse {}

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("unsafe storage error")]
    UnsafeStorageError,
}

/// The in-memory state machine: per-client serial tracking plus the last applied log id.
#[derive(Clone, Debug, Default)]
pub struct MemStoreStateMachine {
    pub last_applied_log: LogId,
    pub client_serial_responses: BTreeMap<String, (u64, Option<String>)>,
    pub client_status: BTreeMap<String, String>,
}

#[derive(Debug)]
struct MemStoreSnapshot {
    pub meta: SnapshotMeta,
    pub data: Vec<u8>,
}

/// An in-memory `RaftStorage` implementation, for tests.
pub struct MemStore {
    id: NodeId,
    log: RwLock<BTreeMap<u64, Entry<ClientRequest>>>,
    sm: RwLock<MemStoreStateMachine>,
    hs: RwLock<Option<HardState>>,
    current_snapshot: RwLock<Option<MemStoreSnapshot>>,
}

impl MemStore {
    /// Create a new, pristine instance for the given node ID.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            log: RwLock::new(BTreeMap::new()),
            sm: RwLock::new(MemStoreStateMachine::default()),
            hs: RwLock::new(None),
            current_snapshot: RwLock::new(None),
        }
    }

    /// Create a new instance wrapped in an `Arc`.
    pub fn new_arc(id: NodeId) -> Arc<Self> {
        Arc::new(Self::new(id))
    }
}

fn range_bounds_to_vec_range<RNG: RangeBounds<u64>>(range: RNG, last: u64) -> (u64, u64) {
    let start = match range.start_bound() {
        Bound::Included(v) => *v,
        Bound::Excluded(v) => *v + 1,
        Bound::Unbounded => 0,
    };
    let stop = match range.end_bound() {
        Bound::Included(v) => *v + 1,
        Bound::Excluded(v) => *v,
        Bound::Unbounded => last + 1,
    };
    (start, stop)
}

#[async_trait]
impl RaftStorage<ClientRequest, ClientResponse> for MemStore {
    type SnapshotData = Cursor<Vec<u8>>;
    type ShutdownError = ShutdownError;

    async fn get_membership_config(&self) -> anyhow::Result<MembershipConfig> {
        let log = self.log.read().await;
        for entry in log.values().rev() {
            if let EntryPayload::ConfigChange(ref change) = entry.payload {
                return Ok(change.membership.clone());
            }
        }
        Ok(MembershipConfig::new_initial(self.id))
    }

    async fn get_initial_state(&self) -> anyhow::Result<InitialState> {
        let membership = self.get_membership_config().await?;
        let mut hs = self.hs.write().await;
        let log = self.log.read().await;
        let sm = self.sm.read().await;

        match &*hs {
            Some(inner) => {
                let last_log_id = match log.values().next_back() {
                    Some(entry) => entry.log_id,
                    None => LogId { term: 0, index: 0 },
                };
                Ok(InitialState {
                    last_log_id,
                    last_applied_log: sm.last_applied_log,
                    hard_state: inner.clone(),
                    membership,
                })
            }
            None => {
                let new = InitialState::new_initial(self.id);
                *hs = Some(new.hard_state.clone());
                Ok(new)
            }
        }
    }

    async fn save_hard_state(&self, hs: &HardState) -> anyhow::Result<()> {
        *self.hs.write().await = Some(hs.clone());
        Ok(())
    }

    async fn get_log_entries<RNG: RangeBounds<u64> + Clone + std::fmt::Debug + Send + Sync>(
        &self,
        range: RNG,
    ) -> anyhow::Result<Vec<Entry<ClientRequest>>> {
        let log = self.log.read().await;
        let last = log.keys().next_back().copied().unwrap_or(0);
        let (start, stop) = range_bounds_to_vec_range(range, last);
        Ok(log.range(start..stop).map(|(_, v)| v.clone()).collect())
    }

    async fn try_get_log_entry(&self, log_index: u64) -> anyhow::Result<Option<Entry<ClientRequest>>> {
        Ok(self.log.read().await.get(&log_index).cloned())
    }

    async fn get_last_log_id(&self) -> anyhow::Result<LogId> {
        let log = self.log.read().await;
        let sm = self.sm.read().await;
        Ok(match log.values().next_back() {
            Some(entry) => entry.log_id,
            None => sm.last_applied_log,
        })
    }

    async fn delete_logs_from<RNG: RangeBounds<u64> + Clone + std::fmt::Debug + Send + Sync>(
        &self,
        range: RNG,
    ) -> anyhow::Result<()> {
        let mut log = self.log.write().await;
        let last = log.keys().next_back().copied().unwrap_or(0);
        let (start, stop) = range_bounds_to_vec_range(range, last);
        for key in start..stop {
            log.remove(&key);
        }
        Ok(())
    }

    async fn append_to_log(&self, entries: &[&Entry<ClientRequest>]) -> anyhow::Result<()> {
        let mut log = self.log.write().await;
        for entry in entries {
            log.insert(entry.log_id.index, (*entry).clone());
        }
        Ok(())
    }

    async fn apply_to_state_machine(&self, entries: &[&Entry<ClientRequest>]) -> anyhow::Result<Vec<ClientResponse>> {
        let mut sm = self.sm.write().await;
        let mut results = Vec::with_capacity(entries.len());

        for entry in entries {
            sm.last_applied_log = entry.log_id;

            match &entry.payload {
                EntryPayload::Blank => results.push(ClientResponse(None)),
                EntryPayload::Normal(inner) => {
                    let req = &inner.data;
                    if let Some((serial, resp)) = sm.client_serial_responses.get(&req.client) {
                        if serial == &req.serial {
                            results.push(ClientResponse(resp.clone()));
                            continue;
                        }
                    }
                    sm.client_status.insert(req.client.clone(), req.status.clone());
                    let resp = Some(req.status.clone());
                    sm.client_serial_responses.insert(req.client.clone(), (req.serial, resp.clone()));
                    results.push(ClientResponse(resp));
                }
                EntryPayload::ConfigChange(_) => results.push(ClientResponse(None)),
                EntryPayload::PurgedMarker => results.push(ClientResponse(None)),
            }
        }

        Ok(results)
    }

    async fn do_log_compaction(&self) -> anyhow::Result<Snapshot<Self::SnapshotData>> {
        let (data, last_applied_log);
        {
            let log = self.log.read().await;
            let sm = self.sm.read().await;
            data = serde_json::to_vec(&*sm)?;
            last_applied_log = sm.last_applied_log;
            drop(log);
        }

        let membership = self.get_membership_config().await?;
        let snapshot_id = format!("{}-{}", last_applied_log, uuid_like());

        let meta = SnapshotMeta {
            last_log_id: last_applied_log,
            membership,
            snapshot_id,
        };

        let snapshot = MemStoreSnapshot {
            meta: meta.clone(),
            data: data.clone(),
        };
        *self.current_snapshot.write().await = Some(snapshot);

        // Purge the log up through the snapshotted index; it is fully represented by the snapshot now.
        {
            let mut log = self.log.write().await;
            *log = log.split_off(&(last_applied_log.index + 1));
        }

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }

    async fn begin_receiving_snapshot(&self) -> anyhow::Result<Box<Self::SnapshotData>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn finalize_snapshot_installation(
        &self,
        meta: &SnapshotMeta,
        snapshot: Box<Self::SnapshotData>,
    ) -> anyhow::Result<()> {
        let data = snapshot.into_inner();
        let new_sm: MemStoreStateMachine = serde_json::from_slice(&data)?;

        {
            let mut log = self.log.write().await;
            log.retain(|&idx, _| idx > meta.last_log_id.index);
        }
        *self.sm.write().await = new_sm;
        *self.current_snapshot.write().await = Some(MemStoreSnapshot {
            meta: meta.clone(),
            data,
        });

        Ok(())
    }

    async fn get_current_snapshot(&self) -> anyhow::Result<Option<Snapshot<Self::SnapshotData>>> {
        Ok(self.current_snapshot.read().await.as_ref().map(|s| Snapshot {
            meta: s.meta.clone(),
            snapshot: Box::new(Cursor::new(s.data.clone())),
        }))
    }
}

#[async_trait]
impl RaftStorageDebug<MemStoreStateMachine> for MemStore {
    async fn get_state_machine(&self) -> MemStoreStateMachine {
        self.sm.read().await.clone()
    }

    async fn read_hard_state(&self) -> Option<HardState> {
        self.hs.read().await.clone()
    }
}

// serde derive on the state machine, placed here since it needs Serialize/Deserialize for
// snapshotting above.
impl Serialize for MemStoreStateMachine {
    fn serialize<SR>(&self, serializer: SR) -> Result<SR::Ok, SR::Error>
    where SR: serde::Serializer {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("MemStoreStateMachine", 3)?;
        s.serialize_field("last_applied_log", &self.last_applied_log)?;
        s.serialize_field("client_serial_responses", &self.client_serial_responses)?;
        s.serialize_field("client_status", &self.client_status)?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for MemStoreStateMachine {
    fn deserialize<DE>(deserializer: DE) -> Result<Self, DE::Error>
    where DE: serde::Deserializer<'de> {
        #[derive(Deserialize)]
        struct Shadow {
            last_applied_log: LogId,
            client_serial_responses: BTreeMap<String, (u64, Option<String>)>,
            client_status: BTreeMap<String, String>,
        }
        let shadow = Shadow::deserialize(deserializer)?;
        Ok(MemStoreStateMachine {
            last_applied_log: shadow.last_applied_log,
            client_serial_responses: shadow.client_serial_responses,
            client_status: shadow.client_status,
        })
    }
}

/// A cheap, dependency-free stand-in for a random suffix; uniqueness across snapshots taken by
/// the same node is all that's required here, not global uniqueness.
fn uuid_like() -> u64 {
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}

use crate::core::RaftCore;
use crate::core::SnapshotState;
use crate::core::State;
use crate::core::UpdateCurrentLeader;
use crate::error::RaftResult;
use crate::raft::AppendEntriesRequest;
use crate::raft::AppendEntriesResponse;
use crate::raft::ConflictOpt;
use crate::raft::Entry;
use crate::raft::EntryPayload;
use crate::AppData;
use crate::AppDataResponse;
use crate::LogId;
use crate::MessageSummary;
use crate::RaftNetwork;
use crate::RaftStorage;
use crate::Update;

impl<D: AppData, R: AppDataResponse, N: RaftNetwork<D>, S: RaftStorage<D, R>> RaftCore<D, R, N, S> {
    /// Handle an AppendEntries RPC coming from the cluster leader (§5.3), as well as heartbeats
    /// (§5.2, empty `entries`).
    #[tracing::instrument(level = "debug", skip(self, msg), fields(msg=%msg.summary()))]
    pub(super) async fn handle_append_entries_request(
        &mut self,
        msg: AppendEntriesRequest<D>,
    ) -> RaftResult<AppendEntriesResponse> {
        // If message's term is less than most recent term, then we do not honor the request.
        if msg.term < self.current_term {
            tracing::debug!(%self.current_term, rpc_term=msg.term, "AppendEntries RPC term is less than current term");
            return Ok(AppendEntriesResponse {
                term: self.current_term,
                success: false,
                conflict_opt: None,
            });
        }

        // Update election timeout & step down from candidate/leader as needed.
        self.update_next_election_timeout(true);

        let mut report_metrics = false;

        if self.current_term != msg.term {
            self.update_current_term(msg.term, None);
            self.save_hard_state().await?;
            report_metrics = true;
        }

        if !self.target_state.is_follower() && !self.target_state.is_non_voter() {
            self.set_target_state(State::Follower);
        }

        if self.current_leader.as_ref() != Some(&msg.leader_id) {
            self.update_current_leader(UpdateCurrentLeader::OtherNode(msg.leader_id));
            report_metrics = true;
        }

        if report_metrics {
            self.report_metrics(Update::Ignore);
        }

        // If this node's log does not contain the given prev_log_id, then reply false, giving
        // the conflicting entry known to this node so the leader can decrement next_index quickly.
        if msg.prev_log_id.index != 0 {
            let opt = self.try_get_log_entry(msg.prev_log_id.index).await?;
            let matches = match opt {
                Some(entry) => entry.log_id == msg.prev_log_id,
                None => false,
            };
            if !matches {
                let conflict_opt = self.find_conflicting_entry_hint(msg.prev_log_id.index).await?;
                return Ok(AppendEntriesResponse {
                    term: self.current_term,
                    success: false,
                    conflict_opt,
                });
            }
        }

        // Replace any conflicting entries and append new ones.
        if !msg.entries.is_empty() {
            self.append_entries(&msg.entries).await?;
        }

        // Update the commit index per the leader's latest committed index, bounded by our own log.
        if msg.leader_commit > self.commit_index {
            let new_commit = std::cmp::min(msg.leader_commit, self.last_log_id.index);
            self.commit_index = new_commit;
            self.replicate_to_state_machine_if_needed().await?;
        }

        Ok(AppendEntriesResponse {
            term: self.current_term,
            success: true,
            conflict_opt: None,
        })
    }

    /// Try to read the log entry at `index`, using the state machine as a fallback when the
    /// entry has already been compacted away into a snapshot.
    async fn try_get_log_entry(&mut self, index: u64) -> RaftResult<Option<Entry<D>>> {
        if index == self.last_applied.index && index <= self.snapshot_last_log_id.index {
            return Ok(Some(Entry::new_purged_marker(self.last_applied)));
        }
        self.storage.try_get_log_entry(index).await.map_err(|err| self.map_fatal_storage_error(err))
    }

    /// Search backwards through the local log for an entry which does not conflict with the
    /// leader's view, to hint at where the leader should resume replication from (§5.3).
    async fn find_conflicting_entry_hint(&mut self, rejected_index: u64) -> RaftResult<Option<ConflictOpt>> {
        let last_known = self.last_log_id;
        if rejected_index > last_known.index {
            return Ok(Some(ConflictOpt { log_id: last_known }));
        }

        let start = last_known.index.saturating_sub(50).max(1);
        let entries = if start < rejected_index {
            self.storage.get_log_entries(start..rejected_index).await.map_err(|err| self.map_fatal_storage_error(err))?
        } else {
            Vec::new()
        };

        match entries.first() {
            Some(entry) => Ok(Some(ConflictOpt { log_id: entry.log_id })),
            None => Ok(Some(ConflictOpt {
                log_id: LogId { term: 0, index: 0 },
            })),
        }
    }

    /// Append the given entries to the log, deleting any conflicting entries already present.
    async fn append_entries(&mut self, entries: &[Entry<D>]) -> RaftResult<()> {
        let start_index = entries[0].log_id.index;

        if start_index <= self.last_log_id.index {
            // There may be conflicting entries already in the log; remove them and anything after.
            self.storage
                .delete_logs_from(start_index..)
                .await
                .map_err(|err| self.map_fatal_storage_error(err))?;
        }

        let refs: Vec<&Entry<D>> = entries.iter().collect();
        self.storage.append_to_log(&refs).await.map_err(|err| self.map_fatal_storage_error(err))?;

        if let Some(last) = entries.last() {
            self.last_log_id = last.log_id;
        }

        // Apply any membership change entries immediately to this node's in-memory view so
        // that it is taken into account even before the entry is committed.
        for entry in entries {
            if let EntryPayload::ConfigChange(ref change) = entry.payload {
                self.update_membership(change.membership.clone())?;
            }
        }

        Ok(())
    }

    /// Spawn a task to replicate newly committed entries to the state machine, if one is not
    /// already in flight.
    async fn replicate_to_state_machine_if_needed(&mut self) -> RaftResult<()> {
        if !self.replicate_to_sm_handle.is_empty() {
            return Ok(());
        }

        let storage = self.storage.clone();
        let start = self.last_applied.index + 1;
        let stop = self.commit_index + 1;
        if start >= stop {
            return Ok(());
        }

        let handle = tokio::spawn(async move {
            let entries = storage.get_log_entries(start..stop).await?;
            let refs: Vec<_> = entries.iter().collect();
            if refs.is_empty() {
                return Ok(None);
            }
            storage.apply_to_state_machine(&refs).await?;
            Ok(entries.last().map(|e| e.log_id))
        });

        self.replicate_to_sm_handle.push(handle);
        Ok(())
    }
}

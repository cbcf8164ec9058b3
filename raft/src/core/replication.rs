use crate::core::ConsensusState;
use crate::core::LeaderState;
use crate::core::ReplicationState;
use crate::core::State;
use crate::core::UpdateCurrentLeader;
use crate::raft::Entry;
use crate::replication::ReplicaEvent;
use crate::replication::ReplicationStream;
use crate::AppData;
use crate::AppDataResponse;
use crate::NodeId;
use crate::RaftNetwork;
use crate::RaftStorage;

impl<'a, D: AppData, R: AppDataResponse, N: RaftNetwork<D>, S: RaftStorage<D, R>> LeaderState<'a, D, R, N, S> {
    /// Spawn a new replication stream, returning its handle.
    #[tracing::instrument(level = "trace", skip(self))]
    pub(super) fn spawn_replication_stream(&mut self, target: NodeId) -> ReplicationState<D> {
        let replstream = ReplicationStream::new(
            self.core.id,
            target,
            self.core.current_term,
            self.core.config.clone(),
            self.core.last_log_id,
            self.core.commit_index,
            self.core.network.clone(),
            self.core.storage.clone(),
            self.replication_tx.clone(),
        );
        ReplicationState {
            matched: Entry::<D>::new_purged_marker(self.core.last_log_id).log_id,
            remove_after_commit: None,
            replstream,
        }
    }

    /// Handle a replication event coming from one of the replication streams.
    #[tracing::instrument(level = "trace", skip(self, event))]
    pub(super) async fn handle_replica_event(&mut self, event: ReplicaEvent<S::SnapshotData>) {
        let res = match event {
            ReplicaEvent::RateUpdate { target, is_line_rate } => {
                self.handle_rate_update(target, is_line_rate);
                Ok(())
            }
            ReplicaEvent::RevertToFollower { target, term } => {
                self.handle_revert_to_follower(target, term);
                Ok(())
            }
            ReplicaEvent::UpdateMatchIndex { target, matched } => {
                self.handle_update_match_index(target, matched).await
            }
            ReplicaEvent::NeedsSnapshot { target, tx } => self.handle_needs_snapshot(target, tx).await,
            ReplicaEvent::Shutdown => {
                self.core.set_target_state(State::Shutdown);
                Ok(())
            }
        };

        if let Err(err) = res {
            tracing::error!({error=%err}, "error while processing event from replication stream");
        }
    }

    /// Handle a replication rate update event.
    #[tracing::instrument(level = "trace", skip(self))]
    fn handle_rate_update(&mut self, target: NodeId, is_line_rate: bool) {
        // If a replication stream was at line rate, and now has fallen behind, we need to
        // ensure an election timeout is not hit while the target catches back up.
        let _ = target;
        let _ = is_line_rate;
    }

    /// Handle a revert-to-follower event coming from one of the replication streams.
    #[tracing::instrument(level = "trace", skip(self))]
    fn handle_revert_to_follower(&mut self, target: NodeId, term: u64) {
        let _ = target;
        if term > self.core.current_term {
            self.core.update_current_term(term, None);
            self.core.set_target_state(State::Follower);
        }
    }

    /// Handle an update to a replication stream's matched log ID.
    #[tracing::instrument(level = "trace", skip(self))]
    async fn handle_update_match_index(&mut self, target: NodeId, matched: crate::LogId) -> anyhow::Result<()> {
        if let Some(state) = self.nodes.get_mut(&target) {
            state.matched = matched;
            self.leader_metrics.replication.insert(target, crate::replication::ReplicationMetrics { matched });

            // Check if this node can now be removed from the cluster, per a previously committed
            // config change which removed it.
            if let Some(remove_after) = state.remove_after_commit {
                if matched.index >= remove_after {
                    if let Some(node) = self.nodes.remove(&target) {
                        let _ = node.replstream.repl_tx.send((
                            crate::replication::RaftEvent::Terminate,
                            tracing::debug_span!("CH"),
                        ));
                        self.leader_metrics.replication.remove(&target);
                    }
                }
            }
        } else if let Some(non_voter) = self.non_voters.get_mut(&target) {
            non_voter.state.matched = matched;
            if !non_voter.is_ready_to_join {
                // Non-voters are "ready to join" once they are within a few entries of the leader.
                if self.core.last_log_id.index.saturating_sub(matched.index) <= self.core.config.replication_lag_threshold {
                    non_voter.is_ready_to_join = true;
                    // If this non-voter was being synced as part of a pending config change,
                    // progress that change now that it has caught up.
                    if let ConsensusState::NonVoterSync { awaiting, .. } = &mut self.consensus_state {
                        awaiting.remove(&target);
                    }
                    if matches!(&self.consensus_state, ConsensusState::NonVoterSync { awaiting, .. } if awaiting.is_empty()) {
                        if let ConsensusState::NonVoterSync { members, tx, .. } =
                            std::mem::replace(&mut self.consensus_state, ConsensusState::Uniform)
                        {
                            self.change_membership(members, tx).await;
                        }
                    }
                }
            }
        }

        self.recalc_commit_index().await;
        self.leader_report_metrics();
        Ok(())
    }

    /// Recompute the commit index from the matched indices of a majority of voting nodes.
    #[tracing::instrument(level = "trace", skip(self))]
    async fn recalc_commit_index(&mut self) {
        let mut indices: Vec<u64> = self.nodes.values().map(|n| n.matched.index).collect();
        indices.push(self.core.last_log_id.index); // This node's own progress.
        indices.sort_unstable();

        let quorum_idx = crate::quorum::majority_of(indices.len());
        if quorum_idx == 0 || quorum_idx > indices.len() {
            return;
        }
        let new_commit = indices[indices.len() - quorum_idx];

        if new_commit > self.core.commit_index && new_commit <= self.core.last_log_id.index {
            self.core.commit_index = new_commit;

            // Drain any awaiting client requests which are now committed.
            let mut still_awaiting = Vec::new();
            for req in std::mem::take(&mut self.awaiting_committed) {
                if req.entry.log_id.index <= self.core.commit_index {
                    self.client_request_post_commit(req).await;
                } else {
                    still_awaiting.push(req);
                }
            }
            self.awaiting_committed = still_awaiting;
        }
    }

    /// Handle a snapshot request coming from a lagging replication stream.
    #[tracing::instrument(level = "trace", skip(self, tx))]
    async fn handle_needs_snapshot(
        &mut self,
        target: NodeId,
        tx: tokio::sync::oneshot::Sender<crate::storage::Snapshot<S::SnapshotData>>,
    ) -> anyhow::Result<()> {
        let _ = target;
        let snapshot = self.core.storage.do_log_compaction().await?;
        let _ = tx.send(snapshot);
        Ok(())
    }
}

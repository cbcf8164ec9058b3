use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio::time::Duration;
use tracing::Instrument;

use crate::core::CandidateState;
use crate::core::RaftCore;
use crate::core::State;
use crate::core::UpdateCurrentLeader;
use crate::error::RaftResult;
use crate::raft::VoteRequest;
use crate::raft::VoteResponse;
use crate::AppData;
use crate::AppDataResponse;
use crate::MessageSummary;
use crate::NodeId;
use crate::RaftNetwork;
use crate::RaftStorage;
use crate::Update;

impl<D: AppData, R: AppDataResponse, N: RaftNetwork<D>, S: RaftStorage<D, R>> RaftCore<D, R, N, S> {
    /// Handle a vote (RequestVote) RPC coming from a peer node (§5.2, §5.4).
    #[tracing::instrument(level = "debug", skip(self, req), fields(req=%req.summary()))]
    pub(super) async fn handle_vote_request(&mut self, req: VoteRequest) -> RaftResult<VoteResponse> {
        // If candidate's current term is less than this nodes current term, reject.
        if req.term < self.current_term {
            tracing::debug!(%self.current_term, req_term=req.term, "req.term < current_term");
            return Ok(VoteResponse {
                term: self.current_term,
                vote_granted: false,
            });
        }

        // Do not respond to the request if this node believes the current leader to be alive,
        // based on the recently received heartbeat from a leader. This gives us a resilience
        // against network partitions and rogue/restarted candidates.
        if let Some(inst) = &self.next_election_timeout {
            if *inst >= tokio::time::Instant::now() && self.current_leader.is_some() {
                tracing::debug!("rejecting vote request received while this node believes a leader is still alive");
                return Ok(VoteResponse {
                    term: self.current_term,
                    vote_granted: false,
                });
            }
        }

        if req.term > self.current_term {
            self.update_current_term(req.term, None);
            self.update_current_leader(UpdateCurrentLeader::Unknown);
            self.save_hard_state().await?;
            self.report_metrics(Update::Ignore);
        }

        // Check if candidate's log is at least as up-to-date as this node's log (§5.4.1).
        let client_is_up_to_date = req.last_log_term > self.last_log_id.term
            || (req.last_log_term == self.last_log_id.term && req.last_log_index >= self.last_log_id.index);

        if !client_is_up_to_date {
            tracing::debug!("rejecting vote request as candidate's log is not up-to-date");
            return Ok(VoteResponse {
                term: self.current_term,
                vote_granted: false,
            });
        }

        // Candidate's log is up-to-date, and this node has not voted for anyone else this term.
        match &self.voted_for {
            Some(candidate_id) if candidate_id != &req.candidate_id => Ok(VoteResponse {
                term: self.current_term,
                vote_granted: false,
            }),
            _ => {
                self.voted_for = Some(req.candidate_id);
                self.set_target_state(State::Follower);
                self.update_next_election_timeout(true);
                self.save_hard_state().await?;
                Ok(VoteResponse {
                    term: self.current_term,
                    vote_granted: true,
                })
            }
        }
    }
}

impl<'a, D: AppData, R: AppDataResponse, N: RaftNetwork<D>, S: RaftStorage<D, R>> CandidateState<'a, D, R, N, S> {
    /// Send a RequestVote RPC to all voting members of the cluster in parallel, returning a
    /// channel over which responses (along with the responding peer's ID) are delivered.
    #[tracing::instrument(level = "trace", skip(self))]
    pub(super) fn spawn_parallel_vote_requests(&self) -> mpsc::Receiver<(RaftResult<VoteResponse>, NodeId)> {
        let all_members = self.core.membership.all_nodes();
        let (tx, rx) = mpsc::channel(all_members.len());

        for member in all_members.into_iter().filter(|member| member != &self.core.id) {
            let rpc = VoteRequest::new(
                self.core.current_term,
                self.core.id,
                self.core.last_log_id.index,
                self.core.last_log_id.term,
            );
            let (network, tx_inner) = (self.core.network.clone(), tx.clone());
            let ttl = Duration::from_millis(self.core.config.election_timeout_min);

            let _ = tokio::spawn(
                async move {
                    let res = match timeout(ttl, network.send_vote(member, rpc)).await {
                        Ok(Ok(res)) => Ok(res),
                        Ok(Err(err)) => Err(crate::error::RaftError::RaftNetwork(err)),
                        Err(_) => Err(crate::error::RaftError::RaftNetwork(anyhow::anyhow!(
                            "timeout waiting for vote response from peer {}",
                            member
                        ))),
                    };
                    let _ = tx_inner.send((res, member)).await;
                }
                .instrument(tracing::debug_span!("spawn")),
            );
        }

        rx
    }

    /// Handle the response to a vote request which was spawned onto a separate task.
    #[tracing::instrument(level = "trace", skip(self, res))]
    pub(super) async fn handle_vote_response(
        &mut self,
        res: RaftResult<VoteResponse>,
        target: NodeId,
    ) -> RaftResult<()> {
        let res = match res {
            Ok(res) => res,
            Err(err) => {
                tracing::error!({error=%err, target}, "error while requesting vote from peer");
                return Ok(());
            }
        };

        // If peer's term is greater than our own, revert to follower and abort this vote.
        if res.term > self.core.current_term {
            self.core.update_current_term(res.term, None);
            self.core.update_current_leader(UpdateCurrentLeader::Unknown);
            self.core.save_hard_state().await?;
            self.core.set_target_state(State::Follower);
            self.core.report_metrics(Update::Ignore);
            return Ok(());
        }

        if !res.vote_granted {
            return Ok(());
        }

        // Increment votes for the appropriate config group(s).
        let is_in_old = self.core.membership.members.contains(&target);
        if is_in_old {
            self.votes_granted_old += 1;
        }
        let is_in_new = self
            .core
            .membership
            .members_after_consensus
            .as_ref()
            .map(|m| m.contains(&target))
            .unwrap_or(false);
        if is_in_new {
            self.votes_granted_new += 1;
        }

        // Determine if we've won the election for both config groups (new group may be absent).
        let won_old = self.votes_granted_old >= self.votes_needed_old;
        let won_new = self.votes_needed_new == 0 || self.votes_granted_new >= self.votes_needed_new;

        if won_old && won_new {
            tracing::debug!({id=self.core.id, term=self.core.current_term}, "node has become the leader");
            self.core.set_target_state(State::Leader);
        }

        Ok(())
    }
}

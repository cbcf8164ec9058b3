//! gRPC service implementations: the client-facing `Messages` service (spec §6) and the
//! inter-node `Consensus` transport that carries the engine's own RPCs as opaque bytes.

use std::sync::Arc;

use raft::raft::AppendEntriesRequest;
use raft::raft::InstallSnapshotRequest;
use raft::raft::VoteRequest;
use tonic::Request;
use tonic::Response;
use tonic::Status;

use crate::binder::Binder;
use crate::proto;

fn decode_err(what: &str, e: impl std::fmt::Display) -> Status {
    Status::invalid_argument(format!("malformed {what}: {e}"))
}

fn encode_err(what: &str, e: impl std::fmt::Display) -> Status {
    Status::internal(format!("failed to encode {what}: {e}"))
}

impl From<repository::Message> for proto::Message {
    fn from(m: repository::Message) -> Self {
        proto::Message {
            id: m.id as u32,
            user_id: m.user_id as u32,
            create_time: m.create_time,
            value: m.value,
            file_name: m.file_name,
            file_id: m.file_id,
        }
    }
}

/// `Messages`: the client-facing API.
pub struct MessagesService {
    binder: Arc<Binder>,
}

impl MessagesService {
    pub fn new(binder: Arc<Binder>) -> Self {
        Self { binder }
    }
}

#[tonic::async_trait]
impl proto::messages_server::Messages for MessagesService {
    async fn save_message(
        &self,
        request: Request<proto::SaveMessageRequest>,
    ) -> Result<Response<proto::SaveMessageResponse>, Status> {
        let req = request.into_inner();
        let message = self
            .binder
            .save_message(req.user_id as u64, req.value, req.file_name, req.file_id)
            .await?;
        Ok(Response::new(proto::SaveMessageResponse {
            message: Some(message.into()),
        }))
    }

    async fn read_user_messages(
        &self,
        request: Request<proto::ReadUserMessagesRequest>,
    ) -> Result<Response<proto::ReadUserMessagesResponse>, Status> {
        let req = request.into_inner();
        let (page, is_last_page) = self
            .binder
            .read_user_messages(req.user_id as u64, req.offset as u64, req.limit as u64, req.asc)
            .await?;
        Ok(Response::new(proto::ReadUserMessagesResponse {
            messages: page.into_iter().map(Into::into).collect(),
            is_last_page,
        }))
    }

    async fn get_servers(
        &self,
        _request: Request<proto::GetServersRequest>,
    ) -> Result<Response<proto::GetServersResponse>, Status> {
        let servers = self
            .binder
            .get_servers()
            .into_iter()
            .map(|(id, consensus_addr, is_leader)| proto::Server {
                id: id.to_string(),
                consensus_addr,
                is_leader,
            })
            .collect();
        Ok(Response::new(proto::GetServersResponse { servers }))
    }
}

/// `Consensus`: carries the engine's own bincode-serialized RPCs between nodes as opaque bytes.
pub struct ConsensusService {
    binder: Arc<Binder>,
}

impl ConsensusService {
    pub fn new(binder: Arc<Binder>) -> Self {
        Self { binder }
    }
}

#[tonic::async_trait]
impl proto::consensus_server::Consensus for ConsensusService {
    async fn append_entries(
        &self,
        request: Request<proto::AppendEntriesEnvelope>,
    ) -> Result<Response<proto::AppendEntriesReply>, Status> {
        let envelope = request.into_inner();
        let rpc: AppendEntriesRequest<storage::ProposeMessage> =
            bincode::deserialize(&envelope.payload).map_err(|e| decode_err("AppendEntriesRequest", e))?;

        let resp = self.binder.raft().append_entries(rpc).await.map_err(|e| Status::internal(e.to_string()))?;
        let payload = bincode::serialize(&resp).map_err(|e| encode_err("AppendEntriesResponse", e))?;
        Ok(Response::new(proto::AppendEntriesReply { payload }))
    }

    async fn request_vote(
        &self,
        request: Request<proto::VoteEnvelope>,
    ) -> Result<Response<proto::VoteReply>, Status> {
        let envelope = request.into_inner();
        let rpc: VoteRequest = bincode::deserialize(&envelope.payload).map_err(|e| decode_err("VoteRequest", e))?;

        let resp = self.binder.raft().vote(rpc).await.map_err(|e| Status::internal(e.to_string()))?;
        let payload = bincode::serialize(&resp).map_err(|e| encode_err("VoteResponse", e))?;
        Ok(Response::new(proto::VoteReply { payload }))
    }

    async fn install_snapshot(
        &self,
        request: Request<proto::InstallSnapshotEnvelope>,
    ) -> Result<Response<proto::InstallSnapshotReply>, Status> {
        let envelope = request.into_inner();
        let rpc: InstallSnapshotRequest =
            bincode::deserialize(&envelope.payload).map_err(|e| decode_err("InstallSnapshotRequest", e))?;

        let resp = self.binder.raft().install_snapshot(rpc).await.map_err(|e| Status::internal(e.to_string()))?;
        let payload = bincode::serialize(&resp).map_err(|e| encode_err("InstallSnapshotResponse", e))?;
        Ok(Response::new(proto::InstallSnapshotReply { payload }))
    }
}

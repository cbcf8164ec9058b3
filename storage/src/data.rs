//! Application data types proposed through the consensus engine.

use raft::AppData;
use raft::AppDataResponse;
use repository::Message;
use serde::Deserialize;
use serde::Serialize;

/// A message proposal, as built by the leader before calling `client_write`.
///
/// `create_time` is stamped by the leader at proposal time (an explicit RFC3339 string, not the
/// original implementation's free-form wall-clock rendering — see the "create_time format" open
/// question) so that every replica applies the same value regardless of when it processes the
/// entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposeMessage {
    pub user_id: u64,
    pub create_time: String,
    pub value: Vec<u8>,
    pub file_name: String,
    pub file_id: String,
}

impl AppData for ProposeMessage {}

/// The result of applying a `ProposeMessage` to the state machine: the stored row, including the
/// repository-assigned `id` and the `(log_index, log_term)` pair that produced it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: Message,
}

impl AppDataResponse for MessageResponse {}

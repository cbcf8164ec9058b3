//! The message record persisted by the repository.

use serde::Deserialize;
use serde::Serialize;

/// A single message applied to the state machine.
///
/// `id` is assigned by the repository on insert (the row's local auto-increment key); `log_index`
/// and `log_term` identify the log entry that produced this row and are what the applier's
/// idempotency check keys on. Immutable once written.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub user_id: u64,
    pub create_time: String,
    pub value: Vec<u8>,
    pub file_name: String,
    pub file_id: String,
    pub log_index: u64,
    pub log_term: u64,
}

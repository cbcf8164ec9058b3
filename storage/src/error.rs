//! Error taxonomy for the durable stores.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("(de)serialization error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt state on startup: {0}")]
    CorruptState(String),

    #[error("log entry not found at index {0}")]
    NotFound(u64),
}

pub type Result<T> = std::result::Result<T, StoreError>;

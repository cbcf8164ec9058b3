//! Error taxonomy for the message repository.

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("message not found")]
    NotFound,

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

//! Error types for the outbox.

use mutsync_codec::CodecError;
use mutsync_storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur in the outbox.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// The durable store rejected a read or write.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StorageError),

    /// The mutation could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A record with this mutation ID is already pending.
    #[error("mutation {0} is already pending")]
    DuplicateMutation(Uuid),

    /// A blocking storage worker panicked or was cancelled.
    #[error("storage worker failed: {0}")]
    WorkerFailed(String),
}

impl OutboxError {
    /// Creates a corruption error for a log that fails its integrity checks.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Persistence(StorageError::corrupted(message))
    }

    /// Returns true if the error came from the durable store.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

impl From<tokio::task::JoinError> for OutboxError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::WorkerFailed(err.to_string())
    }
}

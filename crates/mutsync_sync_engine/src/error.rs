//! Error types for the sync engine.

use crate::adapter::AdapterError;
use mutsync_codec::CodecError;
use mutsync_outbox::OutboxError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The outbox failed to persist, read, or remove an entry.
    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The local storage adapter rejected a call.
    #[error("local storage error: {0}")]
    Adapter(#[from] AdapterError),

    /// `start` was called while the engine was running.
    #[error("sync engine is already running")]
    AlreadyRunning,

    /// A remote call exceeded its time limit.
    #[error("operation timed out")]
    Timeout,

    /// The local storage change feed failed or ended.
    #[error("local storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}

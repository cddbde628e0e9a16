//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding mutation records.
///
/// None of these are retryable: each one points at a programming error or at
/// data corruption, and retrying would either fail forever or lose data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The record names a model type that is not registered.
    #[error("unknown model type: {model_type}")]
    UnknownModelType {
        /// The unrecognized type name.
        model_type: String,
    },

    /// The record bytes or its payload could not be interpreted.
    #[error("corrupt record: {message}")]
    CorruptRecord {
        /// Description of what was wrong.
        message: String,
    },

    /// A model could not be serialized.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },
}

impl CodecError {
    /// Creates an unknown model type error.
    pub fn unknown_model_type(model_type: impl Into<String>) -> Self {
        Self::UnknownModelType {
            model_type: model_type.into(),
        }
    }

    /// Creates a corrupt record error.
    pub fn corrupt_record(message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            message: message.into(),
        }
    }

    /// Creates an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Codec failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

//! Storage errors.

use notary_authority::GateError;
use notary_log::LogError;
use notary_queue::QueueError;

/// Storage result type
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage error type
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// redb failure
    #[error("Database error: {0}")]
    Database(#[from] redb::Error),

    /// Stored bytes did not decode, or a value did not encode
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Blocking task panicked or was cancelled
    #[error("Storage task failed: {reason}")]
    Task {
        /// Join failure message
        reason: String,
    },
}

/// Convert any redb error into a storage error
pub(crate) fn db_err<E: Into<redb::Error>>(err: E) -> StorageError {
    StorageError::Database(err.into())
}

impl From<StorageError> for LogError {
    fn from(err: StorageError) -> Self {
        LogError::Storage {
            reason: err.to_string(),
        }
    }
}

impl From<StorageError> for QueueError {
    fn from(err: StorageError) -> Self {
        QueueError::Storage {
            reason: err.to_string(),
        }
    }
}

impl From<StorageError> for GateError {
    fn from(err: StorageError) -> Self {
        GateError::Storage {
            reason: err.to_string(),
        }
    }
}

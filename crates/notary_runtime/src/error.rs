//! Runtime errors.

use crate::provider::ProviderError;
use notary_authority::GateError;
use notary_log::LogError;
use notary_queue::QueueError;

/// Runtime result type
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Runtime error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// Event log failure
    #[error(transparent)]
    Log(#[from] LogError),

    /// Job queue failure
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Flag store failure
    #[error(transparent)]
    Gate(#[from] GateError),

    /// Provider failure
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {reason}")]
    Config {
        /// What was wrong
        reason: String,
    },
}

impl RuntimeError {
    /// Shorthand for a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

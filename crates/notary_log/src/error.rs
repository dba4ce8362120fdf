//! Event log errors.

use notary_core::EntityId;

/// Event log result type
pub type LogResult<T> = Result<T, LogError>;

/// Event log error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    /// No log exists for the entity
    #[error("Entity not found: {entity_id}")]
    EntityNotFound {
        /// Requested entity
        entity_id: EntityId,
    },

    /// Another writer appended first
    #[error("Concurrent append conflict on {entity_id}: expected version {expected}, found {actual}")]
    ConcurrentAppendConflict {
        /// Entity being appended to
        entity_id: EntityId,
        /// Version the caller read
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// The event failed append validation
    #[error("Event rejected: {reason}")]
    Rejected {
        /// Validation message
        reason: String,
    },

    /// An entity with this id is already registered
    #[error("Entity already exists: {entity_id}")]
    AlreadyExists {
        /// Conflicting entity
        entity_id: EntityId,
    },

    /// Backend failure
    #[error("Storage error: {reason}")]
    Storage {
        /// Backend message
        reason: String,
    },
}

impl LogError {
    /// Whether re-reading and retrying can succeed
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentAppendConflict { .. })
    }

    /// Shorthand for a validation rejection
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_retryable() {
        let err = LogError::ConcurrentAppendConflict {
            entity_id: EntityId::new(),
            expected: 2,
            actual: 3,
        };
        assert!(err.is_conflict());
        assert!(!LogError::rejected("bad").is_conflict());
    }

    #[test]
    fn test_rejected_display() {
        assert_eq!(
            LogError::rejected("missing token").to_string(),
            "Event rejected: missing token"
        );
    }
}

//! Job queue errors.

use crate::job::DedupeKey;
use notary_core::{JobId, WorkerId};

/// Queue result type
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// A non-terminal job with the same dedupe key exists
    #[error("Duplicate job insert: {dedupe_key} already has an active job")]
    DuplicateJobInsert {
        /// Conflicting key
        dedupe_key: DedupeKey,
    },

    /// Another worker claimed the job first
    #[error("Claim lost on job {job_id}")]
    ClaimLost {
        /// Contested job
        job_id: JobId,
    },

    /// The caller no longer holds the lease
    #[error("Lease expired on job {job_id} for worker {worker_id}")]
    LeaseExpired {
        /// Job whose lease was lost
        job_id: JobId,
        /// Worker that lost it
        worker_id: WorkerId,
    },

    /// Unknown job
    #[error("Job not found: {job_id}")]
    NotFound {
        /// Requested job
        job_id: JobId,
    },

    /// Backend failure
    #[error("Storage error: {reason}")]
    Storage {
        /// Backend message
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use notary_core::EntityId;
    use crate::job::JobType;

    #[test]
    fn test_duplicate_display_names_key() {
        let entity = EntityId::new();
        let err = QueueError::DuplicateJobInsert {
            dedupe_key: DedupeKey::new(entity, JobType::RunTimestamp),
        };
        assert!(err.to_string().contains(&format!("{}:run_timestamp", entity)));
    }
}

//! The job queue contract shared by every backend.

use crate::error::QueueResult;
use crate::job::{DedupeKey, Job, JobRun, JobStatus, NewJob};
use async_trait::async_trait;
use indexmap::IndexMap;
use notary_core::{EntityId, JobId, Timestamp, WorkerId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of jobs per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Waiting jobs
    pub queued: usize,
    /// Leased jobs
    pub running: usize,
    /// Finished jobs
    pub succeeded: usize,
    /// Failed jobs
    pub failed: usize,
}

impl QueueCounts {
    /// Tally a slice of jobs
    #[must_use]
    pub fn tally(jobs: &[Job]) -> Self {
        let mut counts = Self::default();
        for job in jobs {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Succeeded => counts.succeeded += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// Job queue with a dedupe-key uniqueness constraint and leased claims.
///
/// Every operation is atomic with respect to every other operation.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert a queued job
    ///
    /// # Errors
    ///
    /// Returns `DuplicateJobInsert` if a non-terminal job with the same
    /// dedupe key exists
    async fn insert(&self, job: NewJob, now: Timestamp) -> QueueResult<Job>;

    /// Claim the oldest claimable job: queued, or running with an expired
    /// lease. A reclaim closes the previous holder's run as `reclaimed`.
    /// Opens a run for `worker`.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails
    async fn claim_next(
        &self,
        worker: &WorkerId,
        now: Timestamp,
        lease: Duration,
    ) -> QueueResult<Option<Job>>;

    /// Claim one specific job
    ///
    /// # Errors
    ///
    /// Returns `ClaimLost` if the job is not claimable, `NotFound` if unknown
    async fn claim(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        now: Timestamp,
        lease: Duration,
    ) -> QueueResult<Job>;

    /// Extend the lease held by `worker`
    ///
    /// # Errors
    ///
    /// Returns `LeaseExpired` if `worker` no longer holds the lease
    async fn heartbeat(&self, job_id: JobId, worker: &WorkerId, now: Timestamp) -> QueueResult<()>;

    /// Mark the job succeeded and close the run
    ///
    /// # Errors
    ///
    /// Returns `LeaseExpired` if `worker` no longer holds the lease
    async fn complete(&self, job_id: JobId, worker: &WorkerId, now: Timestamp) -> QueueResult<Job>;

    /// Mark the job failed with `error` and close the run
    ///
    /// # Errors
    ///
    /// Returns `LeaseExpired` if `worker` no longer holds the lease
    async fn fail(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        error: String,
        now: Timestamp,
    ) -> QueueResult<Job>;

    /// Fetch one job
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids
    async fn get(&self, job_id: JobId) -> QueueResult<Job>;

    /// The non-terminal job holding `key`, if any
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails
    async fn find_active(&self, key: &DedupeKey) -> QueueResult<Option<Job>>;

    /// Every job ever inserted under `key`, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails
    async fn history(&self, key: &DedupeKey) -> QueueResult<Vec<Job>>;

    /// Every job of an entity, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails
    async fn jobs_for_entity(&self, entity_id: EntityId) -> QueueResult<Vec<Job>>;

    /// Every job, optionally filtered by status, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails
    async fn list(&self, status: Option<JobStatus>) -> QueueResult<Vec<Job>>;

    /// Execution attempts of a job, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails
    async fn runs(&self, job_id: JobId) -> QueueResult<Vec<JobRun>>;

    /// Jobs per status
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails
    async fn counts(&self) -> QueueResult<QueueCounts> {
        Ok(QueueCounts::tally(&self.list(None).await?))
    }

    /// The newest job of every dedupe key whose newest job failed,
    /// oldest key first
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails
    async fn latest_failures(&self) -> QueueResult<Vec<Job>> {
        let mut newest: IndexMap<DedupeKey, Job> = IndexMap::new();
        for job in self.list(None).await? {
            newest.insert(job.dedupe_key.clone(), job);
        }
        Ok(newest
            .into_values()
            .filter(|j| j.status == JobStatus::Failed)
            .collect())
    }
}

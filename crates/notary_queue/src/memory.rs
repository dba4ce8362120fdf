//! In-memory job queue.

use crate::error::{QueueError, QueueResult};
use crate::job::{close_open_run, DedupeKey, Job, JobRun, JobStatus, NewJob, RunOutcome};
use crate::queue::JobQueue;
use async_trait::async_trait;
use indexmap::IndexMap;
use notary_core::{EntityId, JobId, Timestamp, WorkerId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct QueueState {
    jobs: IndexMap<JobId, Job>,
    active: HashMap<DedupeKey, JobId>,
    /// Non-terminal jobs by (available_at ms, insert position)
    claimable: BTreeMap<(i64, usize), JobId>,
    runs: HashMap<JobId, Vec<JobRun>>,
}

impl QueueState {
    /// Apply `f` to a job and move its claimable index entry along
    fn update<T>(
        &mut self,
        job_id: JobId,
        f: impl FnOnce(&mut Job) -> QueueResult<T>,
    ) -> QueueResult<(T, Job)> {
        let (seq, _, job) = self
            .jobs
            .get_full_mut(&job_id)
            .ok_or(QueueError::NotFound { job_id })?;
        let before = job.available_at();
        let out = f(job)?;
        let after = job.available_at();
        if before != after {
            if let Some(at) = before {
                self.claimable.remove(&(at.as_millis(), seq));
            }
            if let Some(at) = after {
                self.claimable.insert((at.as_millis(), seq), job_id);
            }
        }
        Ok((out, job.clone()))
    }

    fn lease(
        &mut self,
        job_id: JobId,
        worker: &WorkerId,
        now: Timestamp,
        lease: Duration,
    ) -> QueueResult<Job> {
        let (previous, snapshot) =
            self.update(job_id, |job| Ok(job.take_lease(worker, now, lease)))?;

        let runs = self.runs.entry(job_id).or_default();
        if let Some(prev) = previous {
            warn!(%job_id, previous = %prev, worker_id = %worker, "reclaimed expired lease");
            close_open_run(runs, &prev, RunOutcome::Reclaimed, now);
        }
        runs.push(JobRun::start(&snapshot, worker, now));
        Ok(snapshot)
    }

    fn finish(
        &mut self,
        job_id: JobId,
        worker: &WorkerId,
        status: JobStatus,
        error: Option<String>,
        now: Timestamp,
    ) -> QueueResult<Job> {
        let outcome = match &error {
            Some(e) => RunOutcome::Failed { error: e.clone() },
            None => RunOutcome::Succeeded,
        };
        let ((), snapshot) = self.update(job_id, |job| job.finish(worker, status, error, now))?;

        if self.active.get(&snapshot.dedupe_key) == Some(&job_id) {
            self.active.remove(&snapshot.dedupe_key);
        }
        if let Some(runs) = self.runs.get_mut(&job_id) {
            close_open_run(runs, worker, outcome, now);
        }
        Ok(snapshot)
    }
}

/// Job queue held in process memory. Each operation runs under one lock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryJobQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn insert(&self, new: NewJob, now: Timestamp) -> QueueResult<Job> {
        let mut state = self.state.lock().await;
        let key = new.dedupe_key();
        if state.active.contains_key(&key) {
            return Err(QueueError::DuplicateJobInsert { dedupe_key: key });
        }
        let job = new.into_job(now);
        state.active.insert(key, job.id);
        let (seq, _) = state.jobs.insert_full(job.id, job.clone());
        state
            .claimable
            .insert((job.created_at.as_millis(), seq), job.id);
        debug!(job_id = %job.id, dedupe_key = %job.dedupe_key, "job inserted");
        Ok(job)
    }

    async fn claim_next(
        &self,
        worker: &WorkerId,
        now: Timestamp,
        lease: Duration,
    ) -> QueueResult<Option<Job>> {
        let mut state = self.state.lock().await;
        let next = state
            .claimable
            .range(..=(now.as_millis(), usize::MAX))
            .next()
            .map(|(_, id)| *id);
        match next {
            Some(job_id) => state.lease(job_id, worker, now, lease).map(Some),
            None => Ok(None),
        }
    }

    async fn claim(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        now: Timestamp,
        lease: Duration,
    ) -> QueueResult<Job> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get(&job_id)
            .ok_or(QueueError::NotFound { job_id })?;
        if !job.is_claimable(now) {
            return Err(QueueError::ClaimLost { job_id });
        }
        state.lease(job_id, worker, now, lease)
    }

    async fn heartbeat(&self, job_id: JobId, worker: &WorkerId, now: Timestamp) -> QueueResult<()> {
        self.state
            .lock()
            .await
            .update(job_id, |job| job.renew_lease(worker, now))
            .map(|((), _)| ())
    }

    async fn complete(&self, job_id: JobId, worker: &WorkerId, now: Timestamp) -> QueueResult<Job> {
        self.state
            .lock()
            .await
            .finish(job_id, worker, JobStatus::Succeeded, None, now)
    }

    async fn fail(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        error: String,
        now: Timestamp,
    ) -> QueueResult<Job> {
        self.state
            .lock()
            .await
            .finish(job_id, worker, JobStatus::Failed, Some(error), now)
    }

    async fn get(&self, job_id: JobId) -> QueueResult<Job> {
        self.state
            .lock()
            .await
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(QueueError::NotFound { job_id })
    }

    async fn find_active(&self, key: &DedupeKey) -> QueueResult<Option<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .active
            .get(key)
            .and_then(|id| state.jobs.get(id))
            .cloned())
    }

    async fn history(&self, key: &DedupeKey) -> QueueResult<Vec<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| &j.dedupe_key == key)
            .cloned()
            .collect())
    }

    async fn jobs_for_entity(&self, entity_id: EntityId) -> QueueResult<Vec<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn list(&self, status: Option<JobStatus>) -> QueueResult<Vec<Job>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect())
    }

    async fn runs(&self, job_id: JobId) -> QueueResult<Vec<JobRun>> {
        Ok(self
            .state
            .lock()
            .await
            .runs
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }
}

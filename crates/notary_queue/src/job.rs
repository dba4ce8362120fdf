//! Job records and their state transitions.
//!
//! Both queue backends apply the same transitions; only the atomicity
//! mechanism differs.

use crate::error::{QueueError, QueueResult};
use notary_authority::{AnchorNetwork, DecisionId};
use notary_core::{EntityId, JobId, Timestamp, WorkerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Closed set of job types, one per decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Obtain a trusted timestamp
    RunTimestamp,
    /// Anchor on Polygon
    SubmitAnchorPolygon,
    /// Anchor on Bitcoin
    SubmitAnchorBitcoin,
    /// Build the certificate artifact
    BuildArtifact,
}

impl JobType {
    /// Every job type
    pub const ALL: [JobType; 4] = [
        Self::RunTimestamp,
        Self::SubmitAnchorPolygon,
        Self::SubmitAnchorBitcoin,
        Self::BuildArtifact,
    ];

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunTimestamp => "run_timestamp",
            Self::SubmitAnchorPolygon => "submit_anchor_polygon",
            Self::SubmitAnchorBitcoin => "submit_anchor_bitcoin",
            Self::BuildArtifact => "build_artifact",
        }
    }

    /// Decision this job type executes
    #[must_use]
    pub const fn decision(self) -> DecisionId {
        match self {
            Self::RunTimestamp => DecisionId::RunTimestamp,
            Self::SubmitAnchorPolygon => DecisionId::SubmitAnchor(AnchorNetwork::Polygon),
            Self::SubmitAnchorBitcoin => DecisionId::SubmitAnchor(AnchorNetwork::Bitcoin),
            Self::BuildArtifact => DecisionId::BuildArtifact,
        }
    }
}

impl From<DecisionId> for JobType {
    fn from(decision: DecisionId) -> Self {
        match decision {
            DecisionId::RunTimestamp => Self::RunTimestamp,
            DecisionId::SubmitAnchor(AnchorNetwork::Polygon) => Self::SubmitAnchorPolygon,
            DecisionId::SubmitAnchor(AnchorNetwork::Bitcoin) => Self::SubmitAnchorBitcoin,
            DecisionId::BuildArtifact => Self::BuildArtifact,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown job type '{}'", s))
    }
}

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker
    Queued,
    /// Claimed under a lease
    Running,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
}

impl JobStatus {
    /// Terminal jobs never change again
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// `<entity_id>:<job_type>`, unique among non-terminal jobs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupeKey(String);

impl DedupeKey {
    /// Key for an entity and job type
    #[must_use]
    pub fn new(entity_id: EntityId, job_type: JobType) -> Self {
        Self(format!("{}:{}", entity_id, job_type.as_str()))
    }

    /// Get as string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A job to insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    /// Job type
    pub job_type: JobType,
    /// Target entity
    pub entity_id: EntityId,
    /// Handler input
    pub payload: Value,
    /// Attempt number, starting at 1
    pub attempt: u32,
}

impl NewJob {
    /// First attempt with an empty payload
    #[must_use]
    pub fn new(job_type: JobType, entity_id: EntityId) -> Self {
        Self {
            job_type,
            entity_id,
            payload: Value::Object(serde_json::Map::new()),
            attempt: 1,
        }
    }

    /// Set the payload
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the attempt number
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt.max(1);
        self
    }

    /// Dedupe key of the job
    #[must_use]
    pub fn dedupe_key(&self) -> DedupeKey {
        DedupeKey::new(self.entity_id, self.job_type)
    }

    /// Materialize as a queued job
    #[must_use]
    pub fn into_job(self, now: Timestamp) -> Job {
        Job {
            id: JobId::new(),
            dedupe_key: self.dedupe_key(),
            job_type: self.job_type,
            entity_id: self.entity_id,
            payload: self.payload,
            status: JobStatus::Queued,
            locked_by: None,
            locked_at: None,
            lease_expires_at: None,
            attempt: self.attempt,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A queued unit of side-effect work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job id
    pub id: JobId,
    /// Job type
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Target entity
    pub entity_id: EntityId,
    /// Handler input
    pub payload: Value,
    /// Current status
    pub status: JobStatus,
    /// Dedupe key
    pub dedupe_key: DedupeKey,
    /// Current lease holder
    pub locked_by: Option<WorkerId>,
    /// Lease start or last heartbeat
    pub locked_at: Option<Timestamp>,
    /// When the current lease runs out
    #[serde(default)]
    pub lease_expires_at: Option<Timestamp>,
    /// Attempt number, starting at 1
    pub attempt: u32,
    /// Error of the failed attempt
    pub last_error: Option<String>,
    /// Insert time
    pub created_at: Timestamp,
    /// Last transition time
    pub updated_at: Timestamp,
}

impl Job {
    /// Whether the lease has run out at `now`
    #[must_use]
    pub fn lease_expired(&self, now: Timestamp) -> bool {
        match self.lease_expires_at.or(self.locked_at) {
            Some(expires) => expires <= now,
            None => true,
        }
    }

    /// Earliest time a worker may claim the job: insert time while
    /// queued, lease expiry while running, never once terminal
    #[must_use]
    pub fn available_at(&self) -> Option<Timestamp> {
        match self.status {
            JobStatus::Queued => Some(self.created_at),
            JobStatus::Running => Some(
                self.lease_expires_at
                    .or(self.locked_at)
                    .unwrap_or(self.updated_at),
            ),
            JobStatus::Succeeded | JobStatus::Failed => None,
        }
    }

    /// Queued, or running under an expired lease
    #[must_use]
    pub fn is_claimable(&self, now: Timestamp) -> bool {
        self.available_at().is_some_and(|at| at <= now)
    }

    /// Take a lease of length `lease` for `worker`. Returns the previous
    /// holder when an expired lease is being reclaimed.
    pub fn take_lease(&mut self, worker: &WorkerId, now: Timestamp, lease: Duration) -> Option<WorkerId> {
        let previous = match self.status {
            JobStatus::Running => self.locked_by.take(),
            _ => None,
        };
        self.status = JobStatus::Running;
        self.locked_by = Some(worker.clone());
        self.locked_at = Some(now);
        self.lease_expires_at = Some(now.plus(lease));
        self.updated_at = now;
        previous
    }

    /// Check that `worker` holds an unexpired lease at `now`
    ///
    /// # Errors
    ///
    /// Returns `LeaseExpired` if the job is not running under `worker`, or
    /// the lease ran out even though nobody has reclaimed it yet
    pub fn check_holder(&self, worker: &WorkerId, now: Timestamp) -> QueueResult<()> {
        if self.status == JobStatus::Running
            && self.locked_by.as_ref() == Some(worker)
            && !self.lease_expired(now)
        {
            Ok(())
        } else {
            Err(QueueError::LeaseExpired {
                job_id: self.id,
                worker_id: worker.clone(),
            })
        }
    }

    /// Extend the lease by its original length from `now`
    ///
    /// # Errors
    ///
    /// Returns `LeaseExpired` if `worker` no longer holds it
    pub fn renew_lease(&mut self, worker: &WorkerId, now: Timestamp) -> QueueResult<()> {
        self.check_holder(worker, now)?;
        let length = match (self.lease_expires_at, self.locked_at) {
            (Some(expires), Some(locked)) => expires.duration_since(&locked),
            _ => Duration::ZERO,
        };
        self.locked_at = Some(now);
        self.lease_expires_at = Some(now.plus(length));
        self.updated_at = now;
        Ok(())
    }

    /// Move to a terminal status and release the lease
    ///
    /// # Errors
    ///
    /// Returns `LeaseExpired` if `worker` no longer holds it
    pub fn finish(
        &mut self,
        worker: &WorkerId,
        status: JobStatus,
        error: Option<String>,
        now: Timestamp,
    ) -> QueueResult<()> {
        self.check_holder(worker, now)?;
        self.status = status;
        self.last_error = error;
        self.locked_by = None;
        self.locked_at = None;
        self.lease_expires_at = None;
        self.updated_at = now;
        Ok(())
    }
}

/// How an execution attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Completed
    Succeeded,
    /// Failed with an error
    Failed {
        /// Error message
        error: String,
    },
    /// Lease expired and another worker took over
    Reclaimed,
}

/// One execution attempt of a job by one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
    /// Job executed
    pub job_id: JobId,
    /// Job attempt number
    pub attempt: u32,
    /// Worker that held the lease
    pub worker_id: WorkerId,
    /// Claim time
    pub started_at: Timestamp,
    /// End time, `None` while running
    pub finished_at: Option<Timestamp>,
    /// End state, `None` while running
    pub outcome: Option<RunOutcome>,
}

impl JobRun {
    /// Open a run for a freshly claimed job
    #[must_use]
    pub fn start(job: &Job, worker: &WorkerId, now: Timestamp) -> Self {
        Self {
            job_id: job.id,
            attempt: job.attempt,
            worker_id: worker.clone(),
            started_at: now,
            finished_at: None,
            outcome: None,
        }
    }

    /// Whether the run is still open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.outcome.is_none()
    }

    /// Close the run
    pub fn close(&mut self, outcome: RunOutcome, now: Timestamp) {
        self.finished_at = Some(now);
        self.outcome = Some(outcome);
    }
}

/// Close the open run of `worker` in `runs`, if there is one
pub fn close_open_run(runs: &mut [JobRun], worker: &WorkerId, outcome: RunOutcome, now: Timestamp) {
    if let Some(run) = runs
        .iter_mut()
        .rev()
        .find(|r| r.is_open() && &r.worker_id == worker)
    {
        run.close(outcome, now);
    }
}

//! Decision evaluator.
//!
//! Reads a document's log once, asks the rules which decisions are
//! required and queues at most one job per decision. It never calls a
//! provider. Running any number of evaluators concurrently is safe: the
//! queue's dedupe key admits one non-terminal job per decision, and the
//! loser of an insert race just records a skip.

use crate::error::RuntimeResult;
use crate::monitor::PipelineMetrics;
use notary_authority::{decide_all, AuthorityGate, DecisionId, DecisionReason, RULES_VERSION};
use notary_core::{Clock, EntityId, JobId, Timestamp};
use notary_log::EventLog;
use notary_queue::{
    DedupeKey, Job, JobQueue, JobType, NewJob, QueueError, RetryPolicies, RetryVerdict,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Why a decision produced no job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "skip", rename_all = "snake_case")]
pub enum SkipReason {
    /// The rule does not require it
    NotRequired {
        /// Rule explanation
        reason: DecisionReason,
    },
    /// Legacy code owns the decision
    LegacyAuthority,
    /// A non-terminal job already exists
    PendingJob {
        /// The existing job
        job_id: JobId,
    },
    /// The last attempt failed and its backoff has not elapsed
    Backoff {
        /// Earliest retry time
        until: Timestamp,
    },
    /// Retry attempts are used up
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
    /// A concurrent evaluator inserted first
    DuplicateInsert,
}

/// Result of evaluating one entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// Evaluated entity
    pub entity_id: EntityId,
    /// Log version the evaluation read
    pub version: u64,
    /// Rule set version
    pub rules_version: u32,
    /// Jobs queued by this evaluation
    pub inserted: Vec<Job>,
    /// Decisions that produced no job
    pub skipped: Vec<(DecisionId, SkipReason)>,
}

impl EvaluationReport {
    fn new(entity_id: EntityId, version: u64) -> Self {
        Self {
            entity_id,
            version,
            rules_version: RULES_VERSION,
            inserted: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Skip reason recorded for `decision`
    #[must_use]
    pub fn skip_for(&self, decision: DecisionId) -> Option<SkipReason> {
        self.skipped
            .iter()
            .find(|(d, _)| *d == decision)
            .map(|(_, r)| *r)
    }
}

/// Result of a sweep over every entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entities evaluated
    pub entities: usize,
    /// Jobs queued
    pub inserted: usize,
    /// Entities whose evaluation errored
    pub failed: usize,
}

/// Derives required work from logs and queues it
pub struct DecisionEvaluator {
    log: Arc<dyn EventLog>,
    queue: Arc<dyn JobQueue>,
    gate: AuthorityGate,
    retry: RetryPolicies,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
}

impl std::fmt::Debug for DecisionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEvaluator")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl DecisionEvaluator {
    /// Create an evaluator with default retry policies
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        queue: Arc<dyn JobQueue>,
        gate: AuthorityGate,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            log,
            queue,
            gate,
            retry: RetryPolicies::default(),
            clock,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Set retry policies
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicies) -> Self {
        self.retry = retry;
        self
    }

    /// Share a metrics sink
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Metrics sink
    #[must_use]
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Evaluate one entity and queue whatever is required
    ///
    /// # Errors
    ///
    /// Returns error if the log, the flags or the queue cannot be read,
    /// or an insert fails for a reason other than a duplicate
    #[instrument(skip(self), fields(entity_id = %entity_id))]
    pub async fn evaluate(&self, entity_id: EntityId) -> RuntimeResult<EvaluationReport> {
        self.metrics.record_evaluation();
        let entity = self.log.read(entity_id).await?;
        let gate = self.gate.snapshot().await?;
        let now = self.clock.now();
        // Retry history is scoped by the request's log position, not its
        // caller-supplied time.
        let request_index = entity.active_request_index().map(|i| i as u64);

        let mut report = EvaluationReport::new(entity_id, entity.version);

        for decision in decide_all(&entity.events) {
            let id = decision.decision;
            if !decision.required {
                debug!(decision = %id, reason = %decision.reason, "not required");
                report.skipped.push((id, SkipReason::NotRequired {
                    reason: decision.reason,
                }));
                continue;
            }
            if !gate.is_under_canonical_authority(id) {
                debug!(decision = %id, "legacy authority, skipping");
                report.skipped.push((id, SkipReason::LegacyAuthority));
                continue;
            }

            let job_type = JobType::from(id);
            let key = DedupeKey::new(entity_id, job_type);
            if let Some(existing) = self.queue.find_active(&key).await? {
                debug!(decision = %id, job_id = %existing.id, "job already pending");
                report.skipped.push((id, SkipReason::PendingJob {
                    job_id: existing.id,
                }));
                continue;
            }

            // Failures from an earlier request do not count against this one.
            let history: Vec<Job> = self
                .queue
                .history(&key)
                .await?
                .into_iter()
                .filter(|j| job_request_index(j) == request_index)
                .collect();

            let attempt = match self.retry.for_job(job_type).verdict(&history, now) {
                RetryVerdict::Ready { attempt } => attempt,
                RetryVerdict::Backoff { until } => {
                    debug!(decision = %id, until = %until, "in backoff");
                    report.skipped.push((id, SkipReason::Backoff { until }));
                    continue;
                }
                RetryVerdict::Exhausted { attempts } => {
                    warn!(decision = %id, attempts, "retries exhausted, dead-lettered");
                    self.metrics.record_exhausted();
                    report.skipped.push((id, SkipReason::Exhausted { attempts }));
                    continue;
                }
            };

            let new = NewJob::new(job_type, entity_id)
                .with_attempt(attempt)
                .with_payload(json!({
                    "decision": id.as_str(),
                    "rules_version": decision.rules_version,
                    "request_index": request_index,
                }));
            match self.queue.insert(new, now).await {
                Ok(job) => {
                    info!(decision = %id, job_id = %job.id, attempt, "job queued");
                    self.metrics.record_insert();
                    report.inserted.push(job);
                }
                Err(QueueError::DuplicateJobInsert { dedupe_key }) => {
                    warn!(decision = %id, %dedupe_key, "duplicate insert swallowed");
                    self.metrics.record_duplicate();
                    report.skipped.push((id, SkipReason::DuplicateInsert));
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(report)
    }

    /// Evaluate every entity. Per-entity failures are logged and counted,
    /// never returned; the next sweep retries them.
    ///
    /// # Errors
    ///
    /// Returns error only if the entity list cannot be read
    #[instrument(skip(self))]
    pub async fn evaluate_all(&self) -> RuntimeResult<SweepReport> {
        let ids = self.log.entity_ids().await?;
        let mut sweep = SweepReport::default();
        for entity_id in ids {
            sweep.entities += 1;
            match self.evaluate(entity_id).await {
                Ok(report) => sweep.inserted += report.inserted.len(),
                Err(err) => {
                    warn!(%entity_id, error = %err, "evaluation failed");
                    self.metrics.record_evaluation_failure();
                    sweep.failed += 1;
                }
            }
        }
        debug!(
            entities = sweep.entities,
            inserted = sweep.inserted,
            failed = sweep.failed,
            "sweep finished"
        );
        Ok(sweep)
    }
}

/// Log position of the request a job was queued under
fn job_request_index(job: &Job) -> Option<u64> {
    job.payload.get("request_index").and_then(Value::as_u64)
}

//! Execution engine.
//!
//! Workers claim jobs under a lease, keep the lease alive with a heartbeat
//! task while the provider call runs, and report the outcome. A result
//! event is appended before the job is completed, and the append is
//! idempotent on `job_id`, so a job executed twice after a reclaim still
//! leaves a single result in the log. Failures append nothing; the
//! evaluator decides about retries from the failed job rows.

use crate::config::EngineConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::handler::JobHandler;
use crate::monitor::PipelineMetrics;
use futures::future::join_all;
use notary_core::{Clock, JobId, WorkerId};
use notary_log::{
    append_result_idempotent, AppendOutcome, EventLog, LogError, DEFAULT_APPEND_RETRIES,
};
use notary_queue::{FailureKind, Job, JobQueue, QueueError};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// Outcome of one claim-execute-report cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOnce {
    /// Nothing claimable
    Idle,
    /// Job executed and completed
    Succeeded {
        /// Completed job
        job_id: JobId,
    },
    /// Job marked failed
    Failed {
        /// Failed job
        job_id: JobId,
        /// Error recorded on the job
        error: String,
    },
    /// The lease moved to another worker before the outcome was written
    LeaseLost {
        /// Job whose lease was lost
        job_id: JobId,
    },
}

/// Per-worker totals, returned when the worker stops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Worker id
    pub worker_id: String,
    /// Jobs claimed
    pub claimed: u64,
    /// Jobs completed
    pub succeeded: u64,
    /// Jobs failed
    pub failed: u64,
    /// Outcomes refused with `LeaseExpired`
    pub leases_lost: u64,
    /// Cycles aborted by a store error
    pub errors: u64,
}

/// Claims and executes jobs
pub struct ExecutionEngine {
    log: Arc<dyn EventLog>,
    queue: Arc<dyn JobQueue>,
    handler: JobHandler,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    append_retries: u32,
    metrics: Arc<PipelineMetrics>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    /// Create an engine
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        queue: Arc<dyn JobQueue>,
        handler: JobHandler,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            log,
            queue,
            handler,
            clock,
            config,
            append_retries: DEFAULT_APPEND_RETRIES,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Set the conflict retry limit for result appends
    #[must_use]
    pub fn with_append_retries(mut self, retries: u32) -> Self {
        self.append_retries = retries;
        self
    }

    /// Share a metrics sink
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Engine settings
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Metrics sink
    #[must_use]
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Claim one job, execute it and report the outcome
    ///
    /// # Errors
    ///
    /// Returns error if the queue or the log fails. Provider failures and
    /// lost leases are outcomes, not errors.
    #[instrument(skip(self, worker), fields(worker_id = %worker))]
    pub async fn run_once(&self, worker: &WorkerId) -> RuntimeResult<RunOnce> {
        let lease = self.config.lease_timeout();
        let Some(job) = self.queue.claim_next(worker, self.clock.now(), lease).await? else {
            return Ok(RunOnce::Idle);
        };

        // A run beyond the one just opened means an expired lease was taken over.
        let reclaimed = self.queue.runs(job.id).await?.len() > 1;
        self.metrics.record_claim(reclaimed);
        info!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempt, reclaimed, "job claimed");

        let heartbeat = self.spawn_heartbeat(job.id, worker.clone());
        let result = self.execute(&job, worker).await;
        heartbeat.abort();
        let _ = heartbeat.await;

        match result {
            Ok(()) => self.finish_success(&job, worker).await,
            Err(error) => self.finish_failure(&job, worker, error).await,
        }
    }

    /// Provider call plus result append. `Err` carries the job error
    /// text, tagged with its [`FailureKind`].
    async fn execute(&self, job: &Job, worker: &WorkerId) -> Result<(), String> {
        let entity = self.log.read(job.entity_id).await.map_err(|e| match e {
            LogError::EntityNotFound { .. } => FailureKind::Precondition.describe(e),
            other => FailureKind::Handler.describe(other),
        })?;

        let timeout = self.config.execution_timeout();
        let call = self.handler.execute(job, &entity, worker, self.clock.now());
        let event = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(event)) => event,
            Ok(Err(err)) => return Err(err.failure_kind().describe(err)),
            Err(_) => {
                return Err(FailureKind::Timeout.describe(format_args!(
                    "execution timed out after {} ms",
                    self.config.execution_timeout_ms
                )));
            }
        };

        let outcome = append_result_idempotent(
            self.log.as_ref(),
            job.entity_id,
            event,
            self.append_retries,
        )
        .await
        .map_err(|e| e.to_string())?;
        match outcome {
            AppendOutcome::Appended(version) => {
                debug!(job_id = %job.id, version, "result appended");
                self.metrics.record_result(false);
            }
            AppendOutcome::AlreadyPresent => {
                debug!(job_id = %job.id, "result already logged");
                self.metrics.record_result(true);
            }
        }
        Ok(())
    }

    async fn finish_success(&self, job: &Job, worker: &WorkerId) -> RuntimeResult<RunOnce> {
        match self.queue.complete(job.id, worker, self.clock.now()).await {
            Ok(_) => {
                info!(job_id = %job.id, job_type = %job.job_type, "job succeeded");
                self.metrics.record_success();
                Ok(RunOnce::Succeeded { job_id: job.id })
            }
            Err(err) => self.lease_lost_or(job.id, err),
        }
    }

    async fn finish_failure(
        &self,
        job: &Job,
        worker: &WorkerId,
        error: String,
    ) -> RuntimeResult<RunOnce> {
        warn!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempt, %error, "job failed");
        match self
            .queue
            .fail(job.id, worker, error.clone(), self.clock.now())
            .await
        {
            Ok(_) => {
                self.metrics.record_failure();
                Ok(RunOnce::Failed {
                    job_id: job.id,
                    error,
                })
            }
            Err(err) => self.lease_lost_or(job.id, err),
        }
    }

    fn lease_lost_or(&self, job_id: JobId, err: QueueError) -> RuntimeResult<RunOnce> {
        match err {
            QueueError::LeaseExpired { worker_id, .. } => {
                warn!(%job_id, worker_id = %worker_id, "lease lost, outcome discarded");
                self.metrics.record_lease_lost();
                Ok(RunOnce::LeaseLost { job_id })
            }
            other => Err(RuntimeError::from(other)),
        }
    }

    fn spawn_heartbeat(&self, job_id: JobId, worker: WorkerId) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let clock = self.clock.clone();
        let period = self.config.heartbeat_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the claim already set locked_at.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match queue.heartbeat(job_id, &worker, clock.now()).await {
                    Ok(()) => debug!(%job_id, worker_id = %worker, "lease extended"),
                    Err(QueueError::LeaseExpired { .. }) => {
                        warn!(%job_id, worker_id = %worker, "heartbeat refused, lease lost");
                        break;
                    }
                    Err(err) => warn!(%job_id, error = %err, "heartbeat failed"),
                }
            }
        })
    }

    /// Run one worker until `shutdown` turns true or its sender is dropped.
    /// A job in flight is finished before the worker exits.
    pub async fn run_worker(
        &self,
        worker: WorkerId,
        mut shutdown: watch::Receiver<bool>,
    ) -> WorkerStats {
        let mut stats = WorkerStats {
            worker_id: worker.to_string(),
            ..WorkerStats::default()
        };
        info!(worker_id = %worker, "worker started");

        while !*shutdown.borrow() {
            let idle = match self.run_once(&worker).await {
                Ok(RunOnce::Idle) => true,
                Ok(outcome) => {
                    stats.claimed += 1;
                    match outcome {
                        RunOnce::Succeeded { .. } => stats.succeeded += 1,
                        RunOnce::Failed { .. } => stats.failed += 1,
                        RunOnce::LeaseLost { .. } => stats.leases_lost += 1,
                        RunOnce::Idle => {}
                    }
                    false
                }
                Err(err) => {
                    warn!(worker_id = %worker, error = %err, "worker cycle failed");
                    stats.errors += 1;
                    true
                }
            };

            if idle {
                tokio::select! {
                    () = tokio::time::sleep(self.config.poll_interval()) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!(
            worker_id = %worker,
            claimed = stats.claimed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "worker stopped"
        );
        stats
    }

    /// Run `config.workers` workers until shutdown and collect their totals
    pub async fn run_pool(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<WorkerStats> {
        let handles: Vec<JoinHandle<WorkerStats>> = (0..self.config.workers.max(1))
            .map(|_| {
                let engine = self.clone();
                let worker = WorkerId::generate(&self.config.worker_prefix);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { engine.run_worker(worker, shutdown).await })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(stats) => Some(stats),
                Err(err) => {
                    warn!(error = %err, "worker task aborted");
                    None
                }
            })
            .collect()
    }

    /// Run until nothing is claimable. Returns the outcomes in order.
    ///
    /// # Errors
    ///
    /// Returns the first store error
    pub async fn drain(&self, worker: &WorkerId) -> RuntimeResult<Vec<RunOnce>> {
        let mut outcomes = Vec::new();
        loop {
            match self.run_once(worker).await? {
                RunOnce::Idle => return Ok(outcomes),
                outcome => outcomes.push(outcome),
            }
        }
    }
}

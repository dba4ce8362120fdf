//! Pipeline facade.
//!
//! Wires the log, queue, gate, evaluator and engine together and exposes
//! the request-layer operations. Requests only append to the log; the
//! work they imply happens asynchronously, so every request answers with
//! `Accepted`. Decisions still owned by legacy run through
//! [`Pipeline::fire_legacy`], which the gate suppresses once the pipeline
//! takes them over.

use crate::config::PipelineConfig;
use crate::engine::{ExecutionEngine, WorkerStats};
use crate::error::RuntimeResult;
use crate::evaluator::DecisionEvaluator;
use crate::handler::{failure_event, JobHandler};
use crate::monitor::PipelineMetrics;
use crate::provider::Providers;
use crate::wake::Wake;
use notary_authority::{
    decide, Authority, AuthorityGate, DecisionId, DecisionReason, FlagStore, LegacyTrigger,
    TriggerOutcome,
};
use notary_core::{Clock, EntityId, Fingerprint, OwnerId, SystemClock};
use notary_log::{
    append_with_retry, AnchorNetwork, DocumentEntity, Event, EventKind, EventLog, EventSource,
    InMemoryEventLog, LifecycleStatus,
};
use notary_queue::{DeadLetterReport, InMemoryJobQueue, Job, JobQueue, JobType};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// Answer to a request-layer call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accepted {
    /// Target entity
    pub entity_id: EntityId,
    /// Log version after the append
    pub version: u64,
    /// Human-readable note
    pub message: String,
}

impl Accepted {
    fn new(entity_id: EntityId, version: u64) -> Self {
        Self {
            entity_id,
            version,
            message: "processing is asynchronous".to_string(),
        }
    }
}

/// A document together with its derived status and jobs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityStatus {
    /// The entity and its full log
    pub entity: DocumentEntity,
    /// Informational lifecycle status
    pub status: LifecycleStatus,
    /// Every job ever queued for it
    pub jobs: Vec<Job>,
}

/// What a legacy trigger did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LegacyRun {
    /// The pipeline owns the decision
    Suppressed,
    /// The rules do not require the work
    NotRequired {
        /// Rule verdict
        reason: DecisionReason,
    },
    /// The side effect ran and its result was logged
    Appended {
        /// Log version after the append
        version: u64,
        /// Result event kind
        kind: EventKind,
    },
    /// The side effect failed and the failure was logged
    Failed {
        /// Log version after the append
        version: u64,
        /// Provider error
        error: String,
    },
}

/// The assembled pipeline
pub struct Pipeline {
    log: Arc<dyn EventLog>,
    queue: Arc<dyn JobQueue>,
    gate: AuthorityGate,
    handler: JobHandler,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
    evaluator: Arc<DecisionEvaluator>,
    engine: Arc<ExecutionEngine>,
    metrics: Arc<PipelineMetrics>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Assemble a pipeline from its parts
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        queue: Arc<dyn JobQueue>,
        flags: Arc<dyn FlagStore>,
        providers: Providers,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        let metrics = Arc::new(PipelineMetrics::new());
        let gate = AuthorityGate::new(flags);

        let evaluator = DecisionEvaluator::new(log.clone(), queue.clone(), gate.clone(), clock.clone())
            .with_retry(config.retry)
            .with_metrics(metrics.clone());
        let handler = JobHandler::new(providers);
        let engine = ExecutionEngine::new(
            log.clone(),
            queue.clone(),
            handler.clone(),
            clock.clone(),
            config.engine.clone(),
        )
        .with_append_retries(config.evaluator.append_retry_limit)
        .with_metrics(metrics.clone());

        Self {
            log,
            queue,
            gate,
            handler,
            clock,
            config,
            evaluator: Arc::new(evaluator),
            engine: Arc::new(engine),
            metrics,
        }
    }

    /// Assemble a pipeline over one store implementing every contract
    #[must_use]
    pub fn from_store<S>(store: Arc<S>, providers: Providers, config: PipelineConfig) -> Self
    where
        S: EventLog + JobQueue + FlagStore + 'static,
    {
        Self::new(
            store.clone(),
            store.clone(),
            store,
            providers,
            Arc::new(SystemClock),
            config,
        )
    }

    /// Assemble a pipeline over in-memory stores
    #[must_use]
    pub fn in_memory(providers: Providers, clock: Arc<dyn Clock>, config: PipelineConfig) -> Self {
        Self::new(
            Arc::new(InMemoryEventLog::new()),
            Arc::new(InMemoryJobQueue::new()),
            Arc::new(notary_authority::InMemoryFlagStore::new()),
            providers,
            clock,
            config,
        )
    }

    /// Write configured flags, then flags from the environment. Unknown
    /// flag names in the configuration are ignored with a warning.
    ///
    /// # Errors
    ///
    /// Returns error if the flag store cannot be written
    pub async fn seed_flags(&self) -> RuntimeResult<usize> {
        let mut written = 0;
        for (name, enabled) in &self.config.flags {
            let Some(decision) = DecisionId::ALL.into_iter().find(|d| d.flag_name() == name.as_str()) else {
                warn!(flag = %name, "unknown flag in configuration");
                continue;
            };
            let authority = if *enabled {
                Authority::Canonical
            } else {
                Authority::Legacy
            };
            self.gate.set_authority(decision, authority).await?;
            written += 1;
        }
        written += self.gate.seed_from_env().await?;
        Ok(written)
    }

    /// Register a document
    ///
    /// # Errors
    ///
    /// Returns error if the log rejects the entity
    #[instrument(skip(self, fingerprint, source), fields(owner_id = %owner_id))]
    pub async fn create_entity(
        &self,
        owner_id: OwnerId,
        fingerprint: Fingerprint,
        source: EventSource,
    ) -> RuntimeResult<Accepted> {
        let entity = DocumentEntity::new(EntityId::new(), owner_id, fingerprint, source, self.clock.now());
        let accepted = Accepted::new(entity.id, entity.version);
        self.log.create(entity).await?;
        info!(entity_id = %accepted.entity_id, "document created");
        Ok(accepted)
    }

    /// Request protection on the given networks
    ///
    /// # Errors
    ///
    /// Returns error if the request is rejected or cannot be appended
    pub async fn request_protection(
        &self,
        entity_id: EntityId,
        networks: &[AnchorNetwork],
        source: EventSource,
    ) -> RuntimeResult<Accepted> {
        let event = Event::protection_requested(networks, source, self.clock.now());
        self.ingest_event(entity_id, event).await
    }

    /// Append an externally produced event, then evaluate the entity.
    /// Evaluation failures are logged only; the wake sweep retries them.
    ///
    /// # Errors
    ///
    /// Returns error if the event is rejected or cannot be appended
    #[instrument(skip(self, event), fields(entity_id = %entity_id, kind = %event.kind))]
    pub async fn ingest_event(&self, entity_id: EntityId, event: Event) -> RuntimeResult<Accepted> {
        let version = append_with_retry(
            self.log.as_ref(),
            entity_id,
            event,
            self.config.evaluator.append_retry_limit,
        )
        .await?;
        info!(version, "event appended");

        if let Err(err) = self.evaluator.evaluate(entity_id).await {
            warn!(error = %err, "inline evaluation failed, wake will retry");
        }
        Ok(Accepted::new(entity_id, version))
    }

    /// Entity, derived status and jobs
    ///
    /// # Errors
    ///
    /// Returns error if the entity does not exist or the queue fails
    pub async fn status(&self, entity_id: EntityId) -> RuntimeResult<EntityStatus> {
        let entity = self.log.read(entity_id).await?;
        let jobs = self.queue.jobs_for_entity(entity_id).await?;
        Ok(EntityStatus {
            status: entity.status(),
            entity,
            jobs,
        })
    }

    /// Run one decision through the legacy side-effect path. The gate
    /// suppresses it while the pipeline owns the decision; the rules skip
    /// it when the work is not required. Provider failures are logged as
    /// the matching failure event.
    ///
    /// # Errors
    ///
    /// Returns error if the flag store, the log or the append fails
    #[instrument(skip(self), fields(entity_id = %entity_id, decision = %decision))]
    pub async fn fire_legacy(
        &self,
        entity_id: EntityId,
        decision: DecisionId,
    ) -> RuntimeResult<LegacyRun> {
        let trigger = LegacyTrigger::new(self.gate.clone(), decision);
        let run = match trigger.fire(|| self.run_legacy(entity_id, decision)).await? {
            TriggerOutcome::Fired(run) => run?,
            TriggerOutcome::Suppressed => return Ok(LegacyRun::Suppressed),
        };

        if let Err(err) = self.evaluator.evaluate(entity_id).await {
            warn!(error = %err, "inline evaluation failed, wake will retry");
        }
        Ok(run)
    }

    async fn run_legacy(&self, entity_id: EntityId, decision: DecisionId) -> RuntimeResult<LegacyRun> {
        let entity = self.log.read(entity_id).await?;
        let verdict = decide(decision, &entity.events);
        if !verdict.required {
            return Ok(LegacyRun::NotRequired {
                reason: verdict.reason,
            });
        }

        let job_type = JobType::from(decision);
        let source = EventSource::legacy("trigger");
        let now = self.clock.now();
        let (event, error) = match self.handler.perform(job_type, &entity, source.clone(), now).await {
            Ok(event) => (event, None),
            Err(err) => {
                let error = err.to_string();
                warn!(%error, "legacy side effect failed");
                (failure_event(job_type, &error, source, now), Some(error))
            }
        };
        let kind = event.kind;
        let version = append_with_retry(
            self.log.as_ref(),
            entity_id,
            event,
            self.config.evaluator.append_retry_limit,
        )
        .await?;
        info!(version, %kind, "legacy result appended");

        Ok(match error {
            None => LegacyRun::Appended { version, kind },
            Some(error) => LegacyRun::Failed { version, error },
        })
    }

    /// Dedupe keys whose newest job failed, with the derived reason. With
    /// `exhausted_only`, keys that will still be retried are left out.
    ///
    /// # Errors
    ///
    /// Returns error if the queue fails
    pub async fn dead_letters(&self, exhausted_only: bool) -> RuntimeResult<DeadLetterReport> {
        let failures = self.queue.latest_failures().await?;
        let report = DeadLetterReport::build(failures, &self.config.retry, exhausted_only);
        if report.total > 0 {
            info!(total = report.total, by_reason = ?report.by_reason, "dead letters found");
        }
        Ok(report)
    }

    /// Run the wake loop and the worker pool until shutdown
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Vec<WorkerStats> {
        let wake = self.wake();
        let (_, stats) = tokio::join!(
            wake.run(shutdown.clone()),
            self.engine.clone().run_pool(shutdown)
        );
        stats
    }

    /// Wake loop at the configured period
    #[must_use]
    pub fn wake(&self) -> Wake {
        Wake::new(self.evaluator.clone(), self.config.evaluator.wake_interval())
    }

    /// Decision evaluator
    #[must_use]
    pub fn evaluator(&self) -> &Arc<DecisionEvaluator> {
        &self.evaluator
    }

    /// Execution engine
    #[must_use]
    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Authority gate
    #[must_use]
    pub fn gate(&self) -> &AuthorityGate {
        &self.gate
    }

    /// Event log
    #[must_use]
    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    /// Job queue
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Shared counters
    #[must_use]
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedProviders;
    use crate::RuntimeError;
    use notary_log::{EventKind, LogError};
    use notary_queue::JobType;

    fn pipeline(config: PipelineConfig) -> Pipeline {
        pipeline_with(SimulatedProviders::new(), config)
    }

    fn pipeline_with(sim: SimulatedProviders, config: PipelineConfig) -> Pipeline {
        Pipeline::in_memory(Providers::uniform(Arc::new(sim)), Arc::new(SystemClock), config)
    }

    async fn requested(p: &Pipeline) -> EntityId {
        let created = p
            .create_entity(OwnerId::new(), Fingerprint::compute(b"deed"), EventSource::user("ui"))
            .await
            .unwrap();
        p.request_protection(created.entity_id, &[AnchorNetwork::Polygon], EventSource::user("ui"))
            .await
            .unwrap();
        created.entity_id
    }

    #[tokio::test]
    async fn test_request_is_accepted_and_evaluated_inline() {
        let p = pipeline(PipelineConfig::new().with_flag("ENABLE_D1_CANONICAL", true));
        assert!(p.seed_flags().await.unwrap() >= 1);

        let created = p
            .create_entity(OwnerId::new(), Fingerprint::compute(b"x"), EventSource::user("ui"))
            .await
            .unwrap();
        assert_eq!(created.version, 1);

        let accepted = p
            .request_protection(created.entity_id, &[AnchorNetwork::Polygon], EventSource::user("ui"))
            .await
            .unwrap();
        assert_eq!(accepted.version, 2);
        assert_eq!(accepted.message, "processing is asynchronous");

        let status = p.status(created.entity_id).await.unwrap();
        assert_eq!(status.status, LifecycleStatus::ProtectionRequested);
        assert_eq!(status.jobs.len(), 1);
        assert_eq!(status.jobs[0].job_type, JobType::RunTimestamp);
    }

    #[tokio::test]
    async fn test_rejected_event_is_an_error() {
        let p = pipeline(PipelineConfig::new());
        let created = p
            .create_entity(OwnerId::new(), Fingerprint::compute(b"x"), EventSource::user("ui"))
            .await
            .unwrap();

        // Results from a user source are never accepted as evidence.
        let forged = Event::new(EventKind::TimestampCompleted, EventSource::user("ui"), p.clock.now())
            .with_field("token", "forged");
        let result = p.ingest_event(created.entity_id, forged).await;
        assert!(matches!(result, Err(RuntimeError::Log(LogError::Rejected { .. }))));
    }

    #[tokio::test]
    async fn test_unknown_config_flag_is_ignored() {
        let p = pipeline(PipelineConfig::new().with_flag("ENABLE_NOTHING", true));
        p.seed_flags().await.unwrap();
        assert!(p.gate().list().await.unwrap().iter().all(|r| r.flag_name != "ENABLE_NOTHING"));
    }

    #[tokio::test]
    async fn test_legacy_trigger_runs_only_while_legacy_owns_it() {
        let p = pipeline(PipelineConfig::new());
        let id = requested(&p).await;

        let early = p.fire_legacy(id, DecisionId::SubmitAnchor(AnchorNetwork::Polygon)).await.unwrap();
        assert_eq!(
            early,
            LegacyRun::NotRequired {
                reason: DecisionReason::AwaitingTimestamp
            }
        );

        let run = p.fire_legacy(id, DecisionId::RunTimestamp).await.unwrap();
        assert_eq!(
            run,
            LegacyRun::Appended {
                version: 3,
                kind: EventKind::TimestampCompleted
            }
        );
        let entity = p.log().read(id).await.unwrap();
        assert_eq!(entity.events[2].source, EventSource::legacy("trigger"));
        assert!(p.queue().jobs_for_entity(id).await.unwrap().is_empty());

        p.gate()
            .set_authority(DecisionId::SubmitAnchor(AnchorNetwork::Polygon), Authority::Canonical)
            .await
            .unwrap();
        let suppressed = p.fire_legacy(id, DecisionId::SubmitAnchor(AnchorNetwork::Polygon)).await.unwrap();
        assert_eq!(suppressed, LegacyRun::Suppressed);
        assert_eq!(p.log().read(id).await.unwrap().version, 3);
    }

    #[tokio::test]
    async fn test_legacy_failure_is_logged() {
        let p = pipeline_with(SimulatedProviders::new().with_timestamp_failures(1), PipelineConfig::new());
        let id = requested(&p).await;

        match p.fire_legacy(id, DecisionId::RunTimestamp).await.unwrap() {
            LegacyRun::Failed { version, error } => {
                assert_eq!(version, 3);
                assert!(error.contains("injected failure"));
            }
            other => panic!("unexpected run {other:?}"),
        }
        let last = p.log().read(id).await.unwrap().events.last().cloned().unwrap();
        assert_eq!(last.kind, EventKind::TimestampFailed);

        let retried = p.fire_legacy(id, DecisionId::RunTimestamp).await.unwrap();
        assert!(matches!(retried, LegacyRun::Appended { version: 4, .. }));
    }

    #[tokio::test]
    async fn test_dead_letters_after_exhaustion() {
        use notary_core::WorkerId;
        use notary_queue::{DeadReason, RetryPolicies, RetryPolicy};

        let config = PipelineConfig::new()
            .with_flag("ENABLE_D1_CANONICAL", true)
            .with_retry(RetryPolicies {
                run_timestamp: RetryPolicy::new(1, 1_000, 1_000, 1),
                ..RetryPolicies::default()
            });
        let p = pipeline_with(SimulatedProviders::new().with_timestamp_failures(1), config);
        p.seed_flags().await.unwrap();
        let id = requested(&p).await;

        let outcomes = p.engine().drain(&WorkerId::new("w")).await.unwrap();
        assert_eq!(outcomes.len(), 1);

        let report = p.dead_letters(true).await.unwrap();
        assert_eq!(report.total, 1);
        let letter = &report.jobs[0];
        assert_eq!(letter.entity_id, id);
        assert_eq!(letter.reason, DeadReason::MaxAttemptsExceeded);
        assert!(letter.last_error.as_deref().is_some_and(|e| e.contains("injected failure")));
    }
}

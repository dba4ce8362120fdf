//! End-to-end behavior over the in-memory stores.

mod common;

use common::*;
use futures::future::join_all;
use notary_authority::{Authority, DecisionId, LegacyTrigger, TriggerOutcome};
use notary_core::{Clock, ManualClock, SystemClock, Timestamp, WorkerId};
use notary_log::{AnchorNetwork, Event, EventKind, EventSource, LifecycleStatus};
use notary_queue::{JobStatus, JobType, RetryPolicies, RetryPolicy, RunOutcome};
use notary_runtime::{
    EngineConfig, Pipeline, PipelineConfig, Providers, RunOnce, SimulatedProviders,
};
use std::sync::Arc;
use std::time::Duration;

fn pipeline_with(sim: SimulatedProviders, config: PipelineConfig) -> (Pipeline, Arc<SimulatedProviders>) {
    let sim = Arc::new(sim);
    let pipeline = Pipeline::in_memory(
        Providers::uniform(sim.clone()),
        Arc::new(SystemClock),
        config,
    );
    (pipeline, sim)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_network_certification_runs_each_step_once() {
    let (pipeline, sim) = pipeline_with(SimulatedProviders::new(), PipelineConfig::default());
    make_canonical(&pipeline).await;

    let entity_id = certify_two_networks(&pipeline).await;

    assert_eq!(sim.timestamp_calls(), 1);
    assert_eq!(sim.anchor_calls(), 2);
    assert_eq!(sim.artifact_calls(), 1);

    let entity = pipeline.log().read(entity_id).await.unwrap();
    let kinds: Vec<EventKind> = entity.events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds[0], EventKind::DocumentCreated);
    assert_eq!(kinds[1], EventKind::ProtectionRequested);
    assert_eq!(kinds[2], EventKind::TimestampCompleted);
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::AnchorConfirmed).count(), 2);
    assert_eq!(kinds.last(), Some(&EventKind::ArtifactCompleted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completion_is_monotonic_until_a_new_request() {
    let (pipeline, _) = pipeline_with(SimulatedProviders::new(), PipelineConfig::default());
    make_canonical(&pipeline).await;
    let entity_id = certify_two_networks(&pipeline).await;

    // A late duplicate confirmation from a chain watcher changes nothing.
    let late = Event::new(EventKind::AnchorConfirmed, EventSource::external("watcher"), Timestamp::now())
        .with_field("network", "polygon")
        .with_field("tx_hash", "0xlate");
    pipeline.ingest_event(entity_id, late).await.unwrap();
    assert_eq!(evaluate_concurrently(&pipeline, entity_id).await, 0);
    assert_eq!(pipeline.queue().jobs_for_entity(entity_id).await.unwrap().len(), 4);

    // A fresh request starts a new cycle from the timestamp.
    pipeline
        .request_protection(entity_id, &[AnchorNetwork::Polygon], EventSource::user("ui"))
        .await
        .unwrap();
    let timestamps = jobs_of(&pipeline, entity_id, JobType::RunTimestamp).await;
    assert_eq!(timestamps.len(), 2);
    assert_eq!(timestamps[1].status, JobStatus::Queued);
    assert_eq!(timestamps[1].attempt, 1);
    assert_eq!(
        pipeline.status(entity_id).await.unwrap().status,
        LifecycleStatus::ProtectionRequested
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_claim_a_job_once() {
    let (pipeline, sim) = pipeline_with(
        SimulatedProviders::new().with_latency(Duration::from_millis(20)),
        PipelineConfig::default(),
    );
    make_canonical(&pipeline).await;
    let entity_id = new_document(&pipeline, &[AnchorNetwork::Bitcoin]).await;

    let engine = pipeline.engine().clone();
    let tasks = (0..16).map(|i| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_once(&WorkerId::new(format!("w{i}"))).await.unwrap() })
    });
    let outcomes: Vec<RunOnce> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    let succeeded = outcomes
        .iter()
        .filter(|o| matches!(o, RunOnce::Succeeded { .. }))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(outcomes.iter().filter(|o| **o == RunOnce::Idle).count(), 15);
    assert_eq!(sim.timestamp_calls(), 1);

    let job = &jobs_of(&pipeline, entity_id, JobType::RunTimestamp).await[0];
    assert_eq!(pipeline.queue().runs(job.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed_and_stale_worker_loses_rights() {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_700_000_000_000).unwrap()));
    let config = PipelineConfig::new().with_engine(EngineConfig::default().with_lease_timeout(30_000));
    let pipeline = Pipeline::in_memory(
        Providers::uniform(Arc::new(SimulatedProviders::new())),
        clock.clone(),
        config,
    );
    make_canonical(&pipeline).await;
    let entity_id = new_document(&pipeline, &[AnchorNetwork::Polygon]).await;

    let stale = WorkerId::new("stale");
    let lease = Duration::from_millis(30_000);
    let job = pipeline
        .queue()
        .claim_next(&stale, clock.now(), lease)
        .await
        .unwrap()
        .unwrap();

    // Not yet expired: nobody else can take it.
    clock.advance(Duration::from_millis(29_999));
    assert_eq!(
        pipeline.engine().run_once(&WorkerId::new("fresh")).await.unwrap(),
        RunOnce::Idle
    );

    clock.advance(Duration::from_millis(1));
    assert_eq!(
        pipeline.engine().run_once(&WorkerId::new("fresh")).await.unwrap(),
        RunOnce::Succeeded { job_id: job.id }
    );

    let queue = pipeline.queue();
    assert!(queue.heartbeat(job.id, &stale, clock.now()).await.is_err());
    assert!(queue.fail(job.id, &stale, "late".into(), clock.now()).await.is_err());
    assert_eq!(queue.get(job.id).await.unwrap().status, JobStatus::Succeeded);

    let runs = queue.runs(job.id).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].worker_id, stale);
    assert_eq!(runs[0].outcome, Some(RunOutcome::Reclaimed));
    assert_eq!(runs[1].outcome, Some(RunOutcome::Succeeded));
    assert_eq!(pipeline.status(entity_id).await.unwrap().status, LifecycleStatus::Timestamped);
}

#[tokio::test]
async fn test_failed_job_is_retried_as_a_new_row() {
    let retry = RetryPolicies {
        run_timestamp: RetryPolicy::new(3, 0, 0, 2),
        ..RetryPolicies::default()
    };
    let (pipeline, sim) = pipeline_with(
        SimulatedProviders::new().with_timestamp_failures(1),
        PipelineConfig::new().with_retry(retry),
    );
    make_canonical(&pipeline).await;
    let entity_id = new_document(&pipeline, &[AnchorNetwork::Polygon]).await;

    let outcomes = drain(&pipeline).await;
    assert!(matches!(outcomes[..], [RunOnce::Failed { .. }]));
    // Failures leave no trace in the log.
    assert_eq!(pipeline.log().read(entity_id).await.unwrap().version, 2);

    let report = pipeline.evaluator().evaluate(entity_id).await.unwrap();
    assert_eq!(report.inserted.len(), 1);
    assert_eq!(report.inserted[0].attempt, 2);
    assert!(matches!(drain(&pipeline).await[..], [RunOnce::Succeeded { .. }]));

    let rows = jobs_of(&pipeline, entity_id, JobType::RunTimestamp).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].status, JobStatus::Failed);
    assert_eq!(rows[1].status, JobStatus::Succeeded);
    assert_ne!(rows[0].id, rows[1].id);
    assert_eq!(rows[0].dedupe_key, rows[1].dedupe_key);
    assert_eq!(sim.timestamp_calls(), 2);
}

#[tokio::test]
async fn test_exhausted_key_stops_producing_jobs() {
    let retry = RetryPolicies {
        run_timestamp: RetryPolicy::new(2, 0, 0, 1),
        ..RetryPolicies::default()
    };
    let (pipeline, _) = pipeline_with(
        SimulatedProviders::new().with_timestamp_failures(u32::MAX),
        PipelineConfig::new().with_retry(retry),
    );
    make_canonical(&pipeline).await;
    let entity_id = new_document(&pipeline, &[AnchorNetwork::Polygon]).await;

    drain(&pipeline).await;
    pipeline.evaluator().evaluate(entity_id).await.unwrap();
    drain(&pipeline).await;

    let report = pipeline.evaluator().evaluate(entity_id).await.unwrap();
    assert!(report.inserted.is_empty());
    assert_eq!(jobs_of(&pipeline, entity_id, JobType::RunTimestamp).await.len(), 2);
    assert_eq!(pipeline.metrics().snapshot().jobs_exhausted, 1);
}

#[tokio::test]
async fn test_gate_selects_exactly_one_path() {
    let (pipeline, _) = pipeline_with(SimulatedProviders::new(), PipelineConfig::default());
    let trigger = LegacyTrigger::new(pipeline.gate().clone(), DecisionId::RunTimestamp);

    // Legacy authority: the trigger fires and the pipeline queues nothing.
    let entity_id = new_document(&pipeline, &[AnchorNetwork::Polygon]).await;
    assert!(pipeline.queue().jobs_for_entity(entity_id).await.unwrap().is_empty());
    assert_eq!(
        trigger.fire(|| async { "legacy timestamp" }).await.unwrap(),
        TriggerOutcome::Fired("legacy timestamp")
    );

    // Canonical authority: the pipeline queues and the trigger is suppressed.
    pipeline
        .gate()
        .set_authority(DecisionId::RunTimestamp, Authority::Canonical)
        .await
        .unwrap();
    let report = pipeline.evaluator().evaluate(entity_id).await.unwrap();
    assert_eq!(report.inserted.len(), 1);
    assert_eq!(
        trigger.fire(|| async { "legacy timestamp" }).await.unwrap(),
        TriggerOutcome::Suppressed
    );
}

#[tokio::test]
async fn test_pending_anchor_waits_for_external_confirmation() {
    let (pipeline, sim) = pipeline_with(
        SimulatedProviders::new().with_pending_anchors(true),
        PipelineConfig::default(),
    );
    make_canonical(&pipeline).await;
    let entity_id = new_document(&pipeline, &[AnchorNetwork::Bitcoin]).await;

    drain(&pipeline).await;
    pipeline.evaluator().evaluate(entity_id).await.unwrap();
    drain(&pipeline).await;

    // Submitted but unconfirmed: no resubmission and no artifact.
    assert_eq!(evaluate_concurrently(&pipeline, entity_id).await, 0);
    assert_eq!(sim.anchor_calls(), 1);
    assert_eq!(pipeline.status(entity_id).await.unwrap().status, LifecycleStatus::Anchoring);

    let confirmed = Event::new(EventKind::AnchorConfirmed, EventSource::external("btc-watcher"), Timestamp::now())
        .with_field("network", "bitcoin")
        .with_field("tx_hash", "0xabc");
    pipeline.ingest_event(entity_id, confirmed).await.unwrap();
    assert_eq!(jobs_of(&pipeline, entity_id, JobType::BuildArtifact).await.len(), 1);

    drain(&pipeline).await;
    assert_eq!(pipeline.status(entity_id).await.unwrap().status, LifecycleStatus::Certified);
}

#[tokio::test]
async fn test_run_drives_a_document_to_certified() {
    let mut config = PipelineConfig::new()
        .with_engine(EngineConfig::default().with_workers(2).with_poll_interval(5));
    config.evaluator = config.evaluator.with_wake_interval(10);
    let (pipeline, _) = pipeline_with(SimulatedProviders::new(), config);
    make_canonical(&pipeline).await;
    let entity_id = new_document(&pipeline, &[AnchorNetwork::Polygon, AnchorNetwork::Bitcoin]).await;

    let pipeline = Arc::new(pipeline);
    let (tx, rx) = tokio::sync::watch::channel(false);
    let runner = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run(rx).await })
    };

    let mut certified = false;
    for _ in 0..200 {
        if pipeline.status(entity_id).await.unwrap().status == LifecycleStatus::Certified {
            certified = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tx.send(true).unwrap();
    let stats = runner.await.unwrap();

    assert!(certified);
    assert_eq!(stats.len(), 2);
    assert_eq!(stats.iter().map(|s| s.succeeded).sum::<u64>(), 4);
}

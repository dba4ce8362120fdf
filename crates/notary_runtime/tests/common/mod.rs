//! Shared scenario helpers for the integration tests.

#![allow(dead_code)]

use futures::future::join_all;
use notary_authority::{Authority, DecisionId};
use notary_core::{EntityId, Fingerprint, OwnerId, WorkerId};
use notary_log::{AnchorNetwork, EventSource, LifecycleStatus};
use notary_queue::{Job, JobStatus, JobType};
use notary_runtime::{Pipeline, RunOnce};

pub const EVALUATORS: usize = 10;

pub async fn make_canonical(pipeline: &Pipeline) {
    for decision in DecisionId::ALL {
        pipeline
            .gate()
            .set_authority(decision, Authority::Canonical)
            .await
            .unwrap();
    }
}

pub async fn new_document(pipeline: &Pipeline, networks: &[AnchorNetwork]) -> EntityId {
    let created = pipeline
        .create_entity(OwnerId::new(), Fingerprint::compute(b"deed of sale"), EventSource::user("ui"))
        .await
        .unwrap();
    pipeline
        .request_protection(created.entity_id, networks, EventSource::user("ui"))
        .await
        .unwrap();
    created.entity_id
}

/// Run `EVALUATORS` evaluations of one entity concurrently and return how
/// many jobs they inserted in total.
pub async fn evaluate_concurrently(pipeline: &Pipeline, entity_id: EntityId) -> usize {
    let tasks = (0..EVALUATORS).map(|_| {
        let evaluator = pipeline.evaluator().clone();
        tokio::spawn(async move { evaluator.evaluate(entity_id).await.unwrap() })
    });
    join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().inserted.len())
        .sum()
}

pub async fn drain(pipeline: &Pipeline) -> Vec<RunOnce> {
    pipeline
        .engine()
        .drain(&WorkerId::new("test-worker"))
        .await
        .unwrap()
}

pub async fn jobs_of(pipeline: &Pipeline, entity_id: EntityId, job_type: JobType) -> Vec<Job> {
    pipeline
        .queue()
        .jobs_for_entity(entity_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|j| j.job_type == job_type)
        .collect()
}

/// The full certification of one document on Polygon and Bitcoin, with
/// every evaluation step raced by `EVALUATORS` evaluators.
pub async fn certify_two_networks(pipeline: &Pipeline) -> EntityId {
    let networks = [AnchorNetwork::Polygon, AnchorNetwork::Bitcoin];
    let entity_id = new_document(pipeline, &networks).await;

    // The request's inline evaluation already queued the timestamp.
    assert_eq!(evaluate_concurrently(pipeline, entity_id).await, 0);
    assert_eq!(jobs_of(pipeline, entity_id, JobType::RunTimestamp).await.len(), 1);
    assert_eq!(drain(pipeline).await.len(), 1);

    assert_eq!(evaluate_concurrently(pipeline, entity_id).await, 2);
    assert_eq!(jobs_of(pipeline, entity_id, JobType::SubmitAnchorPolygon).await.len(), 1);
    assert_eq!(jobs_of(pipeline, entity_id, JobType::SubmitAnchorBitcoin).await.len(), 1);
    assert!(jobs_of(pipeline, entity_id, JobType::BuildArtifact).await.is_empty());
    assert_eq!(drain(pipeline).await.len(), 2);

    assert_eq!(evaluate_concurrently(pipeline, entity_id).await, 1);
    assert_eq!(drain(pipeline).await.len(), 1);

    assert_eq!(evaluate_concurrently(pipeline, entity_id).await, 0);

    let status = pipeline.status(entity_id).await.unwrap();
    assert_eq!(status.status, LifecycleStatus::Certified);
    assert_eq!(status.jobs.len(), 4);
    assert!(status.jobs.iter().all(|j| j.status == JobStatus::Succeeded));
    for job_type in JobType::ALL {
        assert_eq!(
            status.jobs.iter().filter(|j| j.job_type == job_type).count(),
            1,
            "{job_type} ran more than once"
        );
    }
    entity_id
}

//! Job dispatch.
//!
//! Maps each job type to its provider call and turns the provider's answer
//! into the result event the log expects.

use crate::provider::{
    AnchorRequest, AnchorStatus, ArtifactRequest, ProviderResult, Providers, TimestampRequest,
};
use notary_authority::DecisionId;
use notary_core::{Timestamp, WorkerId};
use notary_log::{AnchorNetwork, DocumentEntity, Event, EventClass, EventKind, EventSource};
use notary_queue::{Job, JobType};
use tracing::debug;

/// Executes claimed jobs against the providers
#[derive(Debug, Clone)]
pub struct JobHandler {
    providers: Providers,
}

impl JobHandler {
    /// Create a handler
    #[must_use]
    pub fn new(providers: Providers) -> Self {
        Self { providers }
    }

    /// Run the side effect for `job` and build its result event
    ///
    /// # Errors
    ///
    /// Returns the provider's error; no event is produced in that case
    pub async fn execute(
        &self,
        job: &Job,
        entity: &DocumentEntity,
        worker: &WorkerId,
        at: Timestamp,
    ) -> ProviderResult<Event> {
        debug!(job_id = %job.id, job_type = %job.job_type, "dispatching");
        let event = self
            .perform(job.job_type, entity, EventSource::pipeline(worker.as_str()), at)
            .await?;
        Ok(event.with_field("job_id", job.id.to_string()))
    }

    /// Run the side effect of `job_type` for `entity` outside the queue,
    /// attributing the result event to `source`
    ///
    /// # Errors
    ///
    /// Returns the provider's error
    pub async fn perform(
        &self,
        job_type: JobType,
        entity: &DocumentEntity,
        source: EventSource,
        at: Timestamp,
    ) -> ProviderResult<Event> {
        match job_type {
            JobType::RunTimestamp => {
                let token = self
                    .providers
                    .timestamp
                    .timestamp(TimestampRequest {
                        entity_id: entity.id,
                        fingerprint: entity.fingerprint,
                    })
                    .await?;
                Ok(Event::new(EventKind::TimestampCompleted, source, at)
                    .with_field("token", token.token)
                    .with_field("algorithm", token.algorithm)
                    .with_field("standard", token.standard)
                    .with_field("witness_hash", entity.fingerprint.to_hex()))
            }
            JobType::SubmitAnchorPolygon => {
                self.anchor(entity, AnchorNetwork::Polygon, source, at).await
            }
            JobType::SubmitAnchorBitcoin => {
                self.anchor(entity, AnchorNetwork::Bitcoin, source, at).await
            }
            JobType::BuildArtifact => {
                let evidence = active_evidence(entity);
                let artifact = self
                    .providers
                    .artifacts
                    .build(ArtifactRequest {
                        entity_id: entity.id,
                        fingerprint: entity.fingerprint,
                        evidence,
                    })
                    .await?;
                Ok(Event::new(EventKind::ArtifactCompleted, source, at)
                    .with_field("storage_path", artifact.storage_path)
                    .with_field("size", artifact.size))
            }
        }
    }

    async fn anchor(
        &self,
        entity: &DocumentEntity,
        network: AnchorNetwork,
        source: EventSource,
        at: Timestamp,
    ) -> ProviderResult<Event> {
        let receipt = self
            .providers
            .anchors
            .submit(AnchorRequest {
                entity_id: entity.id,
                network,
                fingerprint: entity.fingerprint,
            })
            .await?;
        let kind = match receipt.status {
            AnchorStatus::Confirmed => EventKind::AnchorConfirmed,
            AnchorStatus::Pending => EventKind::AnchorSubmitted,
        };
        Ok(Event::new(kind, source, at)
            .with_field("network", network.as_str())
            .with_field("tx_hash", receipt.tx_hash))
    }
}

/// Tracking event recording a failed side effect of `job_type`
#[must_use]
pub fn failure_event(job_type: JobType, error: &str, source: EventSource, at: Timestamp) -> Event {
    let event = match job_type.decision() {
        DecisionId::RunTimestamp => Event::new(EventKind::TimestampFailed, source, at),
        DecisionId::SubmitAnchor(network) => {
            Event::new(EventKind::AnchorFailed, source, at).with_field("network", network.as_str())
        }
        DecisionId::BuildArtifact => Event::new(EventKind::ArtifactFailed, source, at),
    };
    event.with_field("error", error)
}

/// Evidence events of the active protection request, request included
fn active_evidence(entity: &DocumentEntity) -> Vec<Event> {
    let start = entity.active_request_index().unwrap_or(0);
    entity.events[start..]
        .iter()
        .filter(|e| e.class() == EventClass::Evidence)
        .cloned()
        .collect()
}

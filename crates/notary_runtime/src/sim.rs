//! Simulated providers.
//!
//! Deterministic in-process stand-ins for the timestamp, anchor and
//! artifact services. Outputs are derived from the request alone, so the
//! same document always gets the same token and transaction hash.
//! Failures are injected by count: the first `n` calls fail, later ones
//! succeed.

use crate::provider::{
    AnchorReceipt, AnchorRequest, AnchorStatus, AnchorSubmitter, ArtifactBuilder, ArtifactRef,
    ArtifactRequest, ProviderError, ProviderResult, TimestampAuthority, TimestampRequest,
    TimestampToken,
};
use async_trait::async_trait;
use notary_core::Fingerprint;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Deterministic providers with failure injection
#[derive(Debug, Default)]
pub struct SimulatedProviders {
    timestamp_failures: AtomicU32,
    anchor_failures: AtomicU32,
    artifact_failures: AtomicU32,
    pending_anchors: bool,
    latency: Duration,
    timestamp_calls: AtomicU64,
    anchor_calls: AtomicU64,
    artifact_calls: AtomicU64,
}

impl SimulatedProviders {
    /// Providers that always succeed and confirm anchors immediately
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` timestamp calls
    #[must_use]
    pub fn with_timestamp_failures(self, n: u32) -> Self {
        self.timestamp_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the first `n` anchor submissions
    #[must_use]
    pub fn with_anchor_failures(self, n: u32) -> Self {
        self.anchor_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the first `n` artifact builds
    #[must_use]
    pub fn with_artifact_failures(self, n: u32) -> Self {
        self.artifact_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Report anchors as pending instead of confirmed
    #[must_use]
    pub fn with_pending_anchors(mut self, pending: bool) -> Self {
        self.pending_anchors = pending;
        self
    }

    /// Delay every call
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Timestamp calls made so far
    #[must_use]
    pub fn timestamp_calls(&self) -> u64 {
        self.timestamp_calls.load(Ordering::SeqCst)
    }

    /// Anchor submissions made so far
    #[must_use]
    pub fn anchor_calls(&self) -> u64 {
        self.anchor_calls.load(Ordering::SeqCst)
    }

    /// Artifact builds made so far
    #[must_use]
    pub fn artifact_calls(&self) -> u64 {
        self.artifact_calls.load(Ordering::SeqCst)
    }

    async fn call(&self, calls: &AtomicU64, failures: &AtomicU32, provider: &str) -> ProviderResult<()> {
        calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let injected = failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ProviderError::Unavailable {
                provider: provider.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

fn derive(parts: &[&str]) -> String {
    Fingerprint::compute(parts.join(":").as_bytes()).to_hex()
}

#[async_trait]
impl TimestampAuthority for SimulatedProviders {
    async fn timestamp(&self, request: TimestampRequest) -> ProviderResult<TimestampToken> {
        self.call(&self.timestamp_calls, &self.timestamp_failures, "sim-tsa")
            .await?;
        Ok(TimestampToken {
            token: derive(&["tsa", &request.fingerprint.to_hex()]),
            algorithm: "SHA-256".to_string(),
            standard: "RFC3161".to_string(),
        })
    }
}

#[async_trait]
impl AnchorSubmitter for SimulatedProviders {
    async fn submit(&self, request: AnchorRequest) -> ProviderResult<AnchorReceipt> {
        self.call(&self.anchor_calls, &self.anchor_failures, "sim-anchor")
            .await?;
        let status = if self.pending_anchors {
            AnchorStatus::Pending
        } else {
            AnchorStatus::Confirmed
        };
        Ok(AnchorReceipt {
            tx_hash: format!(
                "0x{}",
                derive(&["anchor", request.network.as_str(), &request.fingerprint.to_hex()])
            ),
            network: request.network,
            status,
        })
    }
}

#[async_trait]
impl ArtifactBuilder for SimulatedProviders {
    async fn build(&self, request: ArtifactRequest) -> ProviderResult<ArtifactRef> {
        self.call(&self.artifact_calls, &self.artifact_failures, "sim-artifact")
            .await?;
        let body = serde_json::to_vec(&request.evidence).map_err(|e| {
            ProviderError::InvalidResponse {
                provider: "sim-artifact".to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(ArtifactRef {
            storage_path: format!("artifacts/{}/{}.json", request.entity_id, request.fingerprint),
            size: body.len() as u64,
        })
    }
}

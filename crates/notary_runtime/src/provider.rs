//! Side-effect provider contracts.
//!
//! The pipeline only knows these request/response shapes. Concrete
//! timestamping services, chain RPC and artifact renderers live behind
//! the traits.

use async_trait::async_trait;
use notary_core::{EntityId, Fingerprint};
use notary_log::{AnchorNetwork, Event};
use notary_queue::FailureKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Provider result type
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Provider error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Provider could not be reached or failed transiently
    #[error("{provider} unavailable: {reason}")]
    Unavailable {
        /// Provider name
        provider: String,
        /// Failure message
        reason: String,
    },

    /// Provider refused the request
    #[error("{provider} rejected the request: {reason}")]
    Rejected {
        /// Provider name
        provider: String,
        /// Refusal message
        reason: String,
    },

    /// Provider answered with something that is not the contract
    #[error("{provider} returned an invalid response: {reason}")]
    InvalidResponse {
        /// Provider name
        provider: String,
        /// Decode message
        reason: String,
    },

    /// Provider is not configured
    #[error("{provider} is not configured")]
    NotConfigured {
        /// Provider name
        provider: String,
    },
}

impl ProviderError {
    /// Refusals and missing configuration will not clear up on a retry
    /// of the same request
    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Rejected { .. } | Self::NotConfigured { .. } => FailureKind::Precondition,
            Self::Unavailable { .. } | Self::InvalidResponse { .. } => FailureKind::Handler,
        }
    }
}

/// Input of a timestamp request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRequest {
    /// Document
    pub entity_id: EntityId,
    /// Value to timestamp
    pub fingerprint: Fingerprint,
}

/// An RFC 3161 style timestamp token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampToken {
    /// Encoded token
    pub token: String,
    /// Digest algorithm
    pub algorithm: String,
    /// Token standard
    pub standard: String,
}

/// Input of an anchor submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRequest {
    /// Document
    pub entity_id: EntityId,
    /// Target network
    pub network: AnchorNetwork,
    /// Value to anchor
    pub fingerprint: Fingerprint,
}

/// Whether an anchor is final
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorStatus {
    /// Submitted, confirmation arrives later
    Pending,
    /// Confirmed on chain
    Confirmed,
}

/// Result of an anchor submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    /// Transaction hash
    pub tx_hash: String,
    /// Network the transaction went to
    pub network: AnchorNetwork,
    /// Confirmation state
    pub status: AnchorStatus,
}

/// Input of an artifact build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRequest {
    /// Document
    pub entity_id: EntityId,
    /// Certified value
    pub fingerprint: Fingerprint,
    /// Evidence to embed
    pub evidence: Vec<Event>,
}

/// Stored artifact location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Storage path
    pub storage_path: String,
    /// Size in bytes
    pub size: u64,
}

/// Trusted timestamping service
#[async_trait]
pub trait TimestampAuthority: Send + Sync {
    /// Timestamp a fingerprint
    ///
    /// # Errors
    ///
    /// Returns error if the service fails or refuses
    async fn timestamp(&self, request: TimestampRequest) -> ProviderResult<TimestampToken>;
}

/// Chain anchoring service
#[async_trait]
pub trait AnchorSubmitter: Send + Sync {
    /// Submit a fingerprint to a network
    ///
    /// # Errors
    ///
    /// Returns error if the submission fails
    async fn submit(&self, request: AnchorRequest) -> ProviderResult<AnchorReceipt>;
}

/// Certificate artifact builder
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    /// Build and store the artifact
    ///
    /// # Errors
    ///
    /// Returns error if the build or upload fails
    async fn build(&self, request: ArtifactRequest) -> ProviderResult<ArtifactRef>;
}

/// The set of providers a worker calls
#[derive(Clone)]
pub struct Providers {
    /// Timestamp service
    pub timestamp: Arc<dyn TimestampAuthority>,
    /// Anchor service
    pub anchors: Arc<dyn AnchorSubmitter>,
    /// Artifact service
    pub artifacts: Arc<dyn ArtifactBuilder>,
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}

impl Providers {
    /// Bundle three providers
    #[must_use]
    pub fn new(
        timestamp: Arc<dyn TimestampAuthority>,
        anchors: Arc<dyn AnchorSubmitter>,
        artifacts: Arc<dyn ArtifactBuilder>,
    ) -> Self {
        Self {
            timestamp,
            anchors,
            artifacts,
        }
    }

    /// Use one value implementing all three traits
    #[must_use]
    pub fn uniform<P>(provider: Arc<P>) -> Self
    where
        P: TimestampAuthority + AnchorSubmitter + ArtifactBuilder + 'static,
    {
        Self {
            timestamp: provider.clone(),
            anchors: provider.clone(),
            artifacts: provider,
        }
    }
}

//! Decision identifiers and verdicts.

use notary_log::AnchorNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version of the rule set. Bump when any rule changes meaning.
pub const RULES_VERSION: u32 = 2;

/// A named rule whose outcome is a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DecisionId {
    /// Obtain a trusted timestamp for the fingerprint
    RunTimestamp,
    /// Anchor the fingerprint on a network
    SubmitAnchor(AnchorNetwork),
    /// Build the certificate artifact
    BuildArtifact,
}

impl DecisionId {
    /// Every decision the rule set knows about
    pub const ALL: [DecisionId; 4] = [
        Self::RunTimestamp,
        Self::SubmitAnchor(AnchorNetwork::Polygon),
        Self::SubmitAnchor(AnchorNetwork::Bitcoin),
        Self::BuildArtifact,
    ];

    /// Stable name, also used as the job type
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunTimestamp => "run_timestamp",
            Self::SubmitAnchor(AnchorNetwork::Polygon) => "submit_anchor_polygon",
            Self::SubmitAnchor(AnchorNetwork::Bitcoin) => "submit_anchor_bitcoin",
            Self::BuildArtifact => "build_artifact",
        }
    }

    /// Feature flag that moves this decision under canonical authority
    #[must_use]
    pub const fn flag_name(self) -> &'static str {
        match self {
            Self::RunTimestamp => "ENABLE_D1_CANONICAL",
            Self::SubmitAnchor(AnchorNetwork::Polygon) => "ENABLE_D4_CANONICAL_POLYGON",
            Self::SubmitAnchor(AnchorNetwork::Bitcoin) => "ENABLE_D4_CANONICAL_BITCOIN",
            Self::BuildArtifact => "ENABLE_D3_CANONICAL",
        }
    }
}

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| format!("unknown decision '{}'", s))
    }
}

impl Serialize for DecisionId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DecisionId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Why a rule came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Work is needed
    Required,
    /// No protection request in the log
    NoActiveRequest,
    /// The active request does not cover this network
    NotRequested,
    /// Waiting for a timestamp first
    AwaitingTimestamp,
    /// Waiting for requested anchors to confirm
    AwaitingAnchors,
    /// An anchor was submitted and has neither confirmed nor failed
    AnchorPending,
    /// The completion event for the active request exists
    AlreadyCompleted,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Required => "required",
            Self::NoActiveRequest => "no_active_request",
            Self::NotRequested => "not_requested",
            Self::AwaitingTimestamp => "awaiting_timestamp",
            Self::AwaitingAnchors => "awaiting_anchors",
            Self::AnchorPending => "anchor_pending",
            Self::AlreadyCompleted => "already_completed",
        };
        f.write_str(s)
    }
}

/// The verdict of one rule over one log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Which rule
    pub decision: DecisionId,
    /// Whether work must be scheduled
    pub required: bool,
    /// Explanation
    pub reason: DecisionReason,
    /// Rule set version that produced this verdict
    pub rules_version: u32,
}

impl Decision {
    /// Work is needed
    #[must_use]
    pub const fn required(decision: DecisionId) -> Self {
        Self {
            decision,
            required: true,
            reason: DecisionReason::Required,
            rules_version: RULES_VERSION,
        }
    }

    /// No work, for `reason`
    #[must_use]
    pub const fn not_required(decision: DecisionId, reason: DecisionReason) -> Self {
        Self {
            decision,
            required: false,
            reason,
            rules_version: RULES_VERSION,
        }
    }
}

//! Event types for the document log.
//!
//! Event kinds have stable wire names. Evidence events carry facts the
//! certification depends on and are only accepted from authorized
//! origins; tracking events record progress and failures.

use notary_core::{EventId, JobId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Blockchain network a fingerprint can be anchored on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorNetwork {
    /// Polygon PoS
    Polygon,
    /// Bitcoin (via OpenTimestamps calendars)
    Bitcoin,
}

impl AnchorNetwork {
    /// Every supported network
    pub const ALL: [AnchorNetwork; 2] = [Self::Polygon, Self::Bitcoin];

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Polygon => "polygon",
            Self::Bitcoin => "bitcoin",
        }
    }
}

impl fmt::Display for AnchorNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnchorNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polygon" => Ok(Self::Polygon),
            "bitcoin" => Ok(Self::Bitcoin),
            other => Err(format!("unknown anchor network '{}'", other)),
        }
    }
}

/// Whether an event is evidence or bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventClass {
    /// Facts the certificate depends on
    Evidence,
    /// Progress and failure records
    Tracking,
}

/// Event kind - type of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Document registered
    #[serde(rename = "document.created")]
    DocumentCreated,
    /// Protection requested for a set of networks
    #[serde(rename = "document.protected.requested")]
    ProtectionRequested,
    /// Trusted timestamp obtained
    #[serde(rename = "tsa.confirmed")]
    TimestampCompleted,
    /// Trusted timestamp attempt failed
    #[serde(rename = "tsa.failed")]
    TimestampFailed,
    /// Anchor transaction submitted, not yet confirmed
    #[serde(rename = "anchor.submitted")]
    AnchorSubmitted,
    /// Anchor confirmed on chain
    #[serde(rename = "anchor.confirmed")]
    AnchorConfirmed,
    /// Anchor attempt failed
    #[serde(rename = "anchor.failed")]
    AnchorFailed,
    /// Certificate artifact built and stored
    #[serde(rename = "artifact.finalized")]
    ArtifactCompleted,
    /// Artifact build failed
    #[serde(rename = "artifact.failed")]
    ArtifactFailed,
}

impl EventKind {
    /// Every kind in taxonomy order
    pub const ALL: [EventKind; 9] = [
        Self::DocumentCreated,
        Self::ProtectionRequested,
        Self::TimestampCompleted,
        Self::TimestampFailed,
        Self::AnchorSubmitted,
        Self::AnchorConfirmed,
        Self::AnchorFailed,
        Self::ArtifactCompleted,
        Self::ArtifactFailed,
    ];

    /// Stable wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DocumentCreated => "document.created",
            Self::ProtectionRequested => "document.protected.requested",
            Self::TimestampCompleted => "tsa.confirmed",
            Self::TimestampFailed => "tsa.failed",
            Self::AnchorSubmitted => "anchor.submitted",
            Self::AnchorConfirmed => "anchor.confirmed",
            Self::AnchorFailed => "anchor.failed",
            Self::ArtifactCompleted => "artifact.finalized",
            Self::ArtifactFailed => "artifact.failed",
        }
    }

    /// Evidence or tracking
    #[must_use]
    pub const fn class(self) -> EventClass {
        match self {
            Self::ProtectionRequested
            | Self::TimestampCompleted
            | Self::AnchorConfirmed
            | Self::ArtifactCompleted => EventClass::Evidence,
            Self::DocumentCreated
            | Self::TimestampFailed
            | Self::AnchorSubmitted
            | Self::AnchorFailed
            | Self::ArtifactFailed => EventClass::Tracking,
        }
    }

    /// Kinds that carry a `network` field
    #[must_use]
    pub const fn is_anchor(self) -> bool {
        matches!(
            self,
            Self::AnchorSubmitted | Self::AnchorConfirmed | Self::AnchorFailed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown event kind '{}'", s))
    }
}

/// Who produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    /// Human or UI action
    User,
    /// Canonical pipeline worker
    Pipeline,
    /// Legacy trigger path
    Legacy,
    /// Asynchronously ingested provider callback
    External,
}

impl Origin {
    /// Wire prefix
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Pipeline => "pipeline",
            Self::Legacy => "legacy",
            Self::External => "external",
        }
    }
}

impl FromStr for Origin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "pipeline" => Ok(Self::Pipeline),
            "legacy" => Ok(Self::Legacy),
            "external" => Ok(Self::External),
            other => Err(format!("unknown origin '{}'", other)),
        }
    }
}

/// Event source tag, `<origin>:<name>` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventSource {
    /// Origin class
    pub origin: Origin,
    /// Component or actor name
    pub name: String,
}

impl EventSource {
    /// Create a source
    pub fn new(origin: Origin, name: impl Into<String>) -> Self {
        Self {
            origin,
            name: name.into(),
        }
    }

    /// `user:<name>`
    pub fn user(name: impl Into<String>) -> Self {
        Self::new(Origin::User, name)
    }

    /// `pipeline:<name>`
    pub fn pipeline(name: impl Into<String>) -> Self {
        Self::new(Origin::Pipeline, name)
    }

    /// `legacy:<name>`
    pub fn legacy(name: impl Into<String>) -> Self {
        Self::new(Origin::Legacy, name)
    }

    /// `external:<name>`
    pub fn external(name: impl Into<String>) -> Self {
        Self::new(Origin::External, name)
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin.as_str(), self.name)
    }
}

impl FromStr for EventSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (origin, name) = s
            .split_once(':')
            .ok_or_else(|| format!("source '{}' is not <origin>:<name>", s))?;
        if name.is_empty() {
            return Err(format!("source '{}' has an empty name", s));
        }
        Ok(Self::new(origin.parse()?, name))
    }
}

impl Serialize for EventSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventSource {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A logged event. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Envelope id
    pub id: EventId,
    /// Event kind
    pub kind: EventKind,
    /// When the event happened
    pub at: Timestamp,
    /// Kind-specific fields
    pub payload: Value,
    /// Producer tag
    pub source: EventSource,
}

impl Event {
    /// Create an event with an empty object payload
    #[must_use]
    pub fn new(kind: EventKind, source: EventSource, at: Timestamp) -> Self {
        Self {
            id: EventId::new(),
            kind,
            at,
            payload: Value::Object(Map::new()),
            source,
        }
    }

    /// Replace the payload
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set one payload field, turning a non-object payload into an object
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !self.payload.is_object() {
            self.payload = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.payload {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    /// `document.protected.requested` for the given networks
    #[must_use]
    pub fn protection_requested(
        networks: &[AnchorNetwork],
        source: EventSource,
        at: Timestamp,
    ) -> Self {
        let names: Vec<Value> = networks.iter().map(|n| Value::from(n.as_str())).collect();
        Self::new(EventKind::ProtectionRequested, source, at).with_field("networks", names)
    }

    /// Evidence or tracking
    #[must_use]
    pub fn class(&self) -> EventClass {
        self.kind.class()
    }

    /// String field from the payload
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Job that produced this event, if any
    #[must_use]
    pub fn job_id(&self) -> Option<JobId> {
        self.str_field("job_id").and_then(|s| s.parse().ok())
    }

    /// Network of an anchor event
    #[must_use]
    pub fn network(&self) -> Option<AnchorNetwork> {
        self.str_field("network").and_then(|s| s.parse().ok())
    }

    /// Networks listed by a protection request.
    ///
    /// `None` if the field is missing, not a list, or names an unknown network.
    #[must_use]
    pub fn networks(&self) -> Option<Vec<AnchorNetwork>> {
        let list = self.payload.get("networks")?.as_array()?;
        let mut out = Vec::with_capacity(list.len());
        for item in list {
            let net: AnchorNetwork = item.as_str()?.parse().ok()?;
            if !out.contains(&net) {
                out.push(net);
            }
        }
        Some(out)
    }
}

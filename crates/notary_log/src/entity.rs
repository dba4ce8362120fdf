//! Document entity - the unit that owns an event log.

use crate::event::{Event, EventKind, EventSource};
use notary_core::{EntityId, Fingerprint, OwnerId, Timestamp};
use serde::{Deserialize, Serialize};

/// Informational lifecycle status derived from the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    /// Registered, no protection requested
    Created,
    /// Protection requested, no timestamp yet
    ProtectionRequested,
    /// Timestamp obtained
    Timestamped,
    /// At least one anchor submitted or confirmed
    Anchoring,
    /// Artifact finalized
    Certified,
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::ProtectionRequested => "protection_requested",
            Self::Timestamped => "timestamped",
            Self::Anchoring => "anchoring",
            Self::Certified => "certified",
        };
        f.write_str(s)
    }
}

/// A document and its full event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntity {
    /// Entity id
    pub id: EntityId,
    /// Owning account
    pub owner_id: OwnerId,
    /// Content fingerprint being certified
    pub fingerprint: Fingerprint,
    /// Ordered, append-only events
    pub events: Vec<Event>,
    /// Number of events; the optimistic concurrency token
    pub version: u64,
    /// Registration time
    pub created_at: Timestamp,
    /// Time of the last append
    pub updated_at: Timestamp,
}

impl DocumentEntity {
    /// Build a new entity whose log starts with `document.created`
    #[must_use]
    pub fn new(
        id: EntityId,
        owner_id: OwnerId,
        fingerprint: Fingerprint,
        source: EventSource,
        at: Timestamp,
    ) -> Self {
        let created = Event::new(EventKind::DocumentCreated, source, at)
            .with_field("owner_id", owner_id.to_string())
            .with_field("fingerprint", fingerprint.to_hex());
        Self {
            id,
            owner_id,
            fingerprint,
            events: vec![created],
            version: 1,
            created_at: at,
            updated_at: at,
        }
    }

    /// Push an event and bump the version. Callers check the version first.
    pub fn push(&mut self, event: Event) -> u64 {
        self.updated_at = event.at;
        self.events.push(event);
        self.version = self.events.len() as u64;
        self.version
    }

    /// Index of the latest protection request
    #[must_use]
    pub fn active_request_index(&self) -> Option<usize> {
        self.events
            .iter()
            .rposition(|e| e.kind == EventKind::ProtectionRequested)
    }

    /// Lifecycle status relative to the latest protection request
    #[must_use]
    pub fn status(&self) -> LifecycleStatus {
        let Some(start) = self.active_request_index() else {
            return LifecycleStatus::Created;
        };
        let since = &self.events[start + 1..];
        let has = |kind: EventKind| since.iter().any(|e| e.kind == kind);

        if has(EventKind::ArtifactCompleted) {
            LifecycleStatus::Certified
        } else if has(EventKind::AnchorSubmitted) || has(EventKind::AnchorConfirmed) {
            LifecycleStatus::Anchoring
        } else if has(EventKind::TimestampCompleted) {
            LifecycleStatus::Timestamped
        } else {
            LifecycleStatus::ProtectionRequested
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AnchorNetwork;

    fn entity() -> DocumentEntity {
        DocumentEntity::new(
            EntityId::new(),
            OwnerId::new(),
            Fingerprint::compute(b"doc"),
            EventSource::user("ui"),
            Timestamp::now(),
        )
    }

    #[test]
    fn test_new_entity_has_created_event() {
        let e = entity();
        assert_eq!(e.version, 1);
        assert_eq!(e.events[0].kind, EventKind::DocumentCreated);
        assert_eq!(e.status(), LifecycleStatus::Created);
    }

    #[test]
    fn test_status_progression() {
        let mut e = entity();
        let at = Timestamp::now();
        e.push(Event::protection_requested(
            &[AnchorNetwork::Polygon],
            EventSource::user("ui"),
            at,
        ));
        assert_eq!(e.status(), LifecycleStatus::ProtectionRequested);

        e.push(Event::new(EventKind::TimestampCompleted, EventSource::pipeline("w"), at));
        assert_eq!(e.status(), LifecycleStatus::Timestamped);

        e.push(Event::new(EventKind::AnchorConfirmed, EventSource::pipeline("w"), at));
        assert_eq!(e.status(), LifecycleStatus::Anchoring);

        let v = e.push(Event::new(EventKind::ArtifactCompleted, EventSource::pipeline("w"), at));
        assert_eq!(v, 5);
        assert_eq!(e.status(), LifecycleStatus::Certified);
    }

    #[test]
    fn test_new_request_resets_status() {
        let mut e = entity();
        let at = Timestamp::now();
        e.push(Event::protection_requested(&[AnchorNetwork::Bitcoin], EventSource::user("ui"), at));
        e.push(Event::new(EventKind::TimestampCompleted, EventSource::pipeline("w"), at));
        e.push(Event::protection_requested(&[AnchorNetwork::Bitcoin], EventSource::user("ui"), at));
        assert_eq!(e.status(), LifecycleStatus::ProtectionRequested);
    }
}

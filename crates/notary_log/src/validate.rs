//! Append validation.
//!
//! Every event is checked against the entity it is appended to before it
//! is written. A rejected event is never retried.

use crate::entity::DocumentEntity;
use crate::error::{LogError, LogResult};
use crate::event::{Event, EventKind, Origin};

/// Origins allowed to append an event of `kind`
///
/// Submission and failure records steer the rules as much as evidence
/// does: a pending anchor suppresses resubmission. Only the paths that
/// perform side effects may write them.
fn authorized_origins(kind: EventKind) -> &'static [Origin] {
    match kind {
        EventKind::DocumentCreated => &[Origin::User, Origin::External, Origin::Legacy],
        EventKind::ProtectionRequested => &[Origin::User, Origin::External, Origin::Legacy],
        EventKind::AnchorConfirmed => &[Origin::Pipeline, Origin::Legacy, Origin::External],
        EventKind::TimestampCompleted
        | EventKind::ArtifactCompleted
        | EventKind::AnchorSubmitted
        | EventKind::TimestampFailed
        | EventKind::AnchorFailed
        | EventKind::ArtifactFailed => &[Origin::Pipeline, Origin::Legacy],
    }
}

fn require_str(event: &Event, key: &str) -> LogResult<()> {
    match event.str_field(key) {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(LogError::rejected(format!(
            "{} requires a non-empty '{}'",
            event.kind, key
        ))),
    }
}

/// Check that `event` may be appended to `entity`
///
/// # Errors
///
/// Returns `Rejected` with the first violated rule
pub fn validate_append(entity: &DocumentEntity, event: &Event) -> LogResult<()> {
    if event.kind == EventKind::DocumentCreated {
        return Err(LogError::rejected(
            "document.created is only valid as the first event",
        ));
    }

    if !authorized_origins(event.kind).contains(&event.source.origin) {
        return Err(LogError::rejected(format!(
            "source '{}' is not authorized to append {}",
            event.source, event.kind
        )));
    }

    if !event.payload.is_object() {
        return Err(LogError::rejected(format!(
            "{} payload must be an object",
            event.kind
        )));
    }

    match event.kind {
        EventKind::ProtectionRequested => match event.networks() {
            Some(nets) if !nets.is_empty() => {}
            _ => {
                return Err(LogError::rejected(
                    "protection request needs a non-empty list of known networks",
                ))
            }
        },
        EventKind::TimestampCompleted => {
            require_str(event, "token")?;
            if let Some(hash) = event.str_field("witness_hash") {
                if hash != entity.fingerprint.to_hex() {
                    return Err(LogError::rejected(
                        "tsa.confirmed witness_hash does not match the document fingerprint",
                    ));
                }
            }
        }
        EventKind::ArtifactCompleted => require_str(event, "storage_path")?,
        _ => {}
    }

    if event.kind.is_anchor() {
        if event.network().is_none() {
            return Err(LogError::rejected(format!(
                "{} needs a known 'network'",
                event.kind
            )));
        }
        if event.kind == EventKind::AnchorConfirmed {
            require_str(event, "tx_hash")?;
        }
    }

    Ok(())
}

/// Check that a freshly created entity holds a well-formed initial log
///
/// # Errors
///
/// Returns `Rejected` if the log is not exactly one `document.created`
pub fn validate_new_entity(entity: &DocumentEntity) -> LogResult<()> {
    match entity.events.as_slice() {
        [first] if first.kind == EventKind::DocumentCreated && entity.version == 1 => Ok(()),
        _ => Err(LogError::rejected(
            "a new entity must start with exactly one document.created event",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AnchorNetwork, EventSource};
    use notary_core::{EntityId, Fingerprint, OwnerId, Timestamp};

    fn entity() -> DocumentEntity {
        DocumentEntity::new(
            EntityId::new(),
            OwnerId::new(),
            Fingerprint::compute(b"doc"),
            EventSource::user("ui"),
            Timestamp::now(),
        )
    }

    fn ev(kind: EventKind, source: EventSource) -> Event {
        Event::new(kind, source, Timestamp::now())
    }

    #[test]
    fn test_created_only_first() {
        let e = entity();
        let err = validate_append(&e, &ev(EventKind::DocumentCreated, EventSource::user("ui")));
        assert!(matches!(err, Err(LogError::Rejected { .. })));
        assert!(validate_new_entity(&e).is_ok());
    }

    #[test]
    fn test_request_requires_known_networks() {
        let e = entity();
        let ok = Event::protection_requested(&[AnchorNetwork::Polygon], EventSource::user("ui"), Timestamp::now());
        assert!(validate_append(&e, &ok).is_ok());

        let empty = Event::protection_requested(&[], EventSource::user("ui"), Timestamp::now());
        assert!(validate_append(&e, &empty).is_err());

        let unknown = ok.clone().with_field("networks", vec!["solana"]);
        assert!(validate_append(&e, &unknown).is_err());
    }

    #[test]
    fn test_evidence_origin_authorization() {
        let e = entity();
        let request = Event::protection_requested(&[AnchorNetwork::Polygon], EventSource::pipeline("w"), Timestamp::now());
        assert!(validate_append(&e, &request).is_err());

        let tsa = ev(EventKind::TimestampCompleted, EventSource::user("ui")).with_field("token", "t");
        assert!(validate_append(&e, &tsa).is_err());

        let tsa = ev(EventKind::TimestampCompleted, EventSource::pipeline("w")).with_field("token", "t");
        assert!(validate_append(&e, &tsa).is_ok());
    }

    #[test]
    fn test_tsa_requires_token_and_matching_witness() {
        let e = entity();
        let no_token = ev(EventKind::TimestampCompleted, EventSource::pipeline("w"));
        assert!(validate_append(&e, &no_token).is_err());

        let wrong = no_token
            .clone()
            .with_field("token", "t")
            .with_field("witness_hash", Fingerprint::compute(b"other").to_hex());
        assert!(validate_append(&e, &wrong).is_err());

        let right = no_token
            .with_field("token", "t")
            .with_field("witness_hash", e.fingerprint.to_hex());
        assert!(validate_append(&e, &right).is_ok());
    }

    #[test]
    fn test_anchor_fields() {
        let e = entity();
        let no_net = ev(EventKind::AnchorSubmitted, EventSource::pipeline("w"));
        assert!(validate_append(&e, &no_net).is_err());

        let submitted = no_net.with_field("network", "bitcoin");
        assert!(validate_append(&e, &submitted).is_ok());

        let confirmed = ev(EventKind::AnchorConfirmed, EventSource::external("webhook"))
            .with_field("network", "polygon");
        assert!(validate_append(&e, &confirmed).is_err());
        let confirmed = confirmed.with_field("tx_hash", "0xabc");
        assert!(validate_append(&e, &confirmed).is_ok());
    }

    #[test]
    fn test_artifact_requires_path() {
        let e = entity();
        let artifact = ev(EventKind::ArtifactCompleted, EventSource::pipeline("w"));
        assert!(validate_append(&e, &artifact).is_err());
        assert!(validate_append(&e, &artifact.with_field("storage_path", "certs/a.pdf")).is_ok());
    }

    #[test]
    fn test_tracking_events_from_side_effect_paths_only() {
        let e = entity();
        let failed = ev(EventKind::TimestampFailed, EventSource::legacy("trigger"));
        assert!(validate_append(&e, &failed).is_ok());

        for source in [EventSource::user("ui"), EventSource::external("webhook")] {
            let failed = ev(EventKind::AnchorFailed, source.clone()).with_field("network", "polygon");
            assert!(matches!(validate_append(&e, &failed), Err(LogError::Rejected { .. })));
        }
    }

    #[test]
    fn test_user_cannot_mark_anchor_pending() {
        let e = entity();
        let forged = ev(EventKind::AnchorSubmitted, EventSource::user("ui"))
            .with_field("network", "polygon")
            .with_field("tx_hash", "0xforged");
        let err = validate_append(&e, &forged).unwrap_err();
        assert!(matches!(err, LogError::Rejected { .. }));
        assert!(err.to_string().contains("not authorized"));

        let from_worker = ev(EventKind::AnchorSubmitted, EventSource::pipeline("w"))
            .with_field("network", "polygon");
        assert!(validate_append(&e, &from_worker).is_ok());
    }
}

//! Authority rules.
//!
//! Pure, deterministic functions from a document's events to decisions.
//! Everything is evaluated relative to the latest protection request;
//! events before it never count as completion.

use crate::decision::{Decision, DecisionId, DecisionReason};
use notary_log::{AnchorNetwork, Event, EventKind};
use std::collections::BTreeSet;

/// What the log says about the active protection request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Facts {
    /// Networks listed by the active request
    pub networks: Vec<AnchorNetwork>,
    /// `tsa.confirmed` seen after the request
    pub timestamped: bool,
    /// Networks with `anchor.confirmed` after the request
    pub confirmed: BTreeSet<AnchorNetwork>,
    /// Networks with an `anchor.submitted` not followed by `anchor.failed`
    pub pending: BTreeSet<AnchorNetwork>,
    /// `artifact.finalized` seen after the request
    pub finalized: bool,
}

impl Facts {
    /// Project the log. `None` when no protection request exists.
    #[must_use]
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let start = events
            .iter()
            .rposition(|e| e.kind == EventKind::ProtectionRequested)?;

        let mut facts = Self {
            networks: events[start].networks().unwrap_or_default(),
            ..Self::default()
        };

        for event in &events[start + 1..] {
            match event.kind {
                EventKind::TimestampCompleted => facts.timestamped = true,
                EventKind::ArtifactCompleted => facts.finalized = true,
                EventKind::AnchorConfirmed => {
                    if let Some(n) = event.network() {
                        facts.confirmed.insert(n);
                    }
                }
                EventKind::AnchorSubmitted => {
                    if let Some(n) = event.network() {
                        facts.pending.insert(n);
                    }
                }
                EventKind::AnchorFailed => {
                    if let Some(n) = event.network() {
                        facts.pending.remove(&n);
                    }
                }
                _ => {}
            }
        }
        Some(facts)
    }

    fn all_anchors_confirmed(&self) -> bool {
        self.networks.iter().all(|n| self.confirmed.contains(n))
    }
}

/// Evaluate one rule over a log
#[must_use]
pub fn decide(decision: DecisionId, events: &[Event]) -> Decision {
    let Some(facts) = Facts::from_events(events) else {
        return Decision::not_required(decision, DecisionReason::NoActiveRequest);
    };
    decide_with(decision, &facts)
}

fn decide_with(decision: DecisionId, facts: &Facts) -> Decision {
    use DecisionReason as R;

    let verdict = match decision {
        DecisionId::RunTimestamp => {
            if facts.timestamped {
                Err(R::AlreadyCompleted)
            } else {
                Ok(())
            }
        }
        DecisionId::SubmitAnchor(network) => {
            if !facts.networks.contains(&network) {
                Err(R::NotRequested)
            } else if facts.confirmed.contains(&network) {
                Err(R::AlreadyCompleted)
            } else if !facts.timestamped {
                Err(R::AwaitingTimestamp)
            } else if facts.pending.contains(&network) {
                Err(R::AnchorPending)
            } else {
                Ok(())
            }
        }
        DecisionId::BuildArtifact => {
            if facts.finalized {
                Err(R::AlreadyCompleted)
            } else if !facts.timestamped {
                Err(R::AwaitingTimestamp)
            } else if !facts.all_anchors_confirmed() {
                Err(R::AwaitingAnchors)
            } else {
                Ok(())
            }
        }
    };

    match verdict {
        Ok(()) => Decision::required(decision),
        Err(reason) => Decision::not_required(decision, reason),
    }
}

/// Decisions that apply to the active request: the timestamp, one anchor
/// per requested network, and the artifact
#[must_use]
pub fn applicable_decisions(events: &[Event]) -> Vec<DecisionId> {
    match Facts::from_events(events) {
        Some(facts) => applicable_for(&facts),
        None => Vec::new(),
    }
}

fn applicable_for(facts: &Facts) -> Vec<DecisionId> {
    let mut out = Vec::with_capacity(facts.networks.len() + 2);
    out.push(DecisionId::RunTimestamp);
    out.extend(facts.networks.iter().map(|n| DecisionId::SubmitAnchor(*n)));
    out.push(DecisionId::BuildArtifact);
    out
}

/// Evaluate every applicable rule, projecting the log once
#[must_use]
pub fn decide_all(events: &[Event]) -> Vec<Decision> {
    let Some(facts) = Facts::from_events(events) else {
        return Vec::new();
    };
    applicable_for(&facts)
        .into_iter()
        .map(|d| decide_with(d, &facts))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notary_core::Timestamp;
    use notary_log::EventSource;

    fn ev(kind: EventKind) -> Event {
        Event::new(kind, EventSource::pipeline("test"), Timestamp::now())
    }

    fn anchor(kind: EventKind, network: AnchorNetwork) -> Event {
        ev(kind).with_field("network", network.as_str())
    }

    fn request(networks: &[AnchorNetwork]) -> Event {
        Event::protection_requested(networks, EventSource::user("ui"), Timestamp::now())
    }

    fn required(decisions: &[Decision]) -> Vec<DecisionId> {
        decisions
            .iter()
            .filter(|d| d.required)
            .map(|d| d.decision)
            .collect()
    }

    const POLY: AnchorNetwork = AnchorNetwork::Polygon;
    const BTC: AnchorNetwork = AnchorNetwork::Bitcoin;

    #[test]
    fn test_no_request_nothing_required() {
        let events = vec![ev(EventKind::DocumentCreated)];
        assert!(decide_all(&events).is_empty());
        let d = decide(DecisionId::RunTimestamp, &events);
        assert!(!d.required);
        assert_eq!(d.reason, DecisionReason::NoActiveRequest);
    }

    #[test]
    fn test_pipeline_progression() {
        let mut events = vec![ev(EventKind::DocumentCreated), request(&[POLY, BTC])];
        assert_eq!(required(&decide_all(&events)), vec![DecisionId::RunTimestamp]);

        events.push(ev(EventKind::TimestampCompleted));
        assert_eq!(
            required(&decide_all(&events)),
            vec![DecisionId::SubmitAnchor(POLY), DecisionId::SubmitAnchor(BTC)]
        );

        events.push(anchor(EventKind::AnchorConfirmed, POLY));
        assert_eq!(required(&decide_all(&events)), vec![DecisionId::SubmitAnchor(BTC)]);
        assert_eq!(
            decide(DecisionId::BuildArtifact, &events).reason,
            DecisionReason::AwaitingAnchors
        );

        events.push(anchor(EventKind::AnchorConfirmed, BTC));
        assert_eq!(required(&decide_all(&events)), vec![DecisionId::BuildArtifact]);

        events.push(ev(EventKind::ArtifactCompleted));
        assert!(required(&decide_all(&events)).is_empty());
    }

    #[test]
    fn test_pending_anchor_suppresses_resubmission() {
        let mut events = vec![request(&[POLY]), ev(EventKind::TimestampCompleted)];
        events.push(anchor(EventKind::AnchorSubmitted, POLY));
        let d = decide(DecisionId::SubmitAnchor(POLY), &events);
        assert!(!d.required);
        assert_eq!(d.reason, DecisionReason::AnchorPending);

        events.push(anchor(EventKind::AnchorFailed, POLY));
        assert!(decide(DecisionId::SubmitAnchor(POLY), &events).required);
    }

    #[test]
    fn test_unrequested_network_not_applicable() {
        let events = vec![request(&[POLY]), ev(EventKind::TimestampCompleted)];
        assert_eq!(
            decide(DecisionId::SubmitAnchor(BTC), &events).reason,
            DecisionReason::NotRequested
        );
        assert!(!applicable_decisions(&events).contains(&DecisionId::SubmitAnchor(BTC)));
    }

    #[test]
    fn test_new_request_starts_new_epoch() {
        let mut events = vec![
            request(&[POLY]),
            ev(EventKind::TimestampCompleted),
            anchor(EventKind::AnchorConfirmed, POLY),
            ev(EventKind::ArtifactCompleted),
        ];
        assert!(required(&decide_all(&events)).is_empty());

        events.push(request(&[POLY]));
        assert_eq!(required(&decide_all(&events)), vec![DecisionId::RunTimestamp]);
    }

    #[test]
    fn test_verdicts_carry_rules_version() {
        let events = vec![request(&[POLY])];
        assert!(decide_all(&events).iter().all(|d| d.rules_version == crate::RULES_VERSION));
    }

    fn arb_event() -> impl proptest::strategy::Strategy<Value = Event> {
        use proptest::prelude::*;
        (0usize..8, 0usize..2).prop_map(|(k, n)| {
            let net = AnchorNetwork::ALL[n];
            match k {
                0 => request(&[net]),
                1 => request(&AnchorNetwork::ALL),
                2 => ev(EventKind::TimestampCompleted),
                3 => anchor(EventKind::AnchorSubmitted, net),
                4 => anchor(EventKind::AnchorConfirmed, net),
                5 => anchor(EventKind::AnchorFailed, net),
                6 => ev(EventKind::ArtifactCompleted),
                _ => ev(EventKind::TimestampFailed),
            }
        })
    }

    fn completion_kind(d: DecisionId) -> EventKind {
        match d {
            DecisionId::RunTimestamp => EventKind::TimestampCompleted,
            DecisionId::SubmitAnchor(_) => EventKind::AnchorConfirmed,
            DecisionId::BuildArtifact => EventKind::ArtifactCompleted,
        }
    }

    proptest::proptest! {
        #[test]
        fn prop_decide_is_deterministic(events in proptest::collection::vec(arb_event(), 0..16)) {
            proptest::prop_assert_eq!(decide_all(&events), decide_all(&events));
        }

        #[test]
        fn prop_completion_is_monotonic(events in proptest::collection::vec(arb_event(), 0..16)) {
            let Some(start) = events.iter().rposition(|e| e.kind == EventKind::ProtectionRequested) else {
                return Ok(());
            };
            for decision in applicable_decisions(&events) {
                let done = events[start + 1..].iter().any(|e| {
                    e.kind == completion_kind(decision)
                        && match decision {
                            DecisionId::SubmitAnchor(n) => e.network() == Some(n),
                            _ => true,
                        }
                });
                if done {
                    proptest::prop_assert!(!decide(decision, &events).required);
                }
            }
        }

        #[test]
        fn prop_anchor_requires_timestamp(events in proptest::collection::vec(arb_event(), 0..16)) {
            let facts = Facts::from_events(&events);
            for d in decide_all(&events) {
                if d.required && d.decision != DecisionId::RunTimestamp {
                    proptest::prop_assert!(facts.as_ref().is_some_and(|f| f.timestamped));
                }
            }
        }
    }
}

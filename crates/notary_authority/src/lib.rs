//! NOTARY Authority
//!
//! Decides what work a document still needs and who is allowed to do it.
//! Rules are pure functions over a document's events; the gate maps each
//! decision to either the legacy trigger path or the canonical pipeline.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decision;
pub mod gate;
pub mod rules;

pub use decision::{Decision, DecisionId, DecisionReason, RULES_VERSION};
pub use gate::{
    Authority, AuthorityGate, FlagRecord, FlagStore, GateError, GateResult, GateSnapshot,
    InMemoryFlagStore, LegacyTrigger, TriggerOutcome,
};
pub use notary_log::AnchorNetwork;
pub use rules::{applicable_decisions, decide, decide_all, Facts};

//! NOTARY Event Log
//!
//! Per-document, append-only event logs with optimistic concurrency.
//! A document's version is the number of events in its log; every append
//! names the version it expects and is validated before it is written.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod append;
pub mod entity;
pub mod error;
pub mod event;
pub mod log;
pub mod memory;
pub mod validate;

pub use append::{append_result_idempotent, append_with_retry, AppendOutcome, DEFAULT_APPEND_RETRIES};
pub use entity::{DocumentEntity, LifecycleStatus};
pub use error::{LogError, LogResult};
pub use event::{AnchorNetwork, Event, EventClass, EventKind, EventSource, Origin};
pub use log::EventLog;
pub use memory::InMemoryEventLog;
pub use validate::{validate_append, validate_new_entity};

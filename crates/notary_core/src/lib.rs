//! NOTARY Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Identifiers, content fingerprints, timestamps and the clock seam
//! shared by every other crate in the pipeline.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod fingerprint;
pub mod id;
pub mod time;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use fingerprint::Fingerprint;
pub use id::{EntityId, EventId, JobId, OwnerId, WorkerId};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};

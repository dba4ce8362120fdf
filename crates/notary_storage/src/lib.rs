//! NOTARY Storage
//!
//! One redb database file holding the event log, the job queue and the
//! authority flags. Every operation runs in a single redb transaction;
//! redb admits one writer at a time, which gives the version check on
//! append, the uniqueness check on insert and the conditional updates on
//! claim and complete their atomicity.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod flags;
pub mod log;
pub mod queue;
pub mod schema;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use store::RedbStore;

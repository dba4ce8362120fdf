//! NOTARY Job Queue
//!
//! A neutral queue of side-effect jobs. At most one non-terminal job may
//! exist per dedupe key (`<entity_id>:<job_type>`); workers claim jobs
//! under a time-bounded lease and must still hold it to report a result.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dead;
pub mod error;
pub mod job;
pub mod memory;
pub mod queue;
pub mod retry;

pub use dead::{DeadLetter, DeadLetterReport, DeadReason, FailureKind};
pub use error::{QueueError, QueueResult};
pub use job::{DedupeKey, Job, JobRun, JobStatus, JobType, NewJob, RunOutcome};
pub use memory::InMemoryJobQueue;
pub use queue::{JobQueue, QueueCounts};
pub use retry::{RetryPolicies, RetryPolicy, RetryVerdict};

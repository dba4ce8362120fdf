//! Append helpers layered on the raw version-checked append.

use crate::error::{LogError, LogResult};
use crate::event::Event;
use crate::log::EventLog;
use notary_core::EntityId;
use tracing::{debug, warn};

/// Default number of read-append attempts before giving up on conflicts
pub const DEFAULT_APPEND_RETRIES: u32 = 5;

/// Result of an idempotent append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The event was written; carries the new event count
    Appended(u64),
    /// An event for the same job was already in the log
    AlreadyPresent,
}

/// Append `event` at whatever the current version is, re-reading and
/// retrying on `ConcurrentAppendConflict` up to `max_attempts` times.
///
/// # Errors
///
/// Returns the last conflict once attempts run out, or any other error
/// immediately
pub async fn append_with_retry(
    log: &dyn EventLog,
    entity_id: EntityId,
    event: Event,
    max_attempts: u32,
) -> LogResult<u64> {
    let attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let entity = log.read(entity_id).await?;
        match log.append(entity_id, entity.version, event.clone()).await {
            Err(err) if err.is_conflict() && attempt < attempts => {
                debug!(%entity_id, attempt, "append conflict, retrying");
            }
            other => return other,
        }
    }
}

/// Append a result event unless an event carrying the same `job_id` is
/// already in the log. Events without a `job_id` are always appended.
///
/// The existence check is repeated after every conflict, so a concurrent
/// writer of the same result is observed and not duplicated.
///
/// # Errors
///
/// Returns `ConcurrentAppendConflict` once attempts run out, or any other
/// error immediately
pub async fn append_result_idempotent(
    log: &dyn EventLog,
    entity_id: EntityId,
    event: Event,
    max_attempts: u32,
) -> LogResult<AppendOutcome> {
    let job_id = event.job_id();
    let attempts = max_attempts.max(1);
    let mut last_err: Option<LogError> = None;

    for attempt in 1..=attempts {
        let entity = log.read(entity_id).await?;
        if let Some(job_id) = job_id {
            if entity.events.iter().any(|e| e.job_id() == Some(job_id)) {
                debug!(%entity_id, %job_id, kind = %event.kind, "result already present");
                return Ok(AppendOutcome::AlreadyPresent);
            }
        }
        match log.append(entity_id, entity.version, event.clone()).await {
            Ok(count) => return Ok(AppendOutcome::Appended(count)),
            Err(err) if err.is_conflict() => {
                debug!(%entity_id, attempt, "result append conflict, retrying");
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    warn!(%entity_id, kind = %event.kind, "result append gave up after {} conflicts", attempts);
    Err(last_err.unwrap_or(LogError::Storage {
        reason: "append retries exhausted".to_string(),
    }))
}

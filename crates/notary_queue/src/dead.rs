//! Dead-letter diagnostics.
//!
//! A failed job's error text starts with a tag naming the cause when the
//! cause is known. The report covers every dedupe key whose newest job
//! failed and derives a reason from the tag and the attempt budget.

use crate::job::{DedupeKey, Job, JobStatus, JobType};
use crate::retry::RetryPolicies;
use notary_core::{EntityId, JobId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const TTL_TAG: &str = "ttl_exceeded";
const PRECONDITION_TAG: &str = "precondition_failed";

/// Cause of a failed attempt, as recorded in the job's error text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The attempt ran past its time budget
    Timeout,
    /// The attempt could not start: missing entity, refused request,
    /// provider not configured
    Precondition,
    /// Any other handler or provider failure
    Handler,
}

impl FailureKind {
    const fn tag(self) -> Option<&'static str> {
        match self {
            Self::Timeout => Some(TTL_TAG),
            Self::Precondition => Some(PRECONDITION_TAG),
            Self::Handler => None,
        }
    }

    /// Error text for a failure of this kind
    #[must_use]
    pub fn describe(self, message: impl fmt::Display) -> String {
        match self.tag() {
            Some(tag) => format!("{}: {}", tag, message),
            None => message.to_string(),
        }
    }

    /// Read the kind back from error text
    #[must_use]
    pub fn of(error: &str) -> Self {
        let tagged = |tag: &str| {
            error
                .strip_prefix(tag)
                .is_some_and(|rest| rest.starts_with(':'))
        };
        if tagged(TTL_TAG) {
            Self::Timeout
        } else if tagged(PRECONDITION_TAG) {
            Self::Precondition
        } else {
            Self::Handler
        }
    }
}

/// Why a dedupe key stopped making progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadReason {
    /// The last attempt timed out
    TtlExceeded,
    /// Every allowed attempt failed
    MaxAttemptsExceeded,
    /// The last attempt failed in the handler
    HandlerError,
    /// The last attempt could not start
    PreconditionFailed,
}

impl DeadReason {
    /// Reason for a failed job under an attempt limit. Tagged causes win
    /// over the attempt count.
    #[must_use]
    pub fn derive(job: &Job, max_attempts: u32) -> Self {
        match FailureKind::of(job.last_error.as_deref().unwrap_or_default()) {
            FailureKind::Timeout => Self::TtlExceeded,
            FailureKind::Precondition => Self::PreconditionFailed,
            FailureKind::Handler if job.attempt >= max_attempts => Self::MaxAttemptsExceeded,
            FailureKind::Handler => Self::HandlerError,
        }
    }

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TtlExceeded => "ttl_exceeded",
            Self::MaxAttemptsExceeded => "max_attempts_exceeded",
            Self::HandlerError => "handler_error",
            Self::PreconditionFailed => "precondition_failed",
        }
    }
}

impl fmt::Display for DeadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The newest failed job of one dedupe key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Key that stopped
    pub dedupe_key: DedupeKey,
    /// Newest job under the key
    pub job_id: JobId,
    /// Job type
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Target entity
    pub entity_id: EntityId,
    /// Attempt number of the newest job
    pub attempts: u32,
    /// Attempt limit of the job type
    pub max_attempts: u32,
    /// Derived reason
    pub reason: DeadReason,
    /// No further retry will be queued
    pub exhausted: bool,
    /// Error of the newest job
    pub last_error: Option<String>,
    /// When the newest job failed
    pub failed_at: Timestamp,
}

/// Dead letters with per-type and per-reason totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterReport {
    /// Number of listed keys
    pub total: usize,
    /// Keys per job type
    pub by_type: BTreeMap<JobType, usize>,
    /// Keys per reason
    pub by_reason: BTreeMap<DeadReason, usize>,
    /// Newest failure first
    pub jobs: Vec<DeadLetter>,
}

impl DeadLetterReport {
    /// Build a report from the newest job of each failed key. With
    /// `exhausted_only`, keys still inside their attempt budget are left out.
    #[must_use]
    pub fn build(
        failures: impl IntoIterator<Item = Job>,
        policies: &RetryPolicies,
        exhausted_only: bool,
    ) -> Self {
        let mut jobs: Vec<DeadLetter> = failures
            .into_iter()
            .filter(|job| job.status == JobStatus::Failed)
            .map(|job| {
                let max_attempts = policies.for_job(job.job_type).max_attempts;
                DeadLetter {
                    reason: DeadReason::derive(&job, max_attempts),
                    exhausted: job.attempt >= max_attempts,
                    dedupe_key: job.dedupe_key,
                    job_id: job.id,
                    job_type: job.job_type,
                    entity_id: job.entity_id,
                    attempts: job.attempt,
                    max_attempts,
                    last_error: job.last_error,
                    failed_at: job.updated_at,
                }
            })
            .filter(|letter| letter.exhausted || !exhausted_only)
            .collect();
        jobs.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));

        let mut report = Self {
            total: jobs.len(),
            ..Self::default()
        };
        for letter in &jobs {
            *report.by_type.entry(letter.job_type).or_default() += 1;
            *report.by_reason.entry(letter.reason).or_default() += 1;
        }
        report.jobs = jobs;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NewJob;
    use crate::retry::RetryPolicy;
    use notary_core::WorkerId;
    use std::time::Duration;

    fn at(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms).unwrap()
    }

    fn failed(job_type: JobType, attempt: u32, error: &str, ms: i64) -> Job {
        let worker = WorkerId::new("w");
        let mut job = NewJob::new(job_type, EntityId::new())
            .with_attempt(attempt)
            .into_job(at(0));
        job.take_lease(&worker, at(0), Duration::from_secs(3_600));
        job.finish(&worker, JobStatus::Failed, Some(error.to_string()), at(ms))
            .unwrap();
        job
    }

    fn policies() -> RetryPolicies {
        RetryPolicies {
            run_timestamp: RetryPolicy::new(3, 1_000, 10_000, 2),
            build_artifact: RetryPolicy::new(2, 1_000, 10_000, 2),
            ..RetryPolicies::default()
        }
    }

    #[test]
    fn test_failure_kind_tags() {
        let timeout = FailureKind::Timeout.describe("execution timed out after 10 ms");
        assert_eq!(timeout, "ttl_exceeded: execution timed out after 10 ms");
        assert_eq!(FailureKind::of(&timeout), FailureKind::Timeout);

        let refused = FailureKind::Precondition.describe("tsa is not configured");
        assert_eq!(FailureKind::of(&refused), FailureKind::Precondition);

        assert_eq!(FailureKind::Handler.describe("boom"), "boom");
        assert_eq!(FailureKind::of("boom"), FailureKind::Handler);
        assert_eq!(FailureKind::of("ttl_exceededness"), FailureKind::Handler);
    }

    #[test]
    fn test_reason_derivation() {
        let exhausted = failed(JobType::RunTimestamp, 3, "tsa unavailable: 503", 10);
        assert_eq!(DeadReason::derive(&exhausted, 3), DeadReason::MaxAttemptsExceeded);

        let early = failed(JobType::RunTimestamp, 1, "tsa unavailable: 503", 10);
        assert_eq!(DeadReason::derive(&early, 3), DeadReason::HandlerError);

        let timeout = failed(JobType::RunTimestamp, 3, &FailureKind::Timeout.describe("slow"), 10);
        assert_eq!(DeadReason::derive(&timeout, 3), DeadReason::TtlExceeded);

        let refused = failed(JobType::RunTimestamp, 1, &FailureKind::Precondition.describe("no"), 10);
        assert_eq!(DeadReason::derive(&refused, 3), DeadReason::PreconditionFailed);
    }

    #[test]
    fn test_report_totals_and_order() {
        let letters = vec![
            failed(JobType::RunTimestamp, 3, "tsa unavailable", 100),
            failed(JobType::BuildArtifact, 2, &FailureKind::Timeout.describe("slow"), 300),
            failed(JobType::RunTimestamp, 1, "tsa unavailable", 200),
        ];

        let all = DeadLetterReport::build(letters.clone(), &policies(), false);
        assert_eq!(all.total, 3);
        assert_eq!(all.jobs[0].job_type, JobType::BuildArtifact);
        assert_eq!(all.by_type[&JobType::RunTimestamp], 2);
        assert_eq!(all.by_reason[&DeadReason::HandlerError], 1);
        assert!(!all.jobs[1].exhausted);

        let dead = DeadLetterReport::build(letters, &policies(), true);
        assert_eq!(dead.total, 2);
        assert!(dead.jobs.iter().all(|l| l.exhausted));
        assert_eq!(dead.by_reason[&DeadReason::TtlExceeded], 1);
        assert_eq!(dead.by_reason[&DeadReason::MaxAttemptsExceeded], 1);

        let json = serde_json::to_value(&dead).unwrap();
        assert_eq!(json["by_reason"]["max_attempts_exceeded"], 1);
        assert_eq!(json["jobs"][0]["type"], "build_artifact");
    }
}

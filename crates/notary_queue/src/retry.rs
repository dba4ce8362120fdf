//! Retry policy for failed jobs.
//!
//! A retry is a new job row under the same dedupe key with the attempt
//! number bumped. The policy decides, from the failed rows of a key,
//! whether that row may be inserted now.

use crate::job::{Job, JobStatus, JobType};
use notary_core::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff and dead-letter limits for one job type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed before the key is exhausted
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay_ms: u64,
    /// Upper bound on any delay
    pub max_delay_ms: u64,
    /// Multiplier per further failure; 1 keeps the delay constant
    pub factor: u32,
}

impl RetryPolicy {
    /// Create a policy
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64, factor: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            factor,
        }
    }

    /// Set the attempt limit
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base delay
    #[must_use]
    pub const fn with_base_delay(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Delay after the `attempt`-th failure: `min(max, base * factor^(attempt-1))`
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let mult = u64::from(self.factor).checked_pow(exp).unwrap_or(u64::MAX);
        let ms = self.base_delay_ms.saturating_mul(mult).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Decide from the jobs of one dedupe key. Only failures after the last
    /// success count; callers pass the jobs relevant to the current request.
    #[must_use]
    pub fn verdict(&self, history: &[Job], now: Timestamp) -> RetryVerdict {
        let since_success = match history
            .iter()
            .rposition(|j| j.status == JobStatus::Succeeded)
        {
            Some(i) => &history[i + 1..],
            None => history,
        };

        let Some(last) = since_success
            .iter()
            .filter(|j| j.status == JobStatus::Failed)
            .max_by_key(|j| (j.attempt, j.updated_at))
        else {
            return RetryVerdict::Ready { attempt: 1 };
        };

        if last.attempt >= self.max_attempts {
            return RetryVerdict::Exhausted {
                attempts: last.attempt,
            };
        }

        let until = last.updated_at.plus(self.delay_for(last.attempt));
        if now < until {
            RetryVerdict::Backoff { until }
        } else {
            RetryVerdict::Ready {
                attempt: last.attempt + 1,
            }
        }
    }
}

/// What the retry policy allows for a dedupe key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Insert a job with this attempt number
    Ready {
        /// Attempt number for the new row
        attempt: u32,
    },
    /// Wait until the backoff elapses
    Backoff {
        /// Earliest retry time
        until: Timestamp,
    },
    /// Attempts used up; the key is dead-lettered
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
}

/// Retry policies per job type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicies {
    /// Timestamp jobs
    pub run_timestamp: RetryPolicy,
    /// Polygon anchor jobs
    pub submit_anchor_polygon: RetryPolicy,
    /// Bitcoin anchor jobs
    pub submit_anchor_bitcoin: RetryPolicy,
    /// Artifact jobs
    pub build_artifact: RetryPolicy,
}

impl RetryPolicies {
    /// Policy for a job type
    #[must_use]
    pub const fn for_job(&self, job_type: JobType) -> &RetryPolicy {
        match job_type {
            JobType::RunTimestamp => &self.run_timestamp,
            JobType::SubmitAnchorPolygon => &self.submit_anchor_polygon,
            JobType::SubmitAnchorBitcoin => &self.submit_anchor_bitcoin,
            JobType::BuildArtifact => &self.build_artifact,
        }
    }
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            run_timestamp: RetryPolicy::new(10, 30_000, 600_000, 2),
            submit_anchor_polygon: RetryPolicy::new(20, 60_000, 600_000, 2),
            // 24h of attempts at a constant 5 minutes
            submit_anchor_bitcoin: RetryPolicy::new(288, 300_000, 300_000, 1),
            build_artifact: RetryPolicy::new(10, 30_000, 600_000, 2),
        }
    }
}

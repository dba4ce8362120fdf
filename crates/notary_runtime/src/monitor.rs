//! Pipeline counters.
//!
//! Counters only. Deciding whether the pipeline is healthy from them is
//! left to whatever scrapes the snapshot.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared pipeline counters, updated by the evaluator and the engine
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    evaluations: AtomicU64,
    evaluation_failures: AtomicU64,
    jobs_inserted: AtomicU64,
    duplicate_inserts: AtomicU64,
    jobs_exhausted: AtomicU64,
    jobs_claimed: AtomicU64,
    jobs_reclaimed: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    leases_lost: AtomicU64,
    results_appended: AtomicU64,
    results_deduplicated: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PipelineMetrics {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entity evaluation
    pub fn record_evaluation(&self) {
        bump(&self.evaluations);
    }

    /// Record an evaluation that errored
    pub fn record_evaluation_failure(&self) {
        bump(&self.evaluation_failures);
    }

    /// Record a queued job
    pub fn record_insert(&self) {
        bump(&self.jobs_inserted);
    }

    /// Record a swallowed duplicate insert
    pub fn record_duplicate(&self) {
        bump(&self.duplicate_inserts);
    }

    /// Record a dedupe key that ran out of attempts
    pub fn record_exhausted(&self) {
        bump(&self.jobs_exhausted);
    }

    /// Record a claim; `reclaimed` when an expired lease was taken over
    pub fn record_claim(&self, reclaimed: bool) {
        bump(&self.jobs_claimed);
        if reclaimed {
            bump(&self.jobs_reclaimed);
        }
    }

    /// Record a completed job
    pub fn record_success(&self) {
        bump(&self.jobs_succeeded);
    }

    /// Record a failed job
    pub fn record_failure(&self) {
        bump(&self.jobs_failed);
    }

    /// Record a write refused because the lease moved on
    pub fn record_lease_lost(&self) {
        bump(&self.leases_lost);
    }

    /// Record a result event write; `deduplicated` when it was already logged
    pub fn record_result(&self, deduplicated: bool) {
        if deduplicated {
            bump(&self.results_deduplicated);
        } else {
            bump(&self.results_appended);
        }
    }

    /// Read every counter
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            evaluations: get(&self.evaluations),
            evaluation_failures: get(&self.evaluation_failures),
            jobs_inserted: get(&self.jobs_inserted),
            duplicate_inserts: get(&self.duplicate_inserts),
            jobs_exhausted: get(&self.jobs_exhausted),
            jobs_claimed: get(&self.jobs_claimed),
            jobs_reclaimed: get(&self.jobs_reclaimed),
            jobs_succeeded: get(&self.jobs_succeeded),
            jobs_failed: get(&self.jobs_failed),
            leases_lost: get(&self.leases_lost),
            results_appended: get(&self.results_appended),
            results_deduplicated: get(&self.results_deduplicated),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Entity evaluations
    pub evaluations: u64,
    /// Evaluations that errored
    pub evaluation_failures: u64,
    /// Jobs queued
    pub jobs_inserted: u64,
    /// Inserts that lost the dedupe race
    pub duplicate_inserts: u64,
    /// Dedupe keys found exhausted
    pub jobs_exhausted: u64,
    /// Claims
    pub jobs_claimed: u64,
    /// Claims that took over an expired lease
    pub jobs_reclaimed: u64,
    /// Jobs completed
    pub jobs_succeeded: u64,
    /// Jobs failed
    pub jobs_failed: u64,
    /// Writes refused with `LeaseExpired`
    pub leases_lost: u64,
    /// Result events written
    pub results_appended: u64,
    /// Result events already present
    pub results_deduplicated: u64,
}

impl MetricsSnapshot {
    /// Share of finished jobs that succeeded (0.0 - 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let finished = self.jobs_succeeded + self.jobs_failed;
        if finished == 0 {
            return 1.0;
        }
        self.jobs_succeeded as f64 / finished as f64
    }
}

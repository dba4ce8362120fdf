//! Periodic wake.
//!
//! A parameterless sweep over every document. Inline evaluation after an
//! append is an optimization; the wake is what guarantees that a missed or
//! failed evaluation, or an elapsed retry backoff, is eventually acted on.

use crate::error::RuntimeResult;
use crate::evaluator::{DecisionEvaluator, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Periodic evaluator sweep
#[derive(Debug, Clone)]
pub struct Wake {
    evaluator: Arc<DecisionEvaluator>,
    interval: Duration,
}

impl Wake {
    /// Create a wake loop with the given period
    #[must_use]
    pub fn new(evaluator: Arc<DecisionEvaluator>, interval: Duration) -> Self {
        Self {
            evaluator,
            interval,
        }
    }

    /// Sweep period
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One sweep
    ///
    /// # Errors
    ///
    /// Returns error if the entity list cannot be read
    pub async fn tick(&self) -> RuntimeResult<SweepReport> {
        self.evaluator.evaluate_all().await
    }

    /// Sweep every `interval` until `shutdown` turns true or its sender is
    /// dropped. Ticks that fall behind are skipped, not bunched up.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "wake loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(sweep) if sweep.inserted > 0 || sweep.failed > 0 => {
                            info!(entities = sweep.entities, inserted = sweep.inserted, failed = sweep.failed, "wake sweep");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "wake sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("wake loop stopped");
    }
}

//! Authority gate.
//!
//! During migration each decision is owned by exactly one of two paths:
//! the legacy trigger that runs side effects inline, or the canonical
//! pipeline that schedules jobs. A per-decision feature flag selects the
//! owner; a missing flag means legacy.

use crate::decision::DecisionId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Gate result type
pub type GateResult<T> = Result<T, GateError>;

/// Gate error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// Flag backend failure
    #[error("Flag storage error: {reason}")]
    Storage {
        /// Backend message
        reason: String,
    },
}

/// One row of the flag table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRecord {
    /// Flag name, see [`DecisionId::flag_name`]
    pub flag_name: String,
    /// Whether canonical authority is enabled
    pub enabled: bool,
}

/// Persistent flag table
#[async_trait]
pub trait FlagStore: Send + Sync {
    /// Read one flag; `None` if never set
    async fn get_flag(&self, flag_name: &str) -> GateResult<Option<bool>>;

    /// Set one flag
    async fn set_flag(&self, flag_name: &str, enabled: bool) -> GateResult<()>;

    /// Every stored flag, sorted by name
    async fn list_flags(&self) -> GateResult<Vec<FlagRecord>>;
}

/// Flag table held in process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryFlagStore {
    flags: Arc<RwLock<BTreeMap<String, bool>>>,
}

impl InMemoryFlagStore {
    /// Create an empty flag table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlagStore for InMemoryFlagStore {
    async fn get_flag(&self, flag_name: &str) -> GateResult<Option<bool>> {
        Ok(self.flags.read().await.get(flag_name).copied())
    }

    async fn set_flag(&self, flag_name: &str, enabled: bool) -> GateResult<()> {
        self.flags.write().await.insert(flag_name.to_string(), enabled);
        Ok(())
    }

    async fn list_flags(&self) -> GateResult<Vec<FlagRecord>> {
        Ok(self
            .flags
            .read()
            .await
            .iter()
            .map(|(k, v)| FlagRecord {
                flag_name: k.clone(),
                enabled: *v,
            })
            .collect())
    }
}

/// Which path owns a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Authority {
    /// Legacy triggers run the side effect inline
    Legacy,
    /// The pipeline schedules a job
    Canonical,
}

impl Authority {
    const fn from_flag(enabled: bool) -> Self {
        if enabled {
            Self::Canonical
        } else {
            Self::Legacy
        }
    }
}

/// Flag values read once, for a consistent view during one evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateSnapshot {
    flags: BTreeMap<String, bool>,
}

impl GateSnapshot {
    /// Whether the pipeline owns `decision`
    #[must_use]
    pub fn is_under_canonical_authority(&self, decision: DecisionId) -> bool {
        self.flags
            .get(decision.flag_name())
            .copied()
            .unwrap_or(false)
    }

    /// Owner of `decision`
    #[must_use]
    pub fn authority(&self, decision: DecisionId) -> Authority {
        Authority::from_flag(self.is_under_canonical_authority(decision))
    }
}

/// Interpret an environment value as a flag
fn parse_flag_value(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1")
}

/// Central point for legacy-vs-canonical selection
#[derive(Clone)]
pub struct AuthorityGate {
    store: Arc<dyn FlagStore>,
}

impl std::fmt::Debug for AuthorityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityGate").finish_non_exhaustive()
    }
}

impl AuthorityGate {
    /// Create a gate over a flag store
    #[must_use]
    pub fn new(store: Arc<dyn FlagStore>) -> Self {
        Self { store }
    }

    /// Whether the pipeline owns `decision`. Missing flags mean legacy.
    ///
    /// # Errors
    ///
    /// Returns error if the flag store cannot be read
    pub async fn is_under_canonical_authority(&self, decision: DecisionId) -> GateResult<bool> {
        Ok(self
            .store
            .get_flag(decision.flag_name())
            .await?
            .unwrap_or(false))
    }

    /// Owner of `decision`
    ///
    /// # Errors
    ///
    /// Returns error if the flag store cannot be read
    pub async fn authority(&self, decision: DecisionId) -> GateResult<Authority> {
        Ok(Authority::from_flag(
            self.is_under_canonical_authority(decision).await?,
        ))
    }

    /// Read every flag once
    ///
    /// # Errors
    ///
    /// Returns error if the flag store cannot be read
    pub async fn snapshot(&self) -> GateResult<GateSnapshot> {
        let flags = self
            .store
            .list_flags()
            .await?
            .into_iter()
            .map(|r| (r.flag_name, r.enabled))
            .collect();
        Ok(GateSnapshot { flags })
    }

    /// Set the flag for `decision`
    ///
    /// # Errors
    ///
    /// Returns error if the flag store cannot be written
    pub async fn set_authority(&self, decision: DecisionId, authority: Authority) -> GateResult<()> {
        let enabled = authority == Authority::Canonical;
        self.store.set_flag(decision.flag_name(), enabled).await?;
        info!(%decision, flag = decision.flag_name(), ?authority, "authority changed");
        Ok(())
    }

    /// Every stored flag
    ///
    /// # Errors
    ///
    /// Returns error if the flag store cannot be read
    pub async fn list(&self) -> GateResult<Vec<FlagRecord>> {
        self.store.list_flags().await
    }

    /// Seed flags from a variable lookup keyed by flag name. Variables that
    /// are absent leave the stored flag untouched. Returns how many flags
    /// were written.
    ///
    /// # Errors
    ///
    /// Returns error if the flag store cannot be written
    pub async fn seed_from<F>(&self, lookup: F) -> GateResult<usize>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut written = 0;
        for decision in DecisionId::ALL {
            let name = decision.flag_name();
            if let Some(value) = lookup(name) {
                let enabled = parse_flag_value(&value);
                self.store.set_flag(name, enabled).await?;
                debug!(flag = name, enabled, "flag seeded");
                written += 1;
            }
        }
        Ok(written)
    }

    /// Seed flags from process environment variables named after each flag
    ///
    /// # Errors
    ///
    /// Returns error if the flag store cannot be written
    pub async fn seed_from_env(&self) -> GateResult<usize> {
        self.seed_from(|name| std::env::var(name).ok()).await
    }
}

/// Outcome of a legacy trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome<T> {
    /// Legacy owned the decision and the side effect ran
    Fired(T),
    /// The pipeline owns the decision; nothing ran
    Suppressed,
}

/// A legacy side-effect path bound to one decision
#[derive(Debug, Clone)]
pub struct LegacyTrigger {
    gate: AuthorityGate,
    decision: DecisionId,
}

impl LegacyTrigger {
    /// Bind a legacy trigger to a decision
    #[must_use]
    pub fn new(gate: AuthorityGate, decision: DecisionId) -> Self {
        Self { gate, decision }
    }

    /// Run `effect` only while legacy is authoritative for the decision
    ///
    /// # Errors
    ///
    /// Returns error if the flag store cannot be read
    pub async fn fire<F, Fut, T>(&self, effect: F) -> GateResult<TriggerOutcome<T>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
    {
        match self.gate.authority(self.decision).await? {
            Authority::Legacy => Ok(TriggerOutcome::Fired(effect().await)),
            Authority::Canonical => {
                debug!(decision = %self.decision, "legacy trigger suppressed");
                Ok(TriggerOutcome::Suppressed)
            }
        }
    }
}

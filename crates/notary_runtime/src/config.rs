//! Pipeline configuration.
//!
//! Loaded from a JSON file; every field has a default so a partial file
//! (or none at all) is valid.

use crate::error::{RuntimeError, RuntimeResult};
use notary_queue::RetryPolicies;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Decision evaluator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Period of the wake sweep in milliseconds
    pub wake_interval_ms: u64,
    /// Read-append attempts on version conflicts
    pub append_retry_limit: u32,
}

impl EvaluatorConfig {
    /// Wake period
    #[must_use]
    pub const fn wake_interval(&self) -> Duration {
        Duration::from_millis(self.wake_interval_ms)
    }

    /// Set the wake period
    #[must_use]
    pub fn with_wake_interval(mut self, interval_ms: u64) -> Self {
        self.wake_interval_ms = interval_ms;
        self
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            wake_interval_ms: 60_000,
            append_retry_limit: notary_log::DEFAULT_APPEND_RETRIES,
        }
    }
}

/// Execution engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Workers in the pool
    pub workers: usize,
    /// Lease length in milliseconds
    pub lease_timeout_ms: u64,
    /// Lease renewal period in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Idle poll period in milliseconds
    pub poll_interval_ms: u64,
    /// Upper bound on one provider call in milliseconds
    pub execution_timeout_ms: u64,
    /// Prefix of generated worker ids
    pub worker_prefix: String,
}

impl EngineConfig {
    /// Lease length
    #[must_use]
    pub const fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    /// Heartbeat period
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Idle poll period
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Provider call bound
    #[must_use]
    pub const fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    /// Set the pool size
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the lease length
    #[must_use]
    pub fn with_lease_timeout(mut self, timeout_ms: u64) -> Self {
        self.lease_timeout_ms = timeout_ms;
        self
    }

    /// Set the heartbeat period
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    /// Set the idle poll period
    #[must_use]
    pub fn with_poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    /// Set the provider call bound
    #[must_use]
    pub fn with_execution_timeout(mut self, timeout_ms: u64) -> Self {
        self.execution_timeout_ms = timeout_ms;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            lease_timeout_ms: 300_000,
            heartbeat_interval_ms: 15_000,
            poll_interval_ms: 1_000,
            execution_timeout_ms: 120_000,
            worker_prefix: "worker".to_string(),
        }
    }
}

/// HTTP provider endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Timestamp service URL
    pub timestamp_url: Option<String>,
    /// Anchor service URL
    pub anchor_url: Option<String>,
    /// Artifact service URL
    pub artifact_url: Option<String>,
    /// Environment variable holding the bearer token
    pub token_env: String,
    /// HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl ProviderConfig {
    /// Whether every endpoint is set
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.timestamp_url.is_some() && self.anchor_url.is_some() && self.artifact_url.is_some()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timestamp_url: None,
            anchor_url: None,
            artifact_url: None,
            token_env: "NOTARY_PROVIDER_TOKEN".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Evaluator settings
    pub evaluator: EvaluatorConfig,
    /// Engine settings
    pub engine: EngineConfig,
    /// Retry policy per job type
    pub retry: RetryPolicies,
    /// Initial authority flags by flag name
    pub flags: BTreeMap<String, bool>,
    /// Provider endpoints
    pub providers: ProviderConfig,
}

impl PipelineConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from JSON text
    ///
    /// # Errors
    ///
    /// Returns error if the JSON does not match the schema
    pub fn from_json(text: &str) -> RuntimeResult<Self> {
        serde_json::from_str(text).map_err(|e| RuntimeError::config(e.to_string()))
    }

    /// Load from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Load from `path` if given, defaults otherwise
    ///
    /// # Errors
    ///
    /// Returns error if a given file cannot be read or parsed
    pub fn load_or_default(path: Option<&Path>) -> RuntimeResult<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Set engine settings
    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Set retry policies
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicies) -> Self {
        self.retry = retry;
        self
    }

    /// Set an initial flag
    #[must_use]
    pub fn with_flag(mut self, flag_name: impl Into<String>, enabled: bool) -> Self {
        self.flags.insert(flag_name.into(), enabled);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notary_queue::JobType;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.evaluator.wake_interval(), Duration::from_secs(60));
        assert_eq!(config.engine.workers, 4);
        assert_eq!(config.engine.lease_timeout(), Duration::from_secs(300));
        assert_eq!(config.engine.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.engine.execution_timeout(), Duration::from_secs(120));
        assert_eq!(config.retry.for_job(JobType::RunTimestamp).base_delay_ms, 30_000);
        assert!(config.flags.is_empty());
        assert!(!config.providers.is_complete());
    }

    #[test]
    fn test_partial_json() {
        let config = PipelineConfig::from_json(
            r#"{
                "engine": { "workers": 8 },
                "flags": { "ENABLE_D1_CANONICAL": true },
                "retry": { "run_timestamp": { "max_attempts": 3, "base_delay_ms": 10, "max_delay_ms": 100, "factor": 2 } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.engine.workers, 8);
        assert_eq!(config.engine.poll_interval_ms, 1_000);
        assert_eq!(config.flags.get("ENABLE_D1_CANONICAL"), Some(&true));
        assert_eq!(config.retry.for_job(JobType::RunTimestamp).max_attempts, 3);
        assert_eq!(config.retry.for_job(JobType::SubmitAnchorBitcoin).max_attempts, 288);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            PipelineConfig::from_json("{ \"engine\": 4 }"),
            Err(RuntimeError::Config { .. })
        ));
    }

    #[test]
    fn test_builders() {
        let config = PipelineConfig::new()
            .with_engine(EngineConfig::default().with_workers(2).with_lease_timeout(1_000))
            .with_flag("ENABLE_D3_CANONICAL", true);
        assert_eq!(config.engine.workers, 2);
        assert_eq!(config.engine.lease_timeout_ms, 1_000);
        assert_eq!(config.flags.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let result = PipelineConfig::load("/nonexistent/notary.json");
        assert!(matches!(result, Err(RuntimeError::Config { .. })));
        assert!(PipelineConfig::load_or_default(None).is_ok());
    }
}

//! Engine-wide settings.

use apiflow_core::{RetryConfig, WorkflowError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-attempt timeout applied when a step sets none.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// How ready steps are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// Dispatch every ready step, wait for all of them, then compute the next
    /// ready set.
    #[default]
    Wave,
    /// Dispatch a step as soon as its last dependency completes.
    Streaming,
}

/// Settings shared by every workflow an [`Engine`](crate::Engine) executes.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use apiflow::{EngineConfig, SchedulingMode};
///
/// let config = EngineConfig::from_json(r#"{"scheduling": "streaming"}"#).unwrap();
/// assert_eq!(config.scheduling, SchedulingMode::Streaming);
/// assert_eq!(config.default_retry.max_retries, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retry policy for steps that carry none.
    pub default_retry: RetryConfig,
    /// Per-attempt timeout for steps that carry none. `None` waits forever.
    #[serde(
        rename = "step_timeout_ms",
        with = "apiflow_core::serde_duration::option"
    )]
    pub step_timeout: Option<Duration>,
    /// How ready steps are dispatched.
    pub scheduling: SchedulingMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_retry: RetryConfig::default(),
            step_timeout: Some(DEFAULT_STEP_TIMEOUT),
            scheduling: SchedulingMode::default(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if the document is malformed
    /// or the retry policy is invalid.
    pub fn from_json(json: &str) -> Result<Self, WorkflowError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| WorkflowError::Configuration(e.to_string()))?;
        config
            .default_retry
            .validate()
            .map_err(|e| WorkflowError::Configuration(format!("default_retry: {}", e)))?;
        Ok(config)
    }

    /// Replaces the default retry policy.
    pub fn with_default_retry(mut self, retry: RetryConfig) -> Self {
        self.default_retry = retry;
        self
    }

    /// Replaces the default per-attempt timeout.
    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Selects the scheduling mode.
    pub fn with_scheduling(mut self, scheduling: SchedulingMode) -> Self {
        self.scheduling = scheduling;
        self
    }
}

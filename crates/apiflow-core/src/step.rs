//! Step definition and retry configuration.

use crate::error::RunnerError;
use crate::request::Request;
use crate::traits::StepHooks;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Type-safe step identifier.
///
/// # Examples
///
/// ```
/// use apiflow_core::StepId;
///
/// let id = StepId::new("login");
/// assert_eq!(id.as_str(), "login");
///
/// let id: StepId = "fetch_profile".into();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    /// Creates a new StepId.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&StepId> for StepId {
    fn from(id: &StepId) -> Self {
        id.clone()
    }
}

impl AsRef<str> for StepId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Retry behaviour for a step's request.
///
/// A response whose status is in `retryable_status_codes`, or a transport
/// error whose message contains one of `retryable_error_substrings`, is
/// retried up to `max_retries` times. The wait before retry `n` (1-based) is
/// `retry_delay * backoff_factor^(n-1)`, capped at `max_delay` when one is set.
///
/// # Examples
///
/// ```
/// use apiflow_core::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::default();
/// assert_eq!(config.max_retries, 3);
/// assert_eq!(config.delay_for_retry(1), Duration::from_secs(1));
/// assert_eq!(config.delay_for_retry(2), Duration::from_secs(2));
/// assert_eq!(config.delay_for_retry(3), Duration::from_secs(4));
/// assert!(config.is_retryable_status(503));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(rename = "retry_delay_ms", with = "crate::serde_duration")]
    pub retry_delay: Duration,
    /// Multiplier applied to the delay for each further retry.
    pub backoff_factor: f64,
    /// Upper bound for any single delay. `None` leaves the backoff uncapped.
    #[serde(
        default,
        rename = "max_delay_ms",
        with = "crate::serde_duration::option"
    )]
    pub max_delay: Option<Duration>,
    /// HTTP statuses that trigger a retry.
    pub retryable_status_codes: BTreeSet<u16>,
    /// Substrings matched against a transport error's message.
    pub retryable_error_substrings: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: None,
            retryable_status_codes: [429, 500, 502, 503, 504].into_iter().collect(),
            retryable_error_substrings: vec!["timeout".to_string(), "connection refused".to_string()],
        }
    }
}

/// Error returned when a [`RetryConfig`] is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfigError(pub &'static str);

impl std::fmt::Display for RetryConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RetryConfigError {}

impl RetryConfig {
    /// Creates a validated configuration with the default retry triggers.
    ///
    /// # Errors
    ///
    /// Returns [`RetryConfigError`] if `backoff_factor` is not finite or is
    /// below 1.0.
    pub fn new(
        max_retries: u32,
        retry_delay: Duration,
        backoff_factor: f64,
    ) -> Result<Self, RetryConfigError> {
        let config = Self {
            max_retries,
            retry_delay,
            backoff_factor,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// A configuration that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Retries `max_retries` times with a constant `delay`.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay: delay,
            backoff_factor: 1.0,
            ..Self::default()
        }
    }

    /// Retries `max_retries` times, doubling the delay each time.
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay: initial_delay,
            backoff_factor: 2.0,
            ..Self::default()
        }
    }

    /// Caps every delay at `max_delay`.
    ///
    /// # Errors
    ///
    /// Returns [`RetryConfigError`] if `max_delay` is shorter than the base delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Result<Self, RetryConfigError> {
        self.max_delay = Some(max_delay);
        self.validate()?;
        Ok(self)
    }

    /// Replaces the retryable status codes.
    pub fn with_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    /// Replaces the retryable error substrings.
    pub fn with_error_substrings<S: Into<String>>(
        mut self,
        substrings: impl IntoIterator<Item = S>,
    ) -> Self {
        self.retryable_error_substrings = substrings.into_iter().map(Into::into).collect();
        self
    }

    /// Checks the invariants that deserialization cannot enforce.
    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if !self.backoff_factor.is_finite() {
            return Err(RetryConfigError("backoff_factor must be finite"));
        }
        if self.backoff_factor < 1.0 {
            return Err(RetryConfigError("backoff_factor must be at least 1.0"));
        }
        if self.max_delay.is_some_and(|cap| cap < self.retry_delay) {
            return Err(RetryConfigError("max_delay must be >= retry_delay"));
        }
        Ok(())
    }

    /// Returns `true` if a response with this status should be retried.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Returns `true` if this transport error should be retried.
    pub fn is_retryable_error(&self, error: &RunnerError) -> bool {
        self.retryable_error_substrings
            .iter()
            .any(|needle| error.message().contains(needle.as_str()))
    }

    /// Delay before the given retry (1-based). Retry 0 is the first attempt
    /// and never waits.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let secs = self.retry_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Per-step execution settings. Unset fields fall back to the engine defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepConfig {
    /// Maximum time allowed for a single attempt.
    pub timeout: Option<Duration>,
    /// Retry behaviour for the step's request.
    pub retry: Option<RetryConfig>,
}

/// One node of a workflow: a templated request plus its scheduling metadata.
///
/// # Examples
///
/// ```
/// use apiflow_core::{Request, Step};
///
/// let step = Step::new("profile", Request::get("https://api.test/users/${uid}"))
///     .depends_on(["login"])
///     .extract("email", "$.profile.email");
///
/// assert_eq!(step.dependencies().len(), 1);
/// assert_eq!(step.extractions().get("email").map(String::as_str), Some("$.profile.email"));
/// ```
#[derive(Clone)]
pub struct Step {
    id: StepId,
    request: Request,
    depends_on: Vec<StepId>,
    extract: BTreeMap<String, String>,
    config: StepConfig,
    hooks: Option<Arc<dyn StepHooks>>,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("request", &self.request)
            .field("depends_on", &self.depends_on)
            .field("extract", &self.extract)
            .field("config", &self.config)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

impl Step {
    /// Creates a step with no dependencies, extractions or hooks.
    pub fn new(id: impl Into<StepId>, request: Request) -> Self {
        Self {
            id: id.into(),
            request,
            depends_on: Vec::new(),
            extract: BTreeMap::new(),
            config: StepConfig::default(),
            hooks: None,
        }
    }

    /// Adds dependencies. Repeated IDs are kept once.
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        for id in ids {
            let id = id.into();
            if !self.depends_on.contains(&id) {
                self.depends_on.push(id);
            }
        }
        self
    }

    /// Extracts `variable` from the JSON response body at `path`.
    pub fn extract(mut self, variable: impl Into<String>, path: impl Into<String>) -> Self {
        self.extract.insert(variable.into(), path.into());
        self
    }

    /// Overrides the engine's default retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = Some(retry);
        self
    }

    /// Overrides the engine's per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Replaces the whole step configuration.
    pub fn with_config(mut self, config: StepConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches lifecycle hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn StepHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Returns the step ID.
    pub fn id(&self) -> &StepId {
        &self.id
    }

    /// Returns the request template.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns the declared dependencies.
    pub fn dependencies(&self) -> &[StepId] {
        &self.depends_on
    }

    /// Returns variable name to path expression mappings.
    pub fn extractions(&self) -> &BTreeMap<String, String> {
        &self.extract
    }

    /// Returns the step configuration.
    pub fn config(&self) -> &StepConfig {
        &self.config
    }

    /// Returns the lifecycle hooks, if any.
    pub fn hooks(&self) -> Option<&Arc<dyn StepHooks>> {
        self.hooks.as_ref()
    }
}

//! Workflows described as JSON documents.

use crate::workflow::{Workflow, WorkflowBuilder};
use apiflow_core::{Request, RetryConfig, Step, StepConfig, StepId, WorkflowError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Serializable description of a workflow.
///
/// ```
/// use apiflow::WorkflowDefinition;
///
/// let definition = WorkflowDefinition::from_json(r#"{
///     "id": "shop",
///     "variables": {"host": "https://shop.test"},
///     "steps": [
///         {"id": "login", "method": "POST", "url": "${host}/login",
///          "extract": {"token": "$.token"}},
///         {"id": "orders", "url": "${host}/orders",
///          "headers": {"Authorization": "Bearer ${token}"},
///          "depends_on": ["login"]}
///     ]
/// }"#)?;
/// let workflow = definition.into_builder()?.build()?;
/// assert_eq!(workflow.step_count(), 2);
/// # Ok::<(), apiflow::WorkflowError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Seed variables.
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Steps per second; 0 disables pacing.
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

/// One step of a [`WorkflowDefinition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: StepId,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<StepId>,
    /// Variable name to JSON path.
    #[serde(default)]
    pub extract: BTreeMap<String, String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Per-attempt timeout in milliseconds.
    #[serde(
        default,
        rename = "timeout_ms",
        with = "apiflow_core::serde_duration::option"
    )]
    pub timeout: Option<Duration>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl WorkflowDefinition {
    /// Parses a definition from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, WorkflowError> {
        serde_json::from_str(json).map_err(|e| WorkflowError::Configuration(e.to_string()))
    }

    /// Converts the definition into a builder; attach a runner and build.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if a step's retry policy is
    /// invalid.
    pub fn into_builder(self) -> Result<WorkflowBuilder, WorkflowError> {
        let mut builder = Workflow::builder(self.id)
            .name(self.name)
            .description(self.description);

        for (name, value) in self.variables {
            builder = builder.variable(name, value);
        }
        if let Some(max_concurrency) = self.max_concurrency {
            builder = builder.max_concurrency(max_concurrency);
        }
        if let Some(rate_limit) = self.rate_limit {
            builder = builder.rate_limit(rate_limit);
        }
        for step in self.steps {
            builder = builder.step(step.into_step()?);
        }
        Ok(builder)
    }
}

impl StepDefinition {
    /// Converts the definition into a [`Step`].
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if the retry policy is invalid.
    pub fn into_step(self) -> Result<Step, WorkflowError> {
        if let Some(retry) = &self.retry {
            retry.validate().map_err(|e| {
                WorkflowError::Configuration(format!("step '{}' retry: {}", self.id, e))
            })?;
        }

        let request = Request {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
        };
        let step = Step::new(self.id, request)
            .depends_on(self.depends_on)
            .with_config(StepConfig {
                timeout: self.timeout,
                retry: self.retry,
            });

        Ok(self
            .extract
            .into_iter()
            .fold(step, |step, (variable, path)| step.extract(variable, path)))
    }
}

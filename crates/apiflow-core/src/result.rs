//! Per-step and per-workflow execution results.

use crate::request::Response;
use crate::step::StepId;
use crate::variables::Variables;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outcome of one dispatched step.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// The step this result belongs to.
    pub step_id: StepId,
    /// `true` if a response was received (whatever its status).
    pub success: bool,
    /// The final response, present iff a request was answered.
    pub response: Option<Response>,
    /// The final transport error or abort reason.
    pub error: Option<String>,
    /// Retries performed (attempts - 1).
    pub retry_count: u32,
    /// Variables extracted from the response body.
    pub extracted_variables: HashMap<String, String>,
    /// When the step started.
    pub start_time: Instant,
    /// When the step finished.
    pub end_time: Instant,
}

impl StepResult {
    /// Creates a pending result for a step starting at `start_time`.
    pub fn new(step_id: StepId, start_time: Instant) -> Self {
        Self {
            step_id,
            success: false,
            response: None,
            error: None,
            retry_count: 0,
            extracted_variables: HashMap::new(),
            start_time,
            end_time: start_time,
        }
    }

    /// Returns the status of the final response.
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    /// Returns how long the step ran, retries and backoff included.
    pub fn duration(&self) -> Duration {
        self.end_time.saturating_duration_since(self.start_time)
    }
}

/// Outcome of a whole workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    /// The workflow that ran.
    pub workflow_id: String,
    /// `false` if the run was aborted.
    pub success: bool,
    /// Results for every step that was dispatched.
    pub step_results: HashMap<StepId, StepResult>,
    /// Variables as they stood when the run ended.
    pub variables: Variables,
    /// When the run started.
    pub start_time: Instant,
    /// When the run ended.
    pub end_time: Instant,
}

impl WorkflowResult {
    /// Creates a result with no step results, starting now.
    pub fn empty(workflow_id: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            workflow_id: workflow_id.into(),
            success: false,
            step_results: HashMap::new(),
            variables: Variables::new(),
            start_time: now,
            end_time: now,
        }
    }

    /// Returns the result of one step, if it was dispatched.
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.step_results.get(id)
    }

    /// Returns the IDs of dispatched steps that did not succeed, sorted.
    pub fn failed_steps(&self) -> Vec<&StepId> {
        let mut failed: Vec<&StepId> = self
            .step_results
            .values()
            .filter(|r| !r.success)
            .map(|r| &r.step_id)
            .collect();
        failed.sort();
        failed
    }

    /// Returns the total run time.
    pub fn duration(&self) -> Duration {
        self.end_time.saturating_duration_since(self.start_time)
    }
}

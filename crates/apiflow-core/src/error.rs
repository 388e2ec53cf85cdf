//! Workflow error types.

use crate::result::WorkflowResult;
use crate::step::StepId;
use thiserror::Error;

/// The type of lifecycle hook that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookType {
    /// The `on_success` hook.
    OnSuccess,
    /// The `on_error` hook.
    OnError,
}

impl std::fmt::Display for HookType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookType::OnSuccess => write!(f, "on_success"),
            HookType::OnError => write!(f, "on_error"),
        }
    }
}

/// Errors that abort workflow construction or a whole workflow run.
///
/// Step-level transport failures are not represented here; they are recorded
/// in the step's [`StepResult`](crate::StepResult) and never escalate unless a
/// hook turns them into a [`WorkflowError::HookError`].
///
/// # Non-Exhaustive
///
/// Always include a wildcard arm when matching:
///
/// ```
/// use apiflow_core::WorkflowError;
///
/// fn describe(error: &WorkflowError) -> String {
///     match error {
///         WorkflowError::CircularDependency { pending } => {
///             format!("{} steps can never run", pending.len())
///         }
///         WorkflowError::Cancelled => "cancelled".to_string(),
///         other => other.to_string(),
///     }
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A step with the same ID is already registered.
    #[error("Step already exists: {0}")]
    DuplicateStep(StepId),

    /// A step references a dependency that is not registered (yet).
    #[error("Step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency {
        /// The step declaring the dependency.
        step_id: StepId,
        /// The missing dependency.
        dependency: StepId,
    },

    /// Every dependency that could not be resolved when linking a workflow.
    #[error("Unresolved dependencies: {}", format_edges(.0))]
    UnresolvedDependencies(Vec<(StepId, StepId)>),

    /// The workflow was executed without a runner.
    #[error("No runner configured for workflow")]
    MissingRunner,

    /// Steps remain pending but none of them can ever become ready.
    #[error("Circular or unreachable dependency among steps: {}", format_ids(.pending))]
    CircularDependency {
        /// Steps that never became ready, sorted by ID.
        pending: Vec<StepId>,
    },

    /// A lifecycle hook failed and aborted the run.
    #[error("Hook '{hook_type}' failed in step '{step_id}': {details}")]
    HookError {
        /// The step whose hook failed.
        step_id: StepId,
        /// Which hook failed.
        hook_type: HookType,
        /// Details about the failure.
        details: String,
    },

    /// The run was cancelled through its cancellation token.
    #[error("Workflow execution cancelled")]
    Cancelled,

    /// The workflow configuration is invalid.
    #[error("Invalid workflow configuration: {0}")]
    Configuration(String),

    /// A spawned step task terminated abnormally.
    #[error("Step task failed: {0}")]
    TaskFailed(String),
}

fn format_ids(ids: &[StepId]) -> String {
    ids.iter()
        .map(StepId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_edges(edges: &[(StepId, StepId)]) -> String {
    edges
        .iter()
        .map(|(step, dependency)| format!("{} -> {}", step, dependency))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A fatal workflow error together with everything the run produced before
/// it stopped.
///
/// `result.success` is always `false`.
#[derive(Error, Debug)]
#[error("Workflow '{}' failed: {error}", result.workflow_id)]
pub struct WorkflowFailure {
    /// The error that aborted the run.
    #[source]
    pub error: WorkflowError,
    /// Partial results: every step dispatched before the abort.
    pub result: WorkflowResult,
}

impl WorkflowFailure {
    /// Wraps `error`, forcing the partial result to report failure.
    pub fn new(error: WorkflowError, mut result: WorkflowResult) -> Self {
        result.success = false;
        Self { error, result }
    }
}

/// Error returned by a [`Runner`](crate::Runner) when no response was received.
///
/// Retry decisions match the configured substrings against [`RunnerError::message`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RunnerError {
    message: String,
}

impl RunnerError {
    /// Creates a transport error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

//! Seams to the outside world: the request runner and step lifecycle hooks.

use crate::error::RunnerError;
use crate::request::{Request, Response};
use crate::result::StepResult;
use async_trait::async_trait;

/// Boxed error type returned by hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Performs a single request.
///
/// The engine owns retry and backoff; a runner makes exactly one attempt per
/// call. Return `Err` only when no response was received at all; an HTTP
/// error status is still an `Ok(Response)`.
///
/// # Examples
///
/// ```
/// use apiflow_core::{Request, Response, Runner, RunnerError};
/// use async_trait::async_trait;
///
/// struct Teapot;
///
/// #[async_trait]
/// impl Runner for Teapot {
///     async fn execute(&self, _request: &Request) -> Result<Response, RunnerError> {
///         Ok(Response::new(418))
///     }
/// }
/// ```
#[async_trait]
pub trait Runner: Send + Sync {
    /// Sends `request` and returns the response.
    async fn execute(&self, request: &Request) -> Result<Response, RunnerError>;
}

/// Optional callbacks invoked after a step finishes.
///
/// Returning an error from either hook aborts the whole workflow run with a
/// [`WorkflowError::HookError`](crate::WorkflowError::HookError).
///
/// # Examples
///
/// ```
/// use apiflow_core::{BoxError, StepHooks, StepResult};
/// use async_trait::async_trait;
///
/// /// Stops the workflow as soon as the step cannot reach its server.
/// struct HaltOnError;
///
/// #[async_trait]
/// impl StepHooks for HaltOnError {
///     async fn on_error(&self, result: &StepResult) -> Result<(), BoxError> {
///         Err(format!("{} is unreachable", result.step_id).into())
///     }
/// }
/// ```
#[async_trait]
pub trait StepHooks: Send + Sync {
    /// Called after a response was received and variables were extracted.
    async fn on_success(&self, _result: &StepResult) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called when the step ended without a response.
    async fn on_error(&self, _result: &StepResult) -> Result<(), BoxError> {
        Ok(())
    }
}

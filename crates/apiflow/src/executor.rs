//! Single-step execution: substitution, retry with backoff, extraction, hooks.

use apiflow_core::path;
use apiflow_core::{
    BoxError, HookType, Request, Response, RetryConfig, Runner, RunnerError, Step, StepResult,
    Variables, WorkflowError,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// What the scheduler gets back for one dispatched step.
#[derive(Debug)]
pub(crate) struct StepOutcome {
    pub result: StepResult,
    /// Set when the run must stop: a failing hook or cancellation.
    pub error: Option<WorkflowError>,
}

/// Runs individual steps against a runner.
pub(crate) struct StepExecutor {
    runner: Arc<dyn Runner>,
    default_retry: RetryConfig,
    default_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl StepExecutor {
    pub fn new(
        runner: Arc<dyn Runner>,
        default_retry: RetryConfig,
        default_timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runner,
            default_retry,
            default_timeout,
            cancel,
        }
    }

    /// Executes `step` with `variables` as they stood at dispatch time.
    ///
    /// A transport failure is recorded in the result but is not an error for
    /// the scheduler; only hook failures and cancellation are.
    #[instrument(name = "step_execute", skip_all, fields(step_id = %step.id()))]
    pub async fn execute(&self, step: &Step, variables: &Variables) -> StepOutcome {
        let mut result = StepResult::new(step.id().clone(), now());
        let request = step.request().substitute(variables);
        let retry = step.config().retry.as_ref().unwrap_or(&self.default_retry);
        let attempt_timeout = step.config().timeout.or(self.default_timeout);

        debug!(method = %request.method, url = %request.url, "step_started");

        let attempt = self
            .send_with_retry(&request, retry, attempt_timeout, &mut result.retry_count)
            .await;

        let attempt = match attempt {
            Ok(attempt) => attempt,
            Err(error) => {
                result.error = Some(error.to_string());
                result.end_time = now();
                return StepOutcome {
                    result,
                    error: Some(error),
                };
            }
        };

        let hook = match attempt {
            Ok(response) => {
                result.success = true;
                result.extracted_variables = extract_variables(step, &response);
                result.response = Some(response);
                result.end_time = now();
                match step.hooks() {
                    Some(hooks) => hooks
                        .on_success(&result)
                        .await
                        .map_err(|e| hook_error(step, HookType::OnSuccess, e)),
                    None => Ok(()),
                }
            }
            Err(error) => {
                result.error = Some(error.to_string());
                result.end_time = now();
                match step.hooks() {
                    Some(hooks) => hooks
                        .on_error(&result)
                        .await
                        .map_err(|e| hook_error(step, HookType::OnError, e)),
                    None => Ok(()),
                }
            }
        };

        StepOutcome {
            result,
            error: hook.err(),
        }
    }

    /// Sends the request until it yields a final answer.
    ///
    /// The inner result is the last attempt; the outer error is cancellation
    /// during a backoff wait.
    async fn send_with_retry(
        &self,
        request: &Request,
        retry: &RetryConfig,
        attempt_timeout: Option<Duration>,
        retries: &mut u32,
    ) -> Result<Result<Response, RunnerError>, WorkflowError> {
        loop {
            let attempt = self.send(request, attempt_timeout).await;

            let reason = match &attempt {
                Ok(response) if retry.is_retryable_status(response.status) => {
                    format!("status {}", response.status)
                }
                Err(error) if retry.is_retryable_error(error) => error.to_string(),
                _ => return Ok(attempt),
            };

            if *retries >= retry.max_retries {
                warn!(retries = *retries, %reason, "retries exhausted");
                return Ok(attempt);
            }

            *retries += 1;
            let delay = retry.delay_for_retry(*retries);
            warn!(
                retry = *retries,
                max_retries = retry.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                %reason,
                "retrying step"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!("cancelled during backoff");
                    return Err(WorkflowError::Cancelled);
                }
                _ = sleep(delay) => {}
            }
        }
    }

    async fn send(
        &self,
        request: &Request,
        attempt_timeout: Option<Duration>,
    ) -> Result<Response, RunnerError> {
        match attempt_timeout {
            Some(limit) => timeout(limit, self.runner.execute(request))
                .await
                .unwrap_or_else(|_| {
                    Err(RunnerError::new(format!(
                        "request timeout after {}ms",
                        limit.as_millis()
                    )))
                }),
            None => self.runner.execute(request).await,
        }
    }
}

/// Evaluates the step's extraction paths against a JSON response body.
///
/// Non-JSON responses yield nothing. A path that fails only drops its own
/// variable.
fn extract_variables(step: &Step, response: &Response) -> HashMap<String, String> {
    let mut extracted = HashMap::new();
    if step.extractions().is_empty() {
        return extracted;
    }
    if !response.is_json() {
        debug!(
            content_type = %response.content_type(),
            "skipping extraction for non-JSON response"
        );
        return extracted;
    }

    let document: serde_json::Value = match serde_json::from_slice(&response.body) {
        Ok(document) => document,
        Err(error) => {
            warn!(%error, "response declared JSON but could not be decoded");
            return extracted;
        }
    };

    for (variable, expr) in step.extractions() {
        match path::extract(&document, expr) {
            Ok(value) => {
                extracted.insert(variable.clone(), value);
            }
            Err(error) => {
                warn!(%variable, path = %expr, %error, "variable extraction failed");
            }
        }
    }
    extracted
}

fn hook_error(step: &Step, hook_type: HookType, error: BoxError) -> WorkflowError {
    WorkflowError::HookError {
        step_id: step.id().clone(),
        hook_type,
        details: error.to_string(),
    }
}

/// Wall-clock instant that follows tokio's (possibly paused) clock.
pub(crate) fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

//! Workflow scheduler.
//!
//! Ready steps are dispatched through a counting semaphore and an optional
//! rate limiter onto a [`JoinSet`]. Each step reads the variables as an
//! immutable snapshot; the scheduler merges extracted values back as steps
//! complete.

use crate::config::{EngineConfig, SchedulingMode};
use crate::executor::{now, StepExecutor, StepOutcome};
use crate::graph::DependencyGraph;
use crate::rate_limit::RateLimiter;
use crate::workflow::Workflow;
use apiflow_core::{StepId, StepResult, Variables, WorkflowError, WorkflowFailure, WorkflowResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Executes workflows.
///
/// The engine holds no state between runs; one engine can execute any
/// number of workflows, concurrently if needed.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine with the given settings.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Returns the engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs every step of `workflow` in dependency order.
    ///
    /// Step-level failures do not fail the run; they are recorded in
    /// [`WorkflowResult::step_results`] and dependents still execute.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkflowFailure`] carrying the partial result when the
    /// workflow has no runner, its steps can never all become ready, a hook
    /// fails, or the run is cancelled.
    #[instrument(
        name = "workflow_execute",
        skip(self, workflow),
        fields(workflow_id = %workflow.id())
    )]
    pub async fn execute(&self, workflow: &Workflow) -> Result<WorkflowResult, WorkflowFailure> {
        let started = now();

        let Some(runner) = workflow.runner() else {
            error!(error = %WorkflowError::MissingRunner, "workflow_failed");
            return Err(WorkflowFailure::new(
                WorkflowError::MissingRunner,
                empty_result(workflow, started),
            ));
        };

        let graph = match DependencyGraph::build(workflow.steps()) {
            Ok(graph) => graph,
            Err(error) => {
                error!(%error, "workflow_failed");
                return Err(WorkflowFailure::new(error, empty_result(workflow, started)));
            }
        };

        info!(
            steps = graph.len(),
            max_concurrency = workflow.max_concurrency(),
            rate_limit = workflow.rate_limit(),
            mode = ?self.config.scheduling,
            "workflow_started"
        );

        let cancel = workflow.cancellation_token().clone();
        let executor = StepExecutor::new(
            Arc::clone(runner),
            self.config.default_retry.clone(),
            self.config.step_timeout,
            cancel.clone(),
        );

        let mut run = Run {
            workflow,
            graph,
            executor: Arc::new(executor),
            semaphore: Arc::new(Semaphore::new(workflow.max_concurrency().max(1))),
            limiter: RateLimiter::per_second(workflow.rate_limit()),
            cancel,
            variables: Arc::new(workflow.variables().clone()),
            dispatched: HashSet::new(),
            completed: HashSet::new(),
            results: HashMap::new(),
        };

        let outcome = match self.config.scheduling {
            SchedulingMode::Wave => run.run_waves().await,
            SchedulingMode::Streaming => run.run_streaming().await,
        };
        let result = run.into_result(started, outcome.is_ok());

        match outcome {
            Ok(()) => {
                info!(
                    steps = result.step_results.len(),
                    failed_steps = result.failed_steps().len(),
                    duration_ms = u64::try_from(result.duration().as_millis()).unwrap_or(u64::MAX),
                    "workflow_completed"
                );
                Ok(result)
            }
            Err(error) => {
                error!(
                    %error,
                    completed_steps = result.step_results.len(),
                    "workflow_failed"
                );
                Err(WorkflowFailure::new(error, result))
            }
        }
    }
}

fn empty_result(workflow: &Workflow, started: Instant) -> WorkflowResult {
    let mut result = WorkflowResult::empty(workflow.id());
    result.variables = workflow.variables().clone();
    result.start_time = started;
    result.end_time = now();
    result
}

type StepTasks = JoinSet<StepOutcome>;

/// State of a single execution.
struct Run<'a> {
    workflow: &'a Workflow,
    graph: DependencyGraph,
    executor: Arc<StepExecutor>,
    semaphore: Arc<Semaphore>,
    limiter: Option<RateLimiter>,
    cancel: CancellationToken,
    /// Snapshot handed to newly dispatched steps; copied on write.
    variables: Arc<Variables>,
    dispatched: HashSet<StepId>,
    completed: HashSet<StepId>,
    results: HashMap<StepId, StepResult>,
}

impl Run<'_> {
    /// Dispatches the ready set, waits for all of it, repeats.
    async fn run_waves(&mut self) -> Result<(), WorkflowError> {
        let mut ready: Vec<StepId> = self.graph.entry_points().to_vec();
        let mut wave = 0usize;

        while self.completed.len() < self.graph.len() {
            if self.cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }
            if ready.is_empty() {
                return Err(self.stalled());
            }

            wave += 1;
            let current = std::mem::take(&mut ready);
            debug!(wave, steps = current.len(), "wave_started");

            let mut tasks = StepTasks::new();
            for id in &current {
                if let Err(error) = self.dispatch(id, &mut tasks).await {
                    tasks.detach_all();
                    return Err(error);
                }
            }

            // Siblings already running may finish; the first fatal error
            // stops the run once the wave is drained.
            let mut fatal = None;
            while let Some(outcome) = self.next_outcome(&mut tasks).await? {
                match self.complete(outcome) {
                    Ok(newly_ready) => ready.extend(newly_ready),
                    Err(WorkflowError::Cancelled) => {
                        tasks.detach_all();
                        return Err(WorkflowError::Cancelled);
                    }
                    Err(error) => {
                        fatal.get_or_insert(error);
                    }
                }
            }
            if let Some(error) = fatal {
                return Err(error);
            }
        }
        Ok(())
    }

    /// Dispatches each step as soon as its last dependency completes.
    async fn run_streaming(&mut self) -> Result<(), WorkflowError> {
        let mut ready: VecDeque<StepId> = self.graph.entry_points().iter().cloned().collect();
        let mut tasks = StepTasks::new();
        let mut fatal = None;

        loop {
            if fatal.is_none() {
                if let Some(id) = ready.pop_front() {
                    if let Err(error) = self.dispatch(&id, &mut tasks).await {
                        tasks.detach_all();
                        return Err(error);
                    }
                    continue;
                }
            }

            let Some(outcome) = self.next_outcome(&mut tasks).await? else {
                break;
            };
            match self.complete(outcome) {
                Ok(newly_ready) => ready.extend(newly_ready),
                Err(WorkflowError::Cancelled) => {
                    tasks.detach_all();
                    return Err(WorkflowError::Cancelled);
                }
                Err(error) => {
                    fatal.get_or_insert(error);
                }
            }
        }

        if let Some(error) = fatal {
            return Err(error);
        }
        if self.completed.len() < self.graph.len() {
            return Err(self.stalled());
        }
        Ok(())
    }

    /// Waits for a concurrency slot and a rate-limit tick, then spawns the
    /// step with the current variable snapshot.
    async fn dispatch(&mut self, id: &StepId, tasks: &mut StepTasks) -> Result<(), WorkflowError> {
        let step = self
            .workflow
            .step(id.as_str())
            .cloned()
            .ok_or_else(|| WorkflowError::Configuration(format!("unknown step '{}'", id)))?;

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(WorkflowError::Cancelled),
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit
                .map_err(|_| WorkflowError::TaskFailed("concurrency limiter closed".to_string()))?,
        };
        if let Some(limiter) = self.limiter.as_mut() {
            limiter.acquire(&self.cancel).await?;
        }

        let executor = Arc::clone(&self.executor);
        let variables = Arc::clone(&self.variables);
        self.dispatched.insert(id.clone());
        debug!(step_id = %id, "step_dispatched");

        tasks.spawn(async move {
            let outcome = executor.execute(&step, &variables).await;
            drop(permit);
            outcome
        });
        Ok(())
    }

    /// Next finished step, or `None` once nothing is running.
    async fn next_outcome(
        &self,
        tasks: &mut StepTasks,
    ) -> Result<Option<StepOutcome>, WorkflowError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                // in-flight requests are left to finish on their own
                tasks.detach_all();
                Err(WorkflowError::Cancelled)
            }
            joined = tasks.join_next() => match joined {
                None => Ok(None),
                Some(Ok(outcome)) => Ok(Some(outcome)),
                Some(Err(join_error)) => {
                    tasks.detach_all();
                    Err(WorkflowError::TaskFailed(join_error.to_string()))
                }
            },
        }
    }

    /// Records a finished step and returns the dependents it unlocked.
    ///
    /// A step that failed at the transport level still counts as completed.
    /// A step whose hook failed or that was cancelled does not.
    fn complete(&mut self, outcome: StepOutcome) -> Result<Vec<StepId>, WorkflowError> {
        let StepOutcome { result, error } = outcome;
        let id = result.step_id.clone();

        if result.success {
            info!(
                step_id = %id,
                status = result.status(),
                attempt = result.retry_count + 1,
                extracted = result.extracted_variables.len(),
                "step_completed"
            );
        } else {
            warn!(
                step_id = %id,
                error = result.error.as_deref().unwrap_or_default(),
                attempt = result.retry_count + 1,
                "step_failed"
            );
        }

        if error.is_none() {
            if !result.extracted_variables.is_empty() {
                Arc::make_mut(&mut self.variables).extend(
                    result
                        .extracted_variables
                        .iter()
                        .map(|(name, value)| (name.clone(), value.clone())),
                );
            }
            self.completed.insert(id.clone());
        }
        self.results.insert(id.clone(), result);

        match error {
            Some(error) => Err(error),
            None => Ok(self
                .graph
                .newly_ready(id.as_str(), &self.completed)
                .into_iter()
                .filter(|dependent| !self.dispatched.contains(dependent))
                .collect()),
        }
    }

    /// Error for steps that can never become ready.
    fn stalled(&self) -> WorkflowError {
        let mut pending: Vec<StepId> = self
            .workflow
            .step_ids()
            .filter(|id| !self.completed.contains(*id))
            .cloned()
            .collect();
        pending.sort();
        WorkflowError::CircularDependency { pending }
    }

    fn into_result(self, started: Instant, success: bool) -> WorkflowResult {
        let variables = Arc::try_unwrap(self.variables).unwrap_or_else(|shared| (*shared).clone());
        WorkflowResult {
            workflow_id: self.workflow.id().to_string(),
            success,
            step_results: self.results,
            variables,
            start_time: started,
            end_time: now(),
        }
    }
}

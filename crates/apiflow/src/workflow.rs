//! Workflow definition: steps, seed variables and execution limits.

use crate::graph::unresolved_dependencies;
use apiflow_core::{Runner, Step, StepId, Variables, WorkflowError};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Maximum number of steps running at once, unless configured otherwise.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Steps dispatched per second, unless configured otherwise.
pub const DEFAULT_RATE_LIMIT: u32 = 10;

/// A set of dependent steps plus everything needed to run them.
///
/// A workflow is built once and can be executed any number of times; each
/// run starts from a copy of the seed variables.
pub struct Workflow {
    id: String,
    name: String,
    description: String,
    steps: HashMap<StepId, Arc<Step>>,
    variables: Variables,
    max_concurrency: usize,
    rate_limit: u32,
    cancellation: CancellationToken,
    runner: Option<Arc<dyn Runner>>,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut steps: Vec<&StepId> = self.steps.keys().collect();
        steps.sort();
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("steps", &steps)
            .field("variables", &self.variables.len())
            .field("max_concurrency", &self.max_concurrency)
            .field("rate_limit", &self.rate_limit)
            .field("has_runner", &self.runner.is_some())
            .finish()
    }
}

impl Workflow {
    /// Creates an empty workflow with default limits and no runner.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            steps: HashMap::new(),
            variables: Variables::new(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            rate_limit: DEFAULT_RATE_LIMIT,
            cancellation: CancellationToken::new(),
            runner: None,
        }
    }

    /// Creates a builder that accepts steps in any order.
    pub fn builder(id: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(id)
    }

    /// Registers a step.
    ///
    /// Every dependency must already be registered, so steps have to be added
    /// in dependency order. Use [`Workflow::builder`] to add them in any order.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::DuplicateStep`] if the ID is taken, or
    /// [`WorkflowError::UnknownDependency`] for the first unregistered
    /// dependency.
    pub fn add_step(&mut self, step: Step) -> Result<(), WorkflowError> {
        if self.steps.contains_key(step.id()) {
            return Err(WorkflowError::DuplicateStep(step.id().clone()));
        }
        if let Some(dependency) = step
            .dependencies()
            .iter()
            .find(|d| !self.steps.contains_key(*d))
        {
            return Err(WorkflowError::UnknownDependency {
                step_id: step.id().clone(),
                dependency: dependency.clone(),
            });
        }
        self.steps.insert(step.id().clone(), Arc::new(step));
        Ok(())
    }

    /// Sets a seed variable, replacing any previous value.
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name, value);
    }

    /// Sets the runner that performs requests.
    pub fn set_runner(&mut self, runner: Arc<dyn Runner>) {
        self.runner = Some(runner);
    }

    /// Sets the token that cancels runs of this workflow.
    pub fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }

    /// Sets the maximum number of concurrently running steps (at least 1).
    pub fn set_max_concurrency(&mut self, max_concurrency: usize) {
        self.max_concurrency = max_concurrency.max(1);
    }

    /// Sets the dispatch rate in steps per second; 0 disables pacing.
    pub fn set_rate_limit(&mut self, steps_per_second: u32) {
        self.rate_limit = steps_per_second;
    }

    /// Returns the workflow ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the seed variables.
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Returns the maximum number of concurrently running steps.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Returns the dispatch rate in steps per second (0 = unbounded).
    pub fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    /// Returns the token that cancels runs of this workflow.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns the runner, if one is set.
    pub fn runner(&self) -> Option<&Arc<dyn Runner>> {
        self.runner.as_ref()
    }

    /// Returns the step with the given ID.
    pub fn step(&self, id: &str) -> Option<&Arc<Step>> {
        self.steps.get(id)
    }

    /// Returns an iterator over all registered steps, in no particular order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.values().map(Arc::as_ref)
    }

    /// Returns an iterator over all registered step IDs.
    pub fn step_ids(&self) -> impl Iterator<Item = &StepId> {
        self.steps.keys()
    }

    /// Returns `true` if a step with the given ID exists.
    pub fn has_step(&self, id: &str) -> bool {
        self.steps.contains_key(id)
    }

    /// Returns the number of registered steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Builder for [`Workflow`] that links dependencies once all steps are known.
///
/// ```
/// use apiflow::{Request, Step, Workflow, WorkflowError};
///
/// // `orders` is declared before the step it depends on
/// let workflow = Workflow::builder("shop")
///     .step(Step::new("orders", Request::get("/orders")).depends_on(["login"]))
///     .step(Step::new("login", Request::post("/login")))
///     .build()?;
/// assert_eq!(workflow.step_count(), 2);
/// # Ok::<(), WorkflowError>(())
/// ```
pub struct WorkflowBuilder {
    id: String,
    name: String,
    description: String,
    steps: Vec<Step>,
    variables: Variables,
    max_concurrency: usize,
    rate_limit: u32,
    cancellation: Option<CancellationToken>,
    runner: Option<Arc<dyn Runner>>,
}

impl fmt::Debug for WorkflowBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowBuilder")
            .field("id", &self.id)
            .field("steps", &self.steps.iter().map(Step::id).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl WorkflowBuilder {
    /// Creates an empty builder for the workflow `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            description: String::new(),
            steps: Vec::new(),
            variables: Variables::new(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            rate_limit: DEFAULT_RATE_LIMIT,
            cancellation: None,
            runner: None,
        }
    }

    /// Sets the human-readable name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a step. Dependencies are checked by [`build`](Self::build).
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Adds several steps.
    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Sets a seed variable.
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name, value);
        self
    }

    /// Sets the runner that performs requests.
    pub fn runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Sets the maximum number of concurrently running steps (at least 1).
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Sets the dispatch rate in steps per second; 0 disables pacing.
    pub fn rate_limit(mut self, steps_per_second: u32) -> Self {
        self.rate_limit = steps_per_second;
        self
    }

    /// Sets the token that cancels runs of the workflow.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Builds the workflow.
    ///
    /// Steps may reference each other in any order and may even form cycles;
    /// cycles are reported when the workflow is executed.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::DuplicateStep`] for the first repeated ID, or
    /// [`WorkflowError::UnresolvedDependencies`] listing every dependency that
    /// names no step.
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        {
            let mut seen = HashSet::new();
            if let Some(duplicate) = self.steps.iter().find(|s| !seen.insert(s.id())) {
                return Err(WorkflowError::DuplicateStep(duplicate.id().clone()));
            }
        }

        let unresolved = unresolved_dependencies(&self.steps);
        if !unresolved.is_empty() {
            return Err(WorkflowError::UnresolvedDependencies(unresolved));
        }

        let steps = self
            .steps
            .into_iter()
            .map(|step| (step.id().clone(), Arc::new(step)))
            .collect();

        Ok(Workflow {
            id: self.id,
            name: self.name,
            description: self.description,
            steps,
            variables: self.variables,
            max_concurrency: self.max_concurrency,
            rate_limit: self.rate_limit,
            cancellation: self.cancellation.unwrap_or_default(),
            runner: self.runner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiflow_core::Request;

    fn step(id: &str, deps: &[&str]) -> Step {
        Step::new(id, Request::get(format!("/{}", id))).depends_on(deps.iter().copied())
    }

    #[test]
    fn test_new_workflow_defaults() {
        let workflow = Workflow::new("wf", "Workflow", "does things");
        assert_eq!(workflow.id(), "wf");
        assert_eq!(workflow.name(), "Workflow");
        assert_eq!(workflow.description(), "does things");
        assert_eq!(workflow.max_concurrency(), DEFAULT_MAX_CONCURRENCY);
        assert_eq!(workflow.rate_limit(), DEFAULT_RATE_LIMIT);
        assert!(workflow.runner().is_none());
        assert_eq!(workflow.step_count(), 0);
    }

    #[test]
    fn test_add_step_in_dependency_order() {
        let mut workflow = Workflow::new("wf", "", "");
        workflow.add_step(step("login", &[])).expect("first step");
        workflow
            .add_step(step("profile", &["login"]))
            .expect("dependency registered");

        assert!(workflow.has_step("profile"));
        assert_eq!(workflow.step_count(), 2);
        assert_eq!(
            workflow.step("profile").map(|s| s.dependencies().to_vec()),
            Some(vec![StepId::new("login")])
        );
    }

    #[test]
    fn test_add_step_rejects_duplicates() {
        let mut workflow = Workflow::new("wf", "", "");
        workflow.add_step(step("a", &[])).expect("first step");
        assert_eq!(
            workflow.add_step(step("a", &[])),
            Err(WorkflowError::DuplicateStep(StepId::new("a")))
        );
        assert_eq!(workflow.step_count(), 1);
    }

    #[test]
    fn test_add_step_rejects_forward_reference() {
        let mut workflow = Workflow::new("wf", "", "");
        assert_eq!(
            workflow.add_step(step("b", &["a"])),
            Err(WorkflowError::UnknownDependency {
                step_id: StepId::new("b"),
                dependency: StepId::new("a"),
            })
        );
        assert!(!workflow.has_step("b"));
    }

    #[test]
    fn test_setters() {
        let mut workflow = Workflow::new("wf", "", "");
        workflow.set_variable("host", "api.test");
        workflow.set_max_concurrency(0);
        workflow.set_rate_limit(0);

        assert_eq!(workflow.variables().get("host"), Some("api.test"));
        assert_eq!(workflow.max_concurrency(), 1);
        assert_eq!(workflow.rate_limit(), 0);
    }

    #[test]
    fn test_builder_accepts_any_order() {
        let workflow = Workflow::builder("wf")
            .name("Shop")
            .step(step("orders", &["login", "profile"]))
            .step(step("profile", &["login"]))
            .step(step("login", &[]))
            .variable("user", "alice")
            .max_concurrency(2)
            .rate_limit(0)
            .build()
            .expect("valid workflow");

        assert_eq!(workflow.name(), "Shop");
        assert_eq!(workflow.step_count(), 3);
        assert_eq!(workflow.variables().get("user"), Some("alice"));
        assert_eq!(workflow.max_concurrency(), 2);
        assert_eq!(workflow.rate_limit(), 0);
    }

    #[test]
    fn test_builder_reports_all_unresolved_dependencies() {
        let result = Workflow::builder("wf")
            .step(step("b", &["missing", "a"]))
            .step(step("a", &["ghost"]))
            .build();

        assert_eq!(
            result.unwrap_err(),
            WorkflowError::UnresolvedDependencies(vec![
                (StepId::new("a"), StepId::new("ghost")),
                (StepId::new("b"), StepId::new("missing")),
            ])
        );
    }

    #[test]
    fn test_builder_rejects_duplicates() {
        let result = Workflow::builder("wf")
            .steps([step("a", &[]), step("a", &[])])
            .build();
        assert_eq!(
            result.unwrap_err(),
            WorkflowError::DuplicateStep(StepId::new("a"))
        );
    }

    #[test]
    fn test_builder_allows_cycles() {
        let workflow = Workflow::builder("wf")
            .step(step("a", &["b"]))
            .step(step("b", &["a"]))
            .build()
            .expect("cycles are detected at execution");
        assert_eq!(workflow.step_count(), 2);
    }
}

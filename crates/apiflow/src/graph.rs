//! Dependency graph over a workflow's steps.

use apiflow_core::{Step, StepId, WorkflowError};
use std::collections::{HashMap, HashSet};

/// Forward and reverse dependency edges for one execution.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// step -> steps that list it in `depends_on`.
    dependents: HashMap<StepId, Vec<StepId>>,
    /// step -> its declared dependencies.
    dependencies: HashMap<StepId, Vec<StepId>>,
    /// Steps with no dependencies, sorted.
    entry_points: Vec<StepId>,
}

impl DependencyGraph {
    /// Builds the graph, checking that every declared dependency exists.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::UnresolvedDependencies`] listing every
    /// `(step, missing dependency)` pair, sorted.
    pub fn build<'a>(steps: impl IntoIterator<Item = &'a Step>) -> Result<Self, WorkflowError> {
        let steps: Vec<&Step> = steps.into_iter().collect();

        let unresolved = unresolved_dependencies(steps.iter().copied());
        if !unresolved.is_empty() {
            return Err(WorkflowError::UnresolvedDependencies(unresolved));
        }

        let mut dependents: HashMap<StepId, Vec<StepId>> = HashMap::new();
        let mut dependencies: HashMap<StepId, Vec<StepId>> = HashMap::new();

        for step in &steps {
            dependents.entry(step.id().clone()).or_default();
            dependencies.insert(step.id().clone(), step.dependencies().to_vec());
        }

        for step in &steps {
            for dependency in step.dependencies() {
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .push(step.id().clone());
            }
        }
        for edges in dependents.values_mut() {
            edges.sort();
        }

        let mut entry_points: Vec<StepId> = steps
            .iter()
            .filter(|step| step.dependencies().is_empty())
            .map(|step| step.id().clone())
            .collect();
        entry_points.sort();

        Ok(Self {
            dependents,
            dependencies,
            entry_points,
        })
    }

    /// Returns the steps that can run immediately.
    pub fn entry_points(&self) -> &[StepId] {
        &self.entry_points
    }

    /// Returns the steps that depend on `id`.
    pub fn dependents(&self, id: &str) -> &[StepId] {
        self.dependents.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Returns the declared dependencies of `id`.
    pub fn dependencies(&self, id: &str) -> &[StepId] {
        self.dependencies.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Returns `true` if the graph has no steps.
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Returns `true` if every dependency of `id` has completed.
    pub fn is_ready(&self, id: &str, completed: &HashSet<StepId>) -> bool {
        self.dependencies(id).iter().all(|d| completed.contains(d))
    }

    /// Dependents of the just-completed step `id` whose dependencies are now
    /// all completed.
    pub fn newly_ready(&self, id: &str, completed: &HashSet<StepId>) -> Vec<StepId> {
        self.dependents(id)
            .iter()
            .filter(|dependent| !completed.contains(*dependent))
            .filter(|dependent| self.is_ready(dependent.as_str(), completed))
            .cloned()
            .collect()
    }
}

/// Returns every `(step, dependency)` pair whose dependency is not among
/// `steps`, sorted.
pub(crate) fn unresolved_dependencies<'a>(
    steps: impl IntoIterator<Item = &'a Step>,
) -> Vec<(StepId, StepId)> {
    let steps: Vec<&Step> = steps.into_iter().collect();
    let known: HashSet<&StepId> = steps.iter().map(|step| step.id()).collect();

    let mut unresolved: Vec<(StepId, StepId)> = steps
        .iter()
        .flat_map(|step| {
            step.dependencies()
                .iter()
                .filter(|d| !known.contains(d))
                .map(|d| (step.id().clone(), d.clone()))
        })
        .collect();
    unresolved.sort();
    unresolved
}

//! A dependency-aware workflow engine for API request chains.
//!
//! Steps are templated requests. A step runs once all of its dependencies
//! have completed; values extracted from earlier JSON responses are
//! substituted into later requests as `${name}`. Runs are bounded by a
//! per-workflow concurrency limit and dispatch rate, retry with exponential
//! backoff, and stop cooperatively on cancellation.
//!
//! # Example
//!
//! ```rust,no_run
//! use apiflow::prelude::*;
//! use std::sync::Arc;
//!
//! struct Http;
//!
//! #[async_trait]
//! impl Runner for Http {
//!     async fn execute(&self, _request: &Request) -> Result<Response, RunnerError> {
//!         // hand the request to an HTTP client here
//!         Ok(Response::new(200))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut workflow = Workflow::new("signup", "Sign-up", "register then log in");
//!     workflow.add_step(
//!         Step::new("register", Request::post("https://api.test/users"))
//!             .extract("uid", "$.id"),
//!     )?;
//!     workflow.add_step(
//!         Step::new("profile", Request::get("https://api.test/users/${uid}"))
//!             .depends_on(["register"]),
//!     )?;
//!     workflow.set_runner(Arc::new(Http));
//!
//!     let result = Engine::default().execute(&workflow).await?;
//!     println!("{} steps in {:?}", result.step_results.len(), result.duration());
//!     Ok(())
//! }
//! ```

mod config;
mod definition;
mod engine;
mod executor;
mod graph;
mod rate_limit;
#[cfg(test)]
mod testing;
mod workflow;

// Re-export core types
pub use apiflow_core::*;

pub use config::{EngineConfig, SchedulingMode, DEFAULT_STEP_TIMEOUT};
pub use definition::{StepDefinition, WorkflowDefinition};
pub use engine::Engine;
pub use graph::DependencyGraph;
pub use rate_limit::RateLimiter;
pub use workflow::{Workflow, WorkflowBuilder, DEFAULT_MAX_CONCURRENCY, DEFAULT_RATE_LIMIT};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        BoxError, Engine, EngineConfig, HookType, Request, Response, RetryConfig, Runner,
        RunnerError, SchedulingMode, Step, StepConfig, StepHooks, StepId, StepResult, Variables,
        Workflow, WorkflowBuilder, WorkflowError, WorkflowFailure, WorkflowResult,
    };
    pub use async_trait::async_trait;
    pub use tokio_util::sync::CancellationToken;
}

//! Core types for the apiflow workflow engine.
//!
//! This crate holds the runtime-free building blocks. The scheduler itself
//! lives in the `apiflow` crate.
//!
//! # Core Types
//!
//! - [`Step`] - A templated request plus dependencies, extractions and retry settings
//! - [`Request`] / [`Response`] - What a [`Runner`] sends and receives
//! - [`Variables`] - Values shared between steps and `${name}` substitution
//! - [`JsonPath`] - The path subset used to extract variables from JSON bodies
//! - [`StepResult`] / [`WorkflowResult`] - Execution outcomes
//! - [`WorkflowError`] - Fatal configuration and scheduling errors
//!
//! # Seams
//!
//! - [`Runner`] - Performs one request attempt
//! - [`StepHooks`] - Success/error callbacks that may abort a run

mod error;
pub mod path;
mod request;
mod result;
#[doc(hidden)]
pub mod serde_duration;
mod step;
mod traits;
mod variables;

pub use error::{HookType, RunnerError, WorkflowError, WorkflowFailure};
pub use path::{JsonPath, PathError};
pub use request::{Request, Response};
pub use result::{StepResult, WorkflowResult};
pub use step::{RetryConfig, RetryConfigError, Step, StepConfig, StepId};
pub use traits::{BoxError, Runner, StepHooks};
pub use variables::Variables;

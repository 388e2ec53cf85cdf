//! In-memory runners for unit tests.

use apiflow_core::{Request, Response, Runner, RunnerError};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

type Script = dyn Fn(&Request, usize) -> Result<Response, RunnerError> + Send + Sync;

/// Answers each call with `script(request, call_index)` and records what was
/// sent.
pub(crate) struct ScriptedRunner {
    script: Box<Script>,
    delay: Option<Duration>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedRunner {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&Request, usize) -> Result<Response, RunnerError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Sleeps for `delay` before answering every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn execute(&self, request: &Request) -> Result<Response, RunnerError> {
        let call = {
            let mut requests = self.requests.lock().expect("requests lock");
            requests.push(request.clone());
            requests.len() - 1
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.script)(request, call)
    }
}

pub(crate) fn json_ok(value: serde_json::Value) -> Response {
    Response::json(200, &value)
}

use apiflow::prelude::*;
use apiflow::WorkflowDefinition;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

type Handler = dyn Fn(&Request, usize) -> Result<Response, RunnerError> + Send + Sync;

/// In-memory runner: answers through `handler`, optionally after a delay,
/// and records every request plus the peak number of concurrent calls.
struct MockRunner {
    handler: Box<Handler>,
    delay: Duration,
    requests: Mutex<Vec<Request>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockRunner {
    fn new<F>(handler: F) -> Self
    where
        F: Fn(&Request, usize) -> Result<Response, RunnerError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn ok() -> Self {
        Self::new(|_, _| Ok(Response::new(200)))
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .map(|r| r.url.clone())
            .collect()
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Runner for MockRunner {
    async fn execute(&self, request: &Request) -> Result<Response, RunnerError> {
        let call = {
            let mut requests = self.requests.lock().expect("requests lock");
            requests.push(request.clone());
            requests.len() - 1
        };
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.handler)(request, call)
    }
}

fn step(id: &str, deps: &[&str]) -> Step {
    Step::new(id, Request::get(format!("/{}", id))).depends_on(deps.iter().copied())
}

fn engine(mode: SchedulingMode) -> Engine {
    Engine::new(EngineConfig::default().with_scheduling(mode))
}

const MODES: [SchedulingMode; 2] = [SchedulingMode::Wave, SchedulingMode::Streaming];

#[tokio::test(start_paused = true)]
async fn test_dependencies_finish_before_dependents_start() {
    for mode in MODES {
        let runner = Arc::new(MockRunner::ok().with_delay(Duration::from_millis(20)));
        let workflow = Workflow::builder("diamond")
            .step(step("top", &[]))
            .step(step("left", &["top"]))
            .step(step("right", &["top"]))
            .step(step("bottom", &["left", "right"]))
            .runner(runner.clone())
            .rate_limit(0)
            .build()
            .expect("valid workflow");

        let result = assert_ok!(engine(mode).execute(&workflow).await);
        assert!(result.success);
        assert_eq!(result.step_results.len(), 4);

        for step in workflow.steps() {
            let started = result.step(step.id().as_str()).expect("step ran").start_time;
            for dependency in step.dependencies() {
                let finished = result
                    .step(dependency.as_str())
                    .expect("dependency ran")
                    .end_time;
                assert!(
                    started >= finished,
                    "{} started before {} finished",
                    step.id(),
                    dependency
                );
            }
        }
        assert_eq!(runner.urls()[0], "/top");
        assert_eq!(runner.urls()[3], "/bottom");
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
    for mode in MODES {
        let runner = Arc::new(MockRunner::ok().with_delay(Duration::from_millis(100)));
        let mut builder = Workflow::builder("fan-out")
            .runner(runner.clone())
            .max_concurrency(3)
            .rate_limit(0);
        for i in 0..8 {
            builder = builder.step(step(&format!("s{}", i), &[]));
        }
        let workflow = builder.build().expect("valid workflow");

        let started = Instant::now();
        let result = assert_ok!(engine(mode).execute(&workflow).await);

        assert_eq!(result.step_results.len(), 8);
        assert_eq!(runner.peak(), 3);
        // 8 steps through 3 slots take at least 3 rounds
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_rate_is_bounded() {
    for mode in MODES {
        let runner = Arc::new(MockRunner::ok());
        let workflow = Workflow::builder("paced")
            .steps((0..5).map(|i| step(&format!("s{}", i), &[])))
            .runner(runner.clone())
            .rate_limit(10)
            .build()
            .expect("valid workflow");

        let started = Instant::now();
        assert_ok!(engine(mode).execute(&workflow).await);

        // (n - 1) / r seconds
        assert!(started.elapsed() >= Duration::from_millis(400));
        assert_eq!(runner.urls().len(), 5);
    }
}

#[tokio::test]
async fn test_cycle_terminates_with_error() {
    for mode in MODES {
        let workflow = Workflow::builder("cycle")
            .step(step("a", &["b"]))
            .step(step("b", &["a"]))
            .runner(Arc::new(MockRunner::ok()))
            .build()
            .expect("valid workflow");

        let failure = assert_err!(engine(mode).execute(&workflow).await);
        assert_eq!(
            failure.error,
            WorkflowError::CircularDependency {
                pending: vec![StepId::new("a"), StepId::new("b")],
            }
        );
        assert!(!failure.result.success);
        assert!(failure.result.step_results.is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_until_success() {
    let runner = Arc::new(MockRunner::new(|_, call| {
        if call < 2 {
            Err(RunnerError::new("dial tcp: connection refused"))
        } else {
            Ok(Response::new(200))
        }
    }));
    let mut workflow = Workflow::new("retry", "Retry", "");
    workflow
        .add_step(
            step("flaky", &[]).with_retry(RetryConfig::exponential(3, Duration::from_millis(100))),
        )
        .expect("valid step");
    workflow.set_runner(runner.clone());

    let started = Instant::now();
    let result = assert_ok!(Engine::default().execute(&workflow).await);

    let flaky = result.step("flaky").expect("step ran");
    assert!(flaky.success);
    assert_eq!(flaky.retry_count, 2);
    assert_eq!(flaky.status(), Some(200));
    assert_eq!(runner.urls().len(), 3);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_extracted_variables_reach_dependents() {
    for mode in MODES {
        let runner = Arc::new(MockRunner::new(|request, _| match request.url.as_str() {
            "/register" => Ok(Response::json(201, &json!({"id": "42", "name": "alice"}))),
            _ => Ok(Response::json(200, &json!({"ok": true}))),
        }));
        let mut workflow = Workflow::new("propagation", "", "");
        workflow.set_rate_limit(0);
        workflow.set_variable("tenant", "acme");
        workflow
            .add_step(
                Step::new(
                    "register",
                    Request::post("/register").body(r#"{"tenant":"${tenant}"}"#),
                )
                .extract("uid", "$.id")
                .extract("nickname", "$.profile.nickname"),
            )
            .expect("valid step");
        workflow
            .add_step(
                Step::new("profile", Request::get("/users/${uid}/${nickname}"))
                    .depends_on(["register"]),
            )
            .expect("valid step");
        workflow.set_runner(runner.clone());

        let result = assert_ok!(engine(mode).execute(&workflow).await);

        // unresolvable paths leave the variable absent and the placeholder intact
        assert_eq!(runner.urls(), vec!["/register", "/users/42/${nickname}"]);
        assert_eq!(result.variables.get("uid"), Some("42"));
        assert_eq!(result.variables.get("tenant"), Some("acme"));
        assert!(result.variables.get("nickname").is_none());
        let register = result.step("register").expect("step ran");
        assert_eq!(register.extracted_variables.len(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_step_does_not_block_dependents() {
    for mode in MODES {
        let runner = Arc::new(MockRunner::new(|request, _| {
            if request.url == "/broken" {
                Err(RunnerError::new("certificate verify failed"))
            } else {
                Ok(Response::new(200))
            }
        }));
        let workflow = Workflow::builder("partial")
            .step(step("broken", &[]))
            .step(step("after", &["broken"]))
            .runner(runner)
            .build()
            .expect("valid workflow");

        let result = assert_ok!(engine(mode).execute(&workflow).await);

        assert!(result.success);
        let broken = result.step("broken").expect("step ran");
        assert!(!broken.success);
        assert!(broken.response.is_none());
        assert_eq!(broken.retry_count, 0);
        assert_eq!(broken.error.as_deref(), Some("certificate verify failed"));
        assert!(result.step("after").expect("dependent ran").success);
    }
}

struct RejectAll {
    calls: AtomicUsize,
}

#[async_trait]
impl StepHooks for RejectAll {
    async fn on_success(&self, result: &StepResult) -> Result<(), BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(format!("unexpected status {:?}", result.status()).into())
    }
}

#[tokio::test(start_paused = true)]
async fn test_hook_error_aborts_run() {
    for mode in MODES {
        let hooks = Arc::new(RejectAll {
            calls: AtomicUsize::new(0),
        });
        let runner = Arc::new(MockRunner::ok().with_delay(Duration::from_millis(10)));
        let workflow = Workflow::builder("abort")
            .step(step("checked", &[]).with_hooks(hooks.clone()))
            .step(step("sibling", &[]))
            .step(step("after", &["checked"]))
            .runner(runner.clone())
            .rate_limit(0)
            .build()
            .expect("valid workflow");

        let failure = assert_err!(engine(mode).execute(&workflow).await);

        assert_eq!(
            failure.error,
            WorkflowError::HookError {
                step_id: StepId::new("checked"),
                hook_type: HookType::OnSuccess,
                details: "unexpected status Some(200)".to_string(),
            }
        );
        assert!(!failure.result.success);
        assert!(failure.result.step("checked").is_some());
        assert!(failure.result.step("sibling").is_some());
        assert!(failure.result.step("after").is_none());
        assert!(!runner.urls().contains(&"/after".to_string()));
        assert_eq!(hooks.calls.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_backoff() {
    for mode in MODES {
        let cancel = CancellationToken::new();
        let runner = Arc::new(MockRunner::new(|_, _| Ok(Response::new(503))));
        let workflow = Workflow::builder("cancelled")
            .step(step("busy", &[]).with_retry(RetryConfig::fixed(5, Duration::from_secs(60))))
            .step(step("after", &["busy"]))
            .runner(runner.clone())
            .cancellation_token(cancel.clone())
            .build()
            .expect("valid workflow");

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let failure = assert_err!(engine(mode).execute(&workflow).await);

        assert_eq!(failure.error, WorkflowError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(runner.urls(), vec!["/busy"]);
        assert!(failure.result.step("after").is_none());
    }
}

#[tokio::test]
async fn test_missing_runner_is_reported() {
    let mut workflow = Workflow::new("no-runner", "", "");
    workflow.add_step(step("a", &[])).expect("valid step");

    let failure = assert_err!(Engine::default().execute(&workflow).await);
    assert_eq!(failure.error, WorkflowError::MissingRunner);
    assert_eq!(
        failure.to_string(),
        "Workflow 'no-runner' failed: No runner configured for workflow"
    );
}

#[tokio::test(start_paused = true)]
async fn test_streaming_does_not_wait_for_slow_siblings() {
    let runner = Arc::new(MockRunner::new(|_, _| Ok(Response::new(200))));
    let slow = Step::new("slow", Request::get("/slow"));
    let workflow = Workflow::builder("mixed")
        .step(slow)
        .step(step("fast", &[]))
        .step(step("next", &["fast"]))
        .runner(Arc::new(Delayed {
            inner: runner,
            slow: Duration::from_secs(1),
        }))
        .rate_limit(0)
        .build()
        .expect("valid workflow");

    let streaming = assert_ok!(engine(SchedulingMode::Streaming).execute(&workflow).await);
    let slow_end = streaming.step("slow").expect("ran").end_time;
    assert!(streaming.step("next").expect("ran").start_time < slow_end);

    let waves = assert_ok!(engine(SchedulingMode::Wave).execute(&workflow).await);
    let slow_end = waves.step("slow").expect("ran").end_time;
    assert!(waves.step("next").expect("ran").start_time >= slow_end);
}

/// Delays only requests to `/slow`.
struct Delayed {
    inner: Arc<MockRunner>,
    slow: Duration,
}

#[async_trait]
impl Runner for Delayed {
    async fn execute(&self, request: &Request) -> Result<Response, RunnerError> {
        if request.url == "/slow" {
            tokio::time::sleep(self.slow).await;
        }
        self.inner.execute(request).await
    }
}

struct RecordErrors {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl StepHooks for RecordErrors {
    async fn on_error(&self, result: &StepResult) -> Result<(), BoxError> {
        self.seen
            .lock()
            .expect("seen lock")
            .push(result.error.clone().unwrap_or_default());
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_retried_then_reported_to_hook() {
    let hooks = Arc::new(RecordErrors {
        seen: Mutex::new(Vec::new()),
    });
    let runner = Arc::new(MockRunner::ok().with_delay(Duration::from_secs(10)));
    let mut workflow = Workflow::new("timeouts", "", "");
    workflow
        .add_step(
            step("hang", &[])
                .with_timeout(Duration::from_millis(200))
                .with_retry(RetryConfig::fixed(2, Duration::from_millis(50)))
                .with_hooks(hooks.clone()),
        )
        .expect("valid step");
    workflow.set_runner(runner.clone());

    let result = assert_ok!(Engine::default().execute(&workflow).await);

    let hang = result.step("hang").expect("step ran");
    assert!(!hang.success);
    assert_eq!(hang.retry_count, 2);
    assert_eq!(runner.urls().len(), 3);
    assert_eq!(
        *hooks.seen.lock().expect("seen lock"),
        vec!["request timeout after 200ms".to_string()]
    );
}

#[tokio::test]
async fn test_definition_runs_end_to_end() {
    let definition = WorkflowDefinition::from_json(
        r#"{
            "id": "login-flow",
            "rate_limit": 0,
            "variables": {"host": "https://api.test"},
            "steps": [
                {"id": "orders", "url": "${host}/orders?user=${uid}", "depends_on": ["login"]},
                {"id": "login", "method": "POST", "url": "${host}/login",
                 "extract": {"uid": "user.id"}}
            ]
        }"#,
    )
    .expect("valid definition");

    let runner = Arc::new(MockRunner::new(|request, _| {
        if request.method == "POST" {
            Ok(Response::new(200)
                .with_header("Content-Type", "application/json; charset=utf-8")
                .with_body(r#"{"user": {"id": 7}}"#))
        } else {
            Ok(Response::new(200))
        }
    }));
    let workflow = definition
        .into_builder()
        .expect("valid steps")
        .runner(runner.clone())
        .build()
        .expect("valid workflow");

    let result = assert_ok!(Engine::default().execute(&workflow).await);
    assert!(result.success);
    assert_eq!(
        runner.urls(),
        vec!["https://api.test/login", "https://api.test/orders?user=7"]
    );
}

fn cancel_after(token: &CancellationToken, delay: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        token.cancel();
    });
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_while_waiting_for_a_slot() {
    for mode in MODES {
        let cancel = CancellationToken::new();
        let runner = Arc::new(MockRunner::ok().with_delay(Duration::from_secs(10)));
        let workflow = Workflow::builder("saturated")
            .steps((0..3).map(|i| step(&format!("s{}", i), &[])))
            .runner(runner.clone())
            .max_concurrency(1)
            .rate_limit(0)
            .cancellation_token(cancel.clone())
            .build()
            .expect("valid workflow");

        cancel_after(&cancel, Duration::from_secs(1));
        let started = Instant::now();
        let failure = assert_err!(engine(mode).execute(&workflow).await);

        assert_eq!(failure.error, WorkflowError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(runner.urls(), vec!["/s0"]);
        assert!(failure.result.step_results.is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_while_waiting_for_a_rate_tick() {
    for mode in MODES {
        let cancel = CancellationToken::new();
        let runner = Arc::new(MockRunner::ok());
        let workflow = Workflow::builder("paced")
            .steps((0..10).map(|i| step(&format!("s{}", i), &[])))
            .runner(runner.clone())
            .rate_limit(1)
            .cancellation_token(cancel.clone())
            .build()
            .expect("valid workflow");

        // permits at 0s, 1s and 2s; the fourth would come at 3s
        cancel_after(&cancel, Duration::from_millis(2500));
        let started = Instant::now();
        let failure = assert_err!(engine(mode).execute(&workflow).await);

        assert_eq!(failure.error, WorkflowError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(runner.urls(), vec!["/s0", "/s1", "/s2"]);
        for i in 3..10 {
            assert!(failure.result.step(&format!("s{}", i)).is_none());
        }
    }
}

#[tokio::test]
async fn test_extreme_rate_limit_runs() {
    for mode in MODES {
        let runner = Arc::new(MockRunner::ok());
        let workflow = Workflow::builder("unthrottled")
            .steps((0..4).map(|i| step(&format!("s{}", i), &[])))
            .runner(runner.clone())
            .rate_limit(u32::MAX)
            .build()
            .expect("valid workflow");

        let result = assert_ok!(engine(mode).execute(&workflow).await);
        assert!(result.success);
        assert_eq!(runner.urls().len(), 4);
    }
}

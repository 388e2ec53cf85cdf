//! Login, then fetch the profile and orders of the logged-in user.
//!
//! Runs against an in-memory API; set `RUST_LOG=debug` to see dispatch and
//! retry events.

use apiflow::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fake shop API. The orders endpoint is overloaded for its first call.
#[derive(Default)]
struct ShopApi {
    order_calls: AtomicU32,
}

#[async_trait]
impl Runner for ShopApi {
    async fn execute(&self, request: &Request) -> Result<Response, RunnerError> {
        tokio::time::sleep(Duration::from_millis(30)).await;

        let path = request.url.trim_start_matches("https://shop.test");
        match (request.method.as_str(), path) {
            ("POST", "/login") => Ok(Response::json(
                200,
                &json!({"token": "s3cr3t", "user": {"id": 42, "name": "alice"}}),
            )),
            ("GET", "/users/42") => match request.headers.get("Authorization").map(String::as_str) {
                Some("Bearer s3cr3t") => Ok(Response::json(
                    200,
                    &json!({"profile": {"email": "alice@shop.test", "tier": "gold"}}),
                )),
                _ => Ok(Response::new(401)),
            },
            ("GET", "/users/42/orders") => {
                if self.order_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(Response::new(503))
                } else {
                    Ok(Response::json(200, &json!({"orders": [{"id": "o-1"}, {"id": "o-2"}]})))
                }
            }
            _ => Err(RunnerError::new(format!("connection refused: {}", request.url))),
        }
    }
}

struct PrintOrders;

#[async_trait]
impl StepHooks for PrintOrders {
    async fn on_success(&self, result: &StepResult) -> Result<(), BoxError> {
        if let Some(response) = &result.response {
            println!("orders: {}", response.text());
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let retry = RetryConfig::exponential(2, Duration::from_millis(100));

    let mut workflow = Workflow::new("login-flow", "Login flow", "login, profile and orders");
    workflow.set_variable("host", "https://shop.test");
    workflow.set_variable("user", "alice");
    workflow.add_step(
        Step::new(
            "login",
            Request::post("${host}/login").body(r#"{"user": "${user}"}"#),
        )
        .extract("token", "$.token")
        .extract("uid", "user.id"),
    )?;
    workflow.add_step(
        Step::new(
            "profile",
            Request::get("${host}/users/${uid}").header("Authorization", "Bearer ${token}"),
        )
        .depends_on(["login"])
        .extract("email", "profile.email"),
    )?;
    workflow.add_step(
        Step::new("orders", Request::get("${host}/users/${uid}/orders"))
            .depends_on(["login"])
            .extract("first_order", "orders[0].id")
            .with_retry(retry)
            .with_hooks(Arc::new(PrintOrders)),
    )?;
    workflow.set_runner(Arc::new(ShopApi::default()));
    workflow.set_max_concurrency(2);

    match Engine::default().execute(&workflow).await {
        Ok(result) => {
            println!("Workflow completed in {:?}", result.duration());
            let mut ids: Vec<&StepId> = result.step_results.keys().collect();
            ids.sort();
            for id in ids {
                if let Some(step) = result.step(id.as_str()) {
                    println!(
                        "  {:<8} status={:?} retries={}",
                        id,
                        step.status(),
                        step.retry_count
                    );
                }
            }
            for name in ["token", "uid", "email", "first_order"] {
                println!("  ${{{}}} = {}", name, result.variables.get(name).unwrap_or("-"));
            }
        }
        Err(failure) => {
            eprintln!("{}", failure);
            for id in failure.result.failed_steps() {
                eprintln!("  failed: {}", id);
            }
        }
    }

    Ok(())
}

//! Shared test fixtures: a scriptable `HttpClient` fake and a small helper
//! to drive a `Worker` to quiescence without real-time sleeps.

use std::sync::Arc;

use async_trait::async_trait;
use flowloom::executors::email::NullMailer;
use flowloom::executors::http::{HttpClient, HttpResponse};
use flowloom::persistence::InMemoryAdapter;
use flowloom::runtime::{RunnerConfig, Worker};
use serde_json::{json, Value};

/// Always answers with the same canned JSON body, regardless of request.
pub struct FakeHttpClient {
    pub body: Value,
}

impl FakeHttpClient {
    pub fn json(body: Value) -> Self {
        Self { body }
    }
}

#[async_trait]
impl HttpClient for FakeHttpClient {
    async fn request(
        &self,
        _method: &str,
        _url: &str,
        _headers: Option<&Value>,
        _body: Option<&Value>,
    ) -> Result<HttpResponse, String> {
        Ok(HttpResponse {
            status: 200,
            status_text: "OK".to_string(),
            headers: json!({}),
            body: self.body.clone(),
        })
    }
}

/// A worker with zero backoff, so retried `FailFor` steps are immediately
/// re-claimable rather than waiting out real exponential backoff.
pub fn zero_backoff_worker(adapter: Arc<InMemoryAdapter>, http: Arc<dyn HttpClient>) -> Worker<InMemoryAdapter> {
    let mut config = RunnerConfig::default().with_worker_id("test-worker");
    config.backoff_base_ms = 0;
    Worker::new(adapter, http, Arc::new(NullMailer), config)
}

/// Call `step_once` up to `max_steps` times. Returns once the adapter has
/// nothing runnable left to claim (instance reached a terminal state or is
/// waiting on a future `next_run_at`).
pub async fn drive_to_quiescence(worker: &Worker<InMemoryAdapter>, max_steps: usize) {
    for _ in 0..max_steps {
        if !worker.step_once().await.expect("step_once should not error in these fixtures") {
            return;
        }
    }
    panic!("worker did not reach quiescence within {max_steps} steps");
}

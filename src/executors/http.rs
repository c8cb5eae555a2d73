//! The `HitEndpoint` executor and its injectable HTTP collaborator.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::blackboard::{self, Blackboard, Patch};
use crate::definition::HitEndpointProps;
use crate::step::{ExecutorContext, StepResult};

use super::{value_to_string, ExecutorError, NodeExecutor};

const HIT_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(30);

/// A single HTTP response, already shaped the way `HitEndpoint` writes it
/// to the blackboard.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Value,
    /// JSON-parsed body if the response parsed as JSON, otherwise the raw
    /// text.
    pub body: Value,
}

/// The HTTP collaborator `HitEndpoint` calls through. Injected via
/// [`ExecutorContext`] so tests can substitute a fake instead of making
/// real network calls.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: Option<&Value>,
        body: Option<&Value>,
    ) -> Result<HttpResponse, String>;
}

/// `reqwest`-backed [`HttpClient`], bounded by a 30s total timeout.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HIT_ENDPOINT_TIMEOUT)
                .build()
                .expect("reqwest client configuration is static and always valid"),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn request(
        &self,
        method: &str,
        url: &str,
        headers: Option<&Value>,
        body: Option<&Value>,
    ) -> Result<HttpResponse, String> {
        let method = reqwest::Method::from_bytes(method.as_bytes()).map_err(|e| e.to_string())?;
        let mut builder = self.client.request(method, url);
        if let Some(Value::Object(map)) = headers {
            for (k, v) in map {
                builder = builder.header(k, value_to_string(v));
            }
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        let header_map: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or_default())))
            .collect();
        let text = response.text().await.map_err(|e| e.to_string())?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers: Value::Object(header_map),
            body,
        })
    }
}

pub struct HitEndpointExecutor<'a> {
    pub props: &'a HitEndpointProps,
}

#[async_trait]
impl<'a> NodeExecutor for HitEndpointExecutor<'a> {
    async fn execute(&self, scoped_bb: &Blackboard, ctx: &ExecutorContext<'_>) -> Result<StepResult, ExecutorError> {
        let url = blackboard::resolve_refs(&self.props.url, scoped_bb);
        let method = blackboard::resolve_refs(&self.props.method, scoped_bb);
        let headers = self
            .props
            .headers
            .as_ref()
            .map(|h| blackboard::resolve_refs(h, scoped_bb));
        let body = self
            .props
            .body
            .as_ref()
            .map(|b| blackboard::resolve_refs(b, scoped_bb));

        let url = value_to_string(&url);
        let method = value_to_string(&method);

        match ctx.http.request(&method, &url, headers.as_ref(), body.as_ref()).await {
            Ok(resp) => {
                let patch_value = json!({
                    "status": resp.status,
                    "statusText": resp.status_text,
                    "headers": resp.headers,
                    "body": resp.body,
                });
                Ok(StepResult::success_with(vec![Patch::set(
                    self.props.assign_to.clone(),
                    patch_value,
                )]))
            }
            Err(e) => Ok(StepResult::fail(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::email::NullMailer;
    use crate::executors::kv::InMemoryKvStore;
    use serde_json::json;

    struct FakeHttpClient;

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
                body: json!({"slideshow": {"title": "hi", "slides": [1, 2]}}),
            })
        }
    }

    #[tokio::test]
    async fn success_writes_shaped_response_at_assign_to() {
        let props = HitEndpointProps {
            url: json!("https://example.test/json"),
            method: json!("GET"),
            headers: None,
            body: None,
            assign_to: "$.r".to_string(),
        };
        let http = FakeHttpClient;
        let kv = InMemoryKvStore::default();
        let mailer = NullMailer;
        let ctx = ExecutorContext {
            attempt: 1,
            http: &http,
            kv: &kv,
            mailer: &mailer,
        };
        let result = HitEndpointExecutor { props: &props }
            .execute(&blackboard::empty(), &ctx)
            .await
            .unwrap();
        match result {
            StepResult::Success { patches } => {
                assert_eq!(patches.len(), 1);
                match &patches[0] {
                    Patch::Set { path, value } => {
                        assert_eq!(path, "$.r");
                        assert_eq!(value["status"], json!(200));
                        assert_eq!(value["body"]["slideshow"]["title"], json!("hi"));
                    }
                    other => panic!("expected Set patch, got {other:?}"),
                }
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }

    struct FailingHttpClient;

    #[async_trait]
    impl HttpClient for FailingHttpClient {
        async fn request(
            &self,
            _method: &str,
            _url: &str,
            _headers: Option<&Value>,
            _body: Option<&Value>,
        ) -> Result<HttpResponse, String> {
            Err("connection refused".to_string())
        }
    }

    #[tokio::test]
    async fn network_failure_yields_fail_not_error() {
        let props = HitEndpointProps {
            url: json!("https://example.test/down"),
            method: json!("GET"),
            headers: None,
            body: None,
            assign_to: "$.r".to_string(),
        };
        let http = FailingHttpClient;
        let kv = InMemoryKvStore::default();
        let mailer = NullMailer;
        let ctx = ExecutorContext {
            attempt: 1,
            http: &http,
            kv: &kv,
            mailer: &mailer,
        };
        let result = HitEndpointExecutor { props: &props }
            .execute(&blackboard::empty(), &ctx)
            .await
            .unwrap();
        assert!(matches!(result, StepResult::Fail { .. }));
    }
}

//! The `SendEmail` executor and its injectable mail collaborator.
//!
//! Actual mail delivery is out of scope (`spec.md` §1); the default
//! [`Mailer`] emits the message to the tracing channel so it is observable
//! without needing a real SMTP integration.

use async_trait::async_trait;
use tracing::info;

use crate::blackboard::{self, Blackboard};
use crate::definition::SendEmailProps;
use crate::step::{ExecutorContext, StepResult};

use super::{value_to_string, ExecutorError, NodeExecutor};

/// The mail collaborator `SendEmail` calls through. A production
/// deployment swaps this for a real SMTP/API-backed implementation
/// without touching the executor itself.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), String>;
}

/// Default mailer: emits the message to the tracing channel instead of
/// delivering it anywhere.
pub struct NullMailer;

#[async_trait]
impl Mailer for NullMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), String> {
        info!(to, subject, body, "email emitted");
        Ok(())
    }
}

pub struct SendEmailExecutor<'a> {
    pub props: &'a SendEmailProps,
}

#[async_trait]
impl<'a> NodeExecutor for SendEmailExecutor<'a> {
    async fn execute(&self, scoped_bb: &Blackboard, ctx: &ExecutorContext<'_>) -> Result<StepResult, ExecutorError> {
        let to = value_to_string(&blackboard::resolve_refs(&self.props.to, scoped_bb));
        let subject = value_to_string(&blackboard::resolve_refs(&self.props.subject, scoped_bb));
        let body = value_to_string(&blackboard::resolve_refs(&self.props.body, scoped_bb));
        match ctx.mailer.send(&to, &subject, &body).await {
            Ok(()) => Ok(StepResult::success()),
            Err(e) => Ok(StepResult::fail(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::http::ReqwestHttpClient;
    use crate::executors::kv::InMemoryKvStore;
    use serde_json::json;

    #[tokio::test]
    async fn resolves_refs_and_succeeds() {
        let props = SendEmailProps {
            to: json!("u@x"),
            subject: json!({"__ref": true, "path": "$.__item.title"}),
            body: json!({"__ref": true, "path": "$.__item.type"}),
        };
        let bb = json!({"__item": {"title": "hi", "type": "promo"}});
        let http = ReqwestHttpClient::new();
        let kv = InMemoryKvStore::default();
        let mailer = NullMailer;
        let ctx = ExecutorContext {
            attempt: 1,
            http: &http,
            kv: &kv,
            mailer: &mailer,
        };
        let result = SendEmailExecutor { props: &props }.execute(&bb, &ctx).await.unwrap();
        assert_eq!(result, StepResult::success());
    }
}

//! The `Sleep` executor: marks its step succeeded immediately but asks the
//! scheduler to hold the instance runnable-but-idle until a future deadline
//! (see the "wait as success" design note on [`crate::step::StepResult`]).

use async_trait::async_trait;
use chrono::Utc;

use crate::blackboard::{self, Blackboard};
use crate::definition::SleepProps;
use crate::step::{ExecutorContext, StepResult};

use super::{ExecutorError, NodeExecutor};

pub struct SleepExecutor<'a> {
    pub props: &'a SleepProps,
}

#[async_trait]
impl<'a> NodeExecutor for SleepExecutor<'a> {
    async fn execute(&self, scoped_bb: &Blackboard, _ctx: &ExecutorContext<'_>) -> Result<StepResult, ExecutorError> {
        let seconds = blackboard::resolve_refs(&self.props.seconds, scoped_bb)
            .as_f64()
            .unwrap_or(0.0)
            .max(0.0);
        let next_run_at_ms = Utc::now().timestamp_millis() + (seconds * 1000.0) as i64;
        Ok(StepResult::wait(next_run_at_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::email::NullMailer;
    use crate::executors::kv::InMemoryKvStore;
    use crate::executors::http::ReqwestHttpClient;
    use serde_json::json;

    #[tokio::test]
    async fn sleep_returns_wait_with_future_deadline() {
        let props = SleepProps { seconds: json!(3600) };
        let http = ReqwestHttpClient::new();
        let kv = InMemoryKvStore::default();
        let mailer = NullMailer;
        let ctx = ExecutorContext {
            attempt: 1,
            http: &http,
            kv: &kv,
            mailer: &mailer,
        };
        let before = Utc::now().timestamp_millis();
        let result = SleepExecutor { props: &props }.execute(&blackboard::empty(), &ctx).await.unwrap();
        match result {
            StepResult::Wait { next_run_at_ms, patches } => {
                assert!(patches.is_empty());
                assert!(next_run_at_ms >= before + 3600 * 1000);
            }
            other => panic!("expected Wait, got {other:?}"),
        }
    }
}

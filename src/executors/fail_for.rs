//! The `FailFor` executor: a synthetic-failure node used to exercise the
//! scheduler's retry path in tests, driven entirely by the attempt counter
//! the worker loop hands in.

use async_trait::async_trait;

use crate::blackboard::Blackboard;
use crate::definition::FailForProps;
use crate::step::{ExecutorContext, StepResult};

use super::{ExecutorError, NodeExecutor};

pub struct FailForExecutor {
    pub props: FailForProps,
}

#[async_trait]
impl NodeExecutor for FailForExecutor {
    async fn execute(&self, _scoped_bb: &Blackboard, ctx: &ExecutorContext<'_>) -> Result<StepResult, ExecutorError> {
        if ctx.attempt <= self.props.times {
            Ok(StepResult::fail(format!(
                "synthetic failure: attempt {} of {}",
                ctx.attempt, self.props.times
            )))
        } else {
            Ok(StepResult::success())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard;
    use crate::executors::email::NullMailer;
    use crate::executors::http::ReqwestHttpClient;
    use crate::executors::kv::InMemoryKvStore;

    async fn run(times: u32, attempt: u32) -> StepResult {
        let props = FailForProps { times };
        let http = ReqwestHttpClient::new();
        let kv = InMemoryKvStore::default();
        let mailer = NullMailer;
        let ctx = ExecutorContext {
            attempt,
            http: &http,
            kv: &kv,
            mailer: &mailer,
        };
        FailForExecutor { props }.execute(&blackboard::empty(), &ctx).await.unwrap()
    }

    #[tokio::test]
    async fn fails_while_attempt_le_times_then_succeeds() {
        assert!(matches!(run(2, 1).await, StepResult::Fail { .. }));
        assert!(matches!(run(2, 2).await, StepResult::Fail { .. }));
        assert_eq!(run(2, 3).await, StepResult::success());
    }

    #[tokio::test]
    async fn zero_times_succeeds_immediately() {
        assert_eq!(run(0, 1).await, StepResult::success());
    }
}

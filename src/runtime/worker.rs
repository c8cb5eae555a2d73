//! The durable scheduler: one worker's claim → load → execute → commit →
//! idle loop, per `SPEC_FULL.md` §4.4.
//!
//! Grounded in `weavegraph`'s runner loop shape (claim unit of work, run
//! it, persist the outcome, tolerate failure without crashing the
//! process) but built around a relational lease rather than an in-memory
//! scheduler queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{error, info, instrument, warn};

use crate::blackboard;
use crate::error::InterpreterError;
use crate::executors::{self, email::Mailer, http::HttpClient};
use crate::interpreter::{self, StepMap};
use crate::persistence::{AdapterKvStore, PersistenceAdapter, PersistenceError};
use crate::step::{ExecutorContext, StepResult};
use crate::types::InstanceStatus;

use super::config::RunnerConfig;

/// One worker: an adapter, its injected leaf-node collaborators, and the
/// tuning knobs that govern lease length, retries, and idle pacing.
pub struct Worker<A: PersistenceAdapter> {
    adapter: Arc<A>,
    http: Arc<dyn HttpClient>,
    mailer: Arc<dyn Mailer>,
    config: RunnerConfig,
}

impl<A: PersistenceAdapter> Worker<A> {
    pub fn new(adapter: Arc<A>, http: Arc<dyn HttpClient>, mailer: Arc<dyn Mailer>, config: RunnerConfig) -> Self {
        Self {
            adapter,
            http,
            mailer,
            config,
        }
    }

    /// Run the claim/execute/idle loop forever. Never returns under normal
    /// operation; only a panic inside a collaborator the worker doesn't
    /// catch (none currently) would unwind past here.
    pub async fn run(&self) -> ! {
        loop {
            match self.step_once().await {
                Ok(true) => {
                    // Did useful work; look for more immediately.
                }
                Ok(false) => self.idle_sleep().await,
                Err(e) => {
                    error!(error = %e, "worker loop iteration failed; continuing");
                    tokio::time::sleep(Duration::from_millis(self.config.poll_floor_ms as u64)).await;
                }
            }
        }
    }

    /// One claim/execute/commit cycle. Returns `Ok(true)` if an instance
    /// was claimed and processed (whether or not it made progress),
    /// `Ok(false)` if nothing was runnable. Exposed publicly so tests and
    /// embedders can drive the loop a bounded number of steps instead of
    /// only via [`Worker::run`]'s infinite loop.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn step_once(&self) -> crate::error::Result<bool> {
        let Some(instance) = self
            .adapter
            .claim_next(&self.config.worker_id, self.config.lease_ms)
            .await?
        else {
            return Ok(false);
        };

        if let Err(e) = self.process_instance(instance.id).await {
            warn!(instance_id = %instance.id, error = %e, "releasing lease after processing error");
            self.adapter.release_instance_lease(instance.id).await.ok();
            return Err(e);
        }
        Ok(true)
    }

    #[instrument(skip(self), fields(worker_id = %self.config.worker_id, instance_id = %instance_id))]
    async fn process_instance(&self, instance_id: uuid::Uuid) -> crate::error::Result<()> {
        let instance = match self.adapter.get_instance(instance_id).await {
            Ok(Some(view)) => view,
            Ok(None) => return Err(PersistenceError::InstanceNotFound(instance_id).into()),
            Err(PersistenceError::DefinitionNotFound(_)) => {
                return self.fail_missing_definition(instance_id).await;
            }
            Err(e) => return Err(e.into()),
        };
        let root = &instance.definition.definition;

        let mut steps: StepMap = StepMap::default();
        for step in &instance.steps {
            steps.insert(step.node_id.clone(), step.status);
        }
        let blackboard = instance.instance.blackboard.clone();

        if interpreter::is_complete(root, &steps, &blackboard, "") {
            self.adapter
                .update_instance_status(instance_id, InstanceStatus::Completed, None)
                .await?;
            info!("instance complete");
            return Ok(());
        }

        let Some(found) = interpreter::find_next(root, &steps, &blackboard, "") else {
            self.adapter
                .update_instance_status(instance_id, InstanceStatus::Completed, None)
                .await?;
            info!("instance complete (no next leaf)");
            return Ok(());
        };
        let effective_id = found.effective_id.into_string();

        self.adapter.get_or_create_step(instance_id, &effective_id).await?;
        let attempt = self.adapter.increment_step_attempts(instance_id, &effective_id).await?;

        let already_succeeded = self
            .adapter
            .load_steps(instance_id)
            .await?
            .into_iter()
            .any(|s| s.node_id == effective_id && s.status == crate::types::StepStatus::Succeeded);
        if already_succeeded {
            self.adapter.release_instance_lease(instance_id).await?;
            return Ok(());
        }

        let kv_bridge = AdapterKvStore {
            adapter: self.adapter.as_ref(),
        };
        let ctx = ExecutorContext {
            attempt,
            http: self.http.as_ref(),
            kv: &kv_bridge,
            mailer: self.mailer.as_ref(),
        };

        let result = executors::dispatch(found.node, &found.scoped_blackboard, &ctx).await?;
        self.commit_outcome(instance_id, &effective_id, attempt, &blackboard, root, result)
            .await
    }

    /// The instance's definition row is gone out from under it: per the
    /// error-handling taxonomy, this is structural corruption, not a
    /// transient fault, so the instance fails immediately rather than being
    /// retried forever.
    async fn fail_missing_definition(&self, instance_id: uuid::Uuid) -> crate::error::Result<()> {
        let err = InterpreterError::MissingDefinition {
            instance_id: instance_id.to_string(),
        };
        warn!(instance_id = %instance_id, error = %err, "failing instance: definition missing");
        self.adapter
            .update_instance_status(instance_id, InstanceStatus::Failed, None)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, blackboard, root, result), fields(effective_id = %effective_id, attempt))]
    async fn commit_outcome(
        &self,
        instance_id: uuid::Uuid,
        effective_id: &str,
        attempt: u32,
        blackboard: &blackboard::Blackboard,
        root: &crate::definition::DefinitionNode,
        result: StepResult,
    ) -> crate::error::Result<()> {
        match result {
            StepResult::Success { patches } => {
                let updated = blackboard::apply_patches(blackboard, &patches);
                self.adapter.update_instance_blackboard(instance_id, &updated).await?;
                self.adapter.update_step_success(instance_id, effective_id, None).await?;

                let mut steps: StepMap = self
                    .adapter
                    .load_steps(instance_id)
                    .await?
                    .into_iter()
                    .map(|s| (s.node_id, s.status))
                    .collect();
                steps.insert(effective_id.to_string(), crate::types::StepStatus::Succeeded);

                if interpreter::is_complete(root, &steps, &updated, "") {
                    self.adapter
                        .update_instance_status(instance_id, InstanceStatus::Completed, None)
                        .await?;
                } else {
                    self.adapter
                        .update_instance_status(instance_id, InstanceStatus::Runnable, Some(Utc::now()))
                        .await?;
                }
                Ok(())
            }
            StepResult::Wait { next_run_at_ms, patches } => {
                let updated = blackboard::apply_patches(blackboard, &patches);
                self.adapter.update_instance_blackboard(instance_id, &updated).await?;
                self.adapter.update_step_success(instance_id, effective_id, None).await?;
                let next_run_at = chrono::DateTime::from_timestamp_millis(next_run_at_ms).unwrap_or_else(Utc::now);
                self.adapter
                    .update_instance_status(instance_id, InstanceStatus::Runnable, Some(next_run_at))
                    .await?;
                Ok(())
            }
            StepResult::Fail { error, retry_at_ms } => {
                if attempt < self.config.max_attempts {
                    self.adapter.record_step_retry(instance_id, effective_id, &error).await?;
                    let backoff_ms = self.config.backoff_base_ms * (1i64 << (attempt.saturating_sub(1)));
                    let backoff_at = Utc::now() + chrono::Duration::milliseconds(backoff_ms);
                    let retry_at = retry_at_ms.and_then(chrono::DateTime::from_timestamp_millis);
                    let next_run_at = retry_at.map(|t| t.max(backoff_at)).unwrap_or(backoff_at);
                    self.adapter
                        .update_instance_status(instance_id, InstanceStatus::Runnable, Some(next_run_at))
                        .await?;
                } else {
                    self.adapter.update_step_failed(instance_id, effective_id, &error).await?;
                    self.adapter
                        .update_instance_status(instance_id, InstanceStatus::Failed, None)
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Sleep until the earliest runnable instance is due, clamped to
    /// `[poll_floor_ms, poll_ceiling_ms]` plus jitter, or `idle_sleep_ms`
    /// when nothing is runnable at all.
    async fn idle_sleep(&self) {
        let base_ms = match self.adapter.get_next_run_time().await {
            Ok(Some(next)) => {
                let delta = (next - Utc::now()).num_milliseconds();
                delta.clamp(self.config.poll_floor_ms, self.config.poll_ceiling_ms)
            }
            Ok(None) => self.config.idle_sleep_ms,
            Err(e) => {
                warn!(error = %e, "failed to read next run time; falling back to idle sleep");
                self.config.idle_sleep_ms
            }
        };
        let jitter_ms = if self.config.jitter_max_ms > 0 {
            rand::rng().random_range(0..=self.config.jitter_max_ms)
        } else {
            0
        };
        tokio::time::sleep(Duration::from_millis((base_ms + jitter_ms).max(0) as u64)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DefinitionNode, FailForProps, NodeProps, SendEmailProps, SleepProps};
    use crate::executors::email::NullMailer;
    use crate::executors::http::ReqwestHttpClient;
    use crate::persistence::memory::InMemoryAdapter;
    use serde_json::json;

    fn test_worker(adapter: Arc<InMemoryAdapter>) -> Worker<InMemoryAdapter> {
        Worker::new(
            adapter,
            Arc::new(ReqwestHttpClient::new()),
            Arc::new(NullMailer),
            RunnerConfig::default().with_worker_id("test-worker"),
        )
    }

    #[tokio::test]
    async fn drives_a_simple_sequence_to_completion() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let tree = DefinitionNode::sequence(
            "root",
            vec![
                DefinitionNode::leaf("sleep", NodeProps::Sleep(SleepProps { seconds: json!(0) })),
                DefinitionNode::leaf(
                    "mail",
                    NodeProps::SendEmail(SendEmailProps {
                        to: json!("u@x"),
                        subject: json!("hi"),
                        body: json!("body"),
                    }),
                ),
            ],
        );
        let def = adapter.upsert_definition("wf", &tree).await.unwrap();
        let instance = adapter.create_instance(def.id, None).await.unwrap();

        let worker = test_worker(adapter.clone());
        for _ in 0..2 {
            assert!(worker.step_once().await.unwrap());
        }

        let view = adapter.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(view.instance.status, InstanceStatus::Completed);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let tree = DefinitionNode::leaf(
            "ff",
            NodeProps::FailFor(FailForProps { times: 2 }),
        );
        let def = adapter.upsert_definition("wf", &tree).await.unwrap();
        let instance = adapter.create_instance(def.id, None).await.unwrap();

        let worker = test_worker(adapter.clone());
        // Two failing attempts never advance next_run_at to the past in this
        // fake clock-less test, but claim_next only requires next_run_at <= now,
        // and the backoff pushes it into the future — so drive via process_instance
        // directly to bypass the claim/backoff race in a zero-delay test.
        worker.process_instance(instance.id).await.unwrap();
        let view = adapter.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(view.instance.status, InstanceStatus::Runnable);
        assert_eq!(view.steps[0].attempts, 1);
        assert_eq!(view.steps[0].status, crate::types::StepStatus::Pending);

        adapter
            .update_instance_status(instance.id, InstanceStatus::Runnable, Some(Utc::now()))
            .await
            .unwrap();
        worker.process_instance(instance.id).await.unwrap();
        adapter
            .update_instance_status(instance.id, InstanceStatus::Runnable, Some(Utc::now()))
            .await
            .unwrap();
        worker.process_instance(instance.id).await.unwrap();

        let view = adapter.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(view.instance.status, InstanceStatus::Completed);
        assert_eq!(view.steps[0].attempts, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_instance() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let tree = DefinitionNode::leaf("ff", NodeProps::FailFor(FailForProps { times: 10 }));
        let def = adapter.upsert_definition("wf", &tree).await.unwrap();
        let instance = adapter.create_instance(def.id, None).await.unwrap();

        let worker = test_worker(adapter.clone());
        for attempt in 1..=RunnerConfig::MAX_ATTEMPTS {
            worker.process_instance(instance.id).await.unwrap();
            if attempt < RunnerConfig::MAX_ATTEMPTS {
                adapter
                    .update_instance_status(instance.id, InstanceStatus::Runnable, Some(Utc::now()))
                    .await
                    .unwrap();
            }
        }

        let view = adapter.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(view.instance.status, InstanceStatus::Failed);
        assert_eq!(view.steps[0].status, crate::types::StepStatus::Failed);
    }
}

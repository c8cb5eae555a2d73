//! Process-local [`PersistenceAdapter`], grounded directly in
//! `weavegraph`'s `InMemoryCheckpointer`: a single `RwLock`-guarded map,
//! no serialization, used by deterministic scheduler/property tests and as
//! a reference implementation of the trait's atomicity contracts.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::blackboard::{self, Blackboard};
use crate::definition::DefinitionNode;
use crate::types::{InstanceStatus, StepStatus};

use super::{
    DefinitionRecord, InstanceRecord, InstanceView, PersistenceAdapter, PersistenceError, Result, StepRecord,
};

#[derive(Default)]
struct Inner {
    definitions: FxHashMap<Uuid, DefinitionRecord>,
    definitions_by_name: FxHashMap<String, Uuid>,
    instances: FxHashMap<Uuid, InstanceRecord>,
    steps: FxHashMap<(Uuid, String), StepRecord>,
    kv: FxHashMap<(String, String), Value>,
}

/// An in-memory, non-durable [`PersistenceAdapter`]. Every operation is
/// guarded by a single `RwLock`, so "atomic" here means "holds the lock
/// for the duration of the operation" rather than true multi-statement
/// transaction isolation — sufficient for the single-process tests that
/// use it.
#[derive(Default)]
pub struct InMemoryAdapter {
    inner: RwLock<Inner>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_backend(message: impl std::fmt::Display) -> PersistenceError {
        PersistenceError::Backend {
            message: format!("lock poisoned: {message}"),
        }
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryAdapter {
    async fn claim_next(&self, worker_id: &str, lease_ms: i64) -> Result<Option<InstanceRecord>> {
        let mut guard = self.inner.write().map_err(Self::lock_backend)?;
        let now = Utc::now();
        let candidate_id = guard
            .instances
            .values()
            .filter(|i| {
                i.status == InstanceStatus::Runnable
                    && i.next_run_at <= now
                    && i.lease_until.map(|until| until < now).unwrap_or(true)
            })
            .min_by_key(|i| i.next_run_at)
            .map(|i| i.id);

        let Some(id) = candidate_id else {
            return Ok(None);
        };
        let record = guard.instances.get_mut(&id).expect("id just looked up");
        record.lease_owner = Some(worker_id.to_string());
        record.lease_until = Some(now + chrono::Duration::milliseconds(lease_ms));
        Ok(Some(record.clone()))
    }

    async fn get_definition(&self, definition_id: Uuid) -> Result<DefinitionRecord> {
        let guard = self.inner.read().map_err(Self::lock_backend)?;
        guard
            .definitions
            .get(&definition_id)
            .cloned()
            .ok_or(PersistenceError::DefinitionNotFound(definition_id))
    }

    async fn load_steps(&self, instance_id: Uuid) -> Result<Vec<StepRecord>> {
        let guard = self.inner.read().map_err(Self::lock_backend)?;
        let mut steps: Vec<StepRecord> = guard
            .steps
            .values()
            .filter(|s| s.instance_id == instance_id)
            .cloned()
            .collect();
        steps.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(steps)
    }

    async fn get_or_create_step(&self, instance_id: Uuid, effective_id: &str) -> Result<StepRecord> {
        let mut guard = self.inner.write().map_err(Self::lock_backend)?;
        let key = (instance_id, effective_id.to_string());
        let step = guard.steps.entry(key).or_insert_with(|| StepRecord {
            instance_id,
            node_id: effective_id.to_string(),
            status: StepStatus::Pending,
            attempts: 0,
            last_error: None,
            output: None,
        });
        Ok(step.clone())
    }

    async fn increment_step_attempts(&self, instance_id: Uuid, effective_id: &str) -> Result<u32> {
        let mut guard = self.inner.write().map_err(Self::lock_backend)?;
        let key = (instance_id, effective_id.to_string());
        let step = guard.steps.entry(key).or_insert_with(|| StepRecord {
            instance_id,
            node_id: effective_id.to_string(),
            status: StepStatus::Pending,
            attempts: 0,
            last_error: None,
            output: None,
        });
        step.attempts += 1;
        Ok(step.attempts)
    }

    async fn update_step_success(&self, instance_id: Uuid, effective_id: &str, output: Option<Value>) -> Result<()> {
        let mut guard = self.inner.write().map_err(Self::lock_backend)?;
        let key = (instance_id, effective_id.to_string());
        let step = guard
            .steps
            .get_mut(&key)
            .ok_or_else(|| PersistenceError::Backend {
                message: format!("no step row for {effective_id}"),
            })?;
        step.status = StepStatus::Succeeded;
        step.output = output;
        step.last_error = None;
        Ok(())
    }

    async fn record_step_retry(&self, instance_id: Uuid, effective_id: &str, error: &str) -> Result<()> {
        let mut guard = self.inner.write().map_err(Self::lock_backend)?;
        let key = (instance_id, effective_id.to_string());
        let step = guard
            .steps
            .get_mut(&key)
            .ok_or_else(|| PersistenceError::Backend {
                message: format!("no step row for {effective_id}"),
            })?;
        step.last_error = Some(error.to_string());
        Ok(())
    }

    async fn update_step_failed(&self, instance_id: Uuid, effective_id: &str, error: &str) -> Result<()> {
        let mut guard = self.inner.write().map_err(Self::lock_backend)?;
        let key = (instance_id, effective_id.to_string());
        let step = guard
            .steps
            .get_mut(&key)
            .ok_or_else(|| PersistenceError::Backend {
                message: format!("no step row for {effective_id}"),
            })?;
        step.status = StepStatus::Failed;
        step.last_error = Some(error.to_string());
        Ok(())
    }

    async fn update_instance_blackboard(&self, instance_id: Uuid, blackboard: &Blackboard) -> Result<()> {
        let mut guard = self.inner.write().map_err(Self::lock_backend)?;
        let instance = guard
            .instances
            .get_mut(&instance_id)
            .ok_or(PersistenceError::InstanceNotFound(instance_id))?;
        instance.blackboard = blackboard.clone();
        Ok(())
    }

    async fn update_instance_status(
        &self,
        instance_id: Uuid,
        status: InstanceStatus,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut guard = self.inner.write().map_err(Self::lock_backend)?;
        let instance = guard
            .instances
            .get_mut(&instance_id)
            .ok_or(PersistenceError::InstanceNotFound(instance_id))?;
        instance.status = status;
        if let Some(next_run_at) = next_run_at {
            instance.next_run_at = next_run_at;
        }
        instance.lease_owner = None;
        instance.lease_until = None;
        Ok(())
    }

    async fn release_instance_lease(&self, instance_id: Uuid) -> Result<()> {
        let mut guard = self.inner.write().map_err(Self::lock_backend)?;
        let instance = guard
            .instances
            .get_mut(&instance_id)
            .ok_or(PersistenceError::InstanceNotFound(instance_id))?;
        instance.lease_owner = None;
        instance.lease_until = None;
        Ok(())
    }

    async fn get_next_run_time(&self) -> Result<Option<DateTime<Utc>>> {
        let guard = self.inner.read().map_err(Self::lock_backend)?;
        Ok(guard
            .instances
            .values()
            .filter(|i| i.status == InstanceStatus::Runnable)
            .map(|i| i.next_run_at)
            .min())
    }

    async fn kv_get(&self, store: &str, key: &str) -> Result<Option<Value>> {
        let guard = self.inner.read().map_err(Self::lock_backend)?;
        Ok(guard.kv.get(&(store.to_string(), key.to_string())).cloned())
    }

    async fn kv_set(&self, store: &str, key: &str, value: Value) -> Result<()> {
        let mut guard = self.inner.write().map_err(Self::lock_backend)?;
        guard.kv.insert((store.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn upsert_definition(&self, name: &str, definition: &DefinitionNode) -> Result<DefinitionRecord> {
        let mut guard = self.inner.write().map_err(Self::lock_backend)?;
        let now = Utc::now();
        if let Some(&id) = guard.definitions_by_name.get(name) {
            let record = guard.definitions.get_mut(&id).expect("indexed by name");
            record.definition = definition.clone();
            record.updated_at = now;
            return Ok(record.clone());
        }
        let id = Uuid::new_v4();
        let record = DefinitionRecord {
            id,
            name: name.to_string(),
            definition: definition.clone(),
            created_at: now,
            updated_at: now,
        };
        guard.definitions.insert(id, record.clone());
        guard.definitions_by_name.insert(name.to_string(), id);
        Ok(record)
    }

    async fn create_instance(&self, definition_id: Uuid, initial_blackboard: Option<Blackboard>) -> Result<InstanceRecord> {
        let mut guard = self.inner.write().map_err(Self::lock_backend)?;
        if !guard.definitions.contains_key(&definition_id) {
            return Err(PersistenceError::DefinitionNotFound(definition_id));
        }
        let record = InstanceRecord {
            id: Uuid::new_v4(),
            definition_id,
            status: InstanceStatus::Runnable,
            blackboard: initial_blackboard.unwrap_or_else(blackboard::empty),
            next_run_at: Utc::now(),
            lease_owner: None,
            lease_until: None,
        };
        guard.instances.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_instance(&self, instance_id: Uuid) -> Result<Option<InstanceView>> {
        let guard = self.inner.read().map_err(Self::lock_backend)?;
        let Some(instance) = guard.instances.get(&instance_id).cloned() else {
            return Ok(None);
        };
        let definition = guard
            .definitions
            .get(&instance.definition_id)
            .cloned()
            .ok_or(PersistenceError::DefinitionNotFound(instance.definition_id))?;
        let mut steps: Vec<StepRecord> = guard
            .steps
            .values()
            .filter(|s| s.instance_id == instance_id)
            .cloned()
            .collect();
        steps.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(Some(InstanceView {
            instance,
            definition,
            steps,
        }))
    }

    async fn list_instances(&self) -> Result<Vec<InstanceRecord>> {
        let guard = self.inner.read().map_err(Self::lock_backend)?;
        let mut instances: Vec<InstanceRecord> = guard.instances.values().cloned().collect();
        instances.sort_by_key(|i| i.id);
        Ok(instances)
    }

    async fn delete_instance(&self, instance_id: Uuid) -> Result<()> {
        let mut guard = self.inner.write().map_err(Self::lock_backend)?;
        guard
            .instances
            .remove(&instance_id)
            .ok_or(PersistenceError::InstanceNotFound(instance_id))?;
        guard.steps.retain(|k, _| k.0 != instance_id);
        Ok(())
    }

    async fn reset_instance(&self, instance_id: Uuid) -> Result<()> {
        let mut guard = self.inner.write().map_err(Self::lock_backend)?;
        {
            let instance = guard
                .instances
                .get_mut(&instance_id)
                .ok_or(PersistenceError::InstanceNotFound(instance_id))?;
            instance.status = InstanceStatus::Runnable;
            instance.next_run_at = Utc::now();
            instance.lease_owner = None;
            instance.lease_until = None;
        }
        for (key, step) in guard.steps.iter_mut() {
            if key.0 == instance_id {
                step.status = StepStatus::Pending;
                step.attempts = 0;
                step.last_error = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DefinitionNode, NodeProps, SleepProps};
    use serde_json::json;

    fn sample_definition() -> DefinitionNode {
        DefinitionNode::leaf("s", NodeProps::Sleep(SleepProps { seconds: json!(1) }))
    }

    #[tokio::test]
    async fn claim_next_skips_leased_and_not_yet_due_instances() {
        let adapter = InMemoryAdapter::new();
        let def = adapter.upsert_definition("wf", &sample_definition()).await.unwrap();
        let instance = adapter.create_instance(def.id, None).await.unwrap();

        let claimed = adapter.claim_next("worker-a", 30_000).await.unwrap().unwrap();
        assert_eq!(claimed.id, instance.id);
        assert_eq!(claimed.lease_owner.as_deref(), Some("worker-a"));

        // Still leased: a second worker must not claim it.
        assert!(adapter.claim_next("worker-b", 30_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reset_instance_clears_steps_and_lease() {
        let adapter = InMemoryAdapter::new();
        let def = adapter.upsert_definition("wf", &sample_definition()).await.unwrap();
        let instance = adapter.create_instance(def.id, None).await.unwrap();
        adapter.get_or_create_step(instance.id, "s").await.unwrap();
        adapter.increment_step_attempts(instance.id, "s").await.unwrap();
        adapter.update_step_failed(instance.id, "s", "boom").await.unwrap();
        adapter
            .update_instance_status(instance.id, InstanceStatus::Failed, None)
            .await
            .unwrap();

        adapter.reset_instance(instance.id).await.unwrap();

        let view = adapter.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(view.instance.status, InstanceStatus::Runnable);
        assert_eq!(view.steps.len(), 1);
        assert_eq!(view.steps[0].status, StepStatus::Pending);
        assert_eq!(view.steps[0].attempts, 0);
        assert!(view.steps[0].last_error.is_none());
    }

    #[tokio::test]
    async fn kv_round_trips() {
        let adapter = InMemoryAdapter::new();
        assert_eq!(adapter.kv_get("s", "k").await.unwrap(), None);
        adapter.kv_set("s", "k", json!(42)).await.unwrap();
        assert_eq!(adapter.kv_get("s", "k").await.unwrap(), Some(json!(42)));
    }
}

//! `KVGet`/`KVSet` executors and the injectable KV collaborator they share
//! with the persistence adapter's `workflow_kv` table.

use std::sync::RwLock;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::blackboard::{self, Blackboard, Patch};
use crate::definition::{KVGetProps, KVSetProps};
use crate::step::{ExecutorContext, StepResult};

use super::{value_to_string, ExecutorError, NodeExecutor};

/// The KV collaborator `KVGet`/`KVSet` call through. In production this is
/// backed by the same store as `workflow_kv` (see
/// `crate::persistence::PersistenceAdapter::kv_get`/`kv_set`); tests can
/// substitute [`InMemoryKvStore`] directly.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, store: &str, key: &str) -> Result<Option<Value>, String>;
    async fn set(&self, store: &str, key: &str, value: Value) -> Result<(), String>;
}

/// Process-local KV store, last-writer-wins per `(store, key)` — used by
/// unit tests and by [`crate::persistence::memory::InMemoryAdapter`].
#[derive(Default)]
pub struct InMemoryKvStore {
    inner: RwLock<FxHashMap<(String, String), Value>>,
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, store: &str, key: &str) -> Result<Option<Value>, String> {
        let map = self.inner.read().map_err(|e| e.to_string())?;
        Ok(map.get(&(store.to_string(), key.to_string())).cloned())
    }

    async fn set(&self, store: &str, key: &str, value: Value) -> Result<(), String> {
        let mut map = self.inner.write().map_err(|e| e.to_string())?;
        map.insert((store.to_string(), key.to_string()), value);
        Ok(())
    }
}

pub struct KvGetExecutor<'a> {
    pub props: &'a KVGetProps,
}

#[async_trait]
impl<'a> NodeExecutor for KvGetExecutor<'a> {
    async fn execute(&self, scoped_bb: &Blackboard, ctx: &ExecutorContext<'_>) -> Result<StepResult, ExecutorError> {
        let store = value_to_string(&blackboard::resolve_refs(&self.props.store, scoped_bb));
        let key = value_to_string(&blackboard::resolve_refs(&self.props.key, scoped_bb));
        match ctx.kv.get(&store, &key).await {
            Ok(value) => Ok(StepResult::success_with(vec![Patch::set(
                self.props.assign_to.clone(),
                value.unwrap_or(Value::Null),
            )])),
            Err(e) => Ok(StepResult::fail(e)),
        }
    }
}

pub struct KvSetExecutor<'a> {
    pub props: &'a KVSetProps,
}

#[async_trait]
impl<'a> NodeExecutor for KvSetExecutor<'a> {
    async fn execute(&self, scoped_bb: &Blackboard, ctx: &ExecutorContext<'_>) -> Result<StepResult, ExecutorError> {
        let store = value_to_string(&blackboard::resolve_refs(&self.props.store, scoped_bb));
        let key = value_to_string(&blackboard::resolve_refs(&self.props.key, scoped_bb));
        let value = blackboard::resolve_refs(&self.props.value, scoped_bb);
        match ctx.kv.set(&store, &key, value).await {
            Ok(()) => Ok(StepResult::success()),
            Err(e) => Ok(StepResult::fail(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::email::NullMailer;
    use crate::executors::http::ReqwestHttpClient;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let kv = InMemoryKvStore::default();
        let http = ReqwestHttpClient::new();
        let mailer = NullMailer;
        let ctx = ExecutorContext {
            attempt: 1,
            http: &http,
            kv: &kv,
            mailer: &mailer,
        };
        let set_props = KVSetProps {
            store: json!("s"),
            key: json!("k"),
            value: json!(42),
        };
        KvSetExecutor { props: &set_props }
            .execute(&blackboard::empty(), &ctx)
            .await
            .unwrap();

        let get_props = KVGetProps {
            store: json!("s"),
            key: json!("k"),
            assign_to: "$.v".to_string(),
        };
        let result = KvGetExecutor { props: &get_props }
            .execute(&blackboard::empty(), &ctx)
            .await
            .unwrap();
        match result {
            StepResult::Success { patches } => {
                assert_eq!(patches, vec![Patch::set("$.v", json!(42))]);
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_of_absent_key_assigns_null() {
        let kv = InMemoryKvStore::default();
        let http = ReqwestHttpClient::new();
        let mailer = NullMailer;
        let ctx = ExecutorContext {
            attempt: 1,
            http: &http,
            kv: &kv,
            mailer: &mailer,
        };
        let get_props = KVGetProps {
            store: json!("s"),
            key: json!("missing"),
            assign_to: "$.v".to_string(),
        };
        let result = KvGetExecutor { props: &get_props }
            .execute(&blackboard::empty(), &ctx)
            .await
            .unwrap();
        match result {
            StepResult::Success { patches } => {
                assert_eq!(patches, vec![Patch::set("$.v", Value::Null)]);
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }
}

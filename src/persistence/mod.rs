//! The persistence boundary: the relational records the scheduler depends
//! on, the atomic operations it needs, and two implementations — a
//! `sqlx`/Postgres adapter for production and an in-memory fake for tests.
//!
//! Grounded in `weavegraph`'s `Checkpointer` trait: one trait surface, one
//! durable backend, one in-memory fake implementing the exact same
//! contract so tests exercise real trait behavior rather than a mock.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryAdapter;
pub use postgres::PostgresAdapter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::blackboard::Blackboard;
use crate::definition::DefinitionNode;
use crate::types::{InstanceStatus, StepStatus};

/// Errors raised by a [`PersistenceAdapter`] operation.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("definition `{0}` not found")]
    #[diagnostic(code(flowloom::persistence::definition_not_found))]
    DefinitionNotFound(Uuid),

    #[error("instance `{0}` not found")]
    #[diagnostic(code(flowloom::persistence::instance_not_found))]
    InstanceNotFound(Uuid),

    #[error("backend error: {message}")]
    #[diagnostic(
        code(flowloom::persistence::backend),
        help("Check connectivity to the relational store; backend message: {message}.")
    )]
    Backend { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(code(flowloom::persistence::serde))]
    Serde { message: String },
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// A registered workflow definition, as read back from
/// `workflow_definitions`. See `SPEC_FULL.md` §3.1.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionRecord {
    pub id: Uuid,
    pub name: String,
    pub definition: DefinitionNode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A workflow instance row.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    pub id: Uuid,
    pub definition_id: Uuid,
    pub status: InstanceStatus,
    pub blackboard: Blackboard,
    pub next_run_at: DateTime<Utc>,
    pub lease_owner: Option<String>,
    pub lease_until: Option<DateTime<Utc>>,
}

/// A step row, keyed by `(instance_id, effective_node_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub instance_id: Uuid,
    pub node_id: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub output: Option<Value>,
}

/// The joined view the Control API's "read instance" operation returns:
/// the instance row, its definition, and every step row recorded so far.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceView {
    pub instance: InstanceRecord,
    pub definition: DefinitionRecord,
    pub steps: Vec<StepRecord>,
}

/// The atomic operations the durable scheduler and the Control API depend
/// on. Every method is a single transaction against the backing store;
/// implementations must uphold the invariants in `spec.md` §3 (claim
/// exclusivity, atomic lease set, monotonic attempts).
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Atomically claim one runnable, unleased (or lease-expired) instance,
    /// ordered by `next_run_at`, and stamp `lease_owner`/`lease_until`.
    async fn claim_next(&self, worker_id: &str, lease_ms: i64) -> Result<Option<InstanceRecord>>;

    /// Fetch a definition by id (needed after `claim_next` to load the
    /// tree the scheduler traverses).
    async fn get_definition(&self, definition_id: Uuid) -> Result<DefinitionRecord>;

    /// Fetch every step row recorded so far for an instance.
    async fn load_steps(&self, instance_id: Uuid) -> Result<Vec<StepRecord>>;

    /// Ensure a step row exists for `(instance_id, effective_id)`,
    /// creating it `pending` with zero attempts if absent.
    async fn get_or_create_step(&self, instance_id: Uuid, effective_id: &str) -> Result<StepRecord>;

    /// Atomically increment the step's attempt counter and return the new
    /// value.
    async fn increment_step_attempts(&self, instance_id: Uuid, effective_id: &str) -> Result<u32>;

    async fn update_step_success(&self, instance_id: Uuid, effective_id: &str, output: Option<Value>) -> Result<()>;

    /// Record a transient failure on an attempt that has not yet exhausted
    /// retries: the step stays `pending`, only `last_error` is updated.
    async fn record_step_retry(&self, instance_id: Uuid, effective_id: &str, error: &str) -> Result<()>;

    /// Exhausted retries: the step moves to `failed` for good.
    async fn update_step_failed(&self, instance_id: Uuid, effective_id: &str, error: &str) -> Result<()>;

    async fn update_instance_blackboard(&self, instance_id: Uuid, blackboard: &Blackboard) -> Result<()>;

    /// Set the instance's status (and clear lease fields). `next_run_at`
    /// must be `Some` unless `status` is terminal (`completed`/`failed`) —
    /// see the Open Question resolution in `DESIGN.md`.
    async fn update_instance_status(
        &self,
        instance_id: Uuid,
        status: InstanceStatus,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn release_instance_lease(&self, instance_id: Uuid) -> Result<()>;

    /// The earliest `next_run_at` among runnable instances, for idle pacing.
    async fn get_next_run_time(&self) -> Result<Option<DateTime<Utc>>>;

    async fn kv_get(&self, store: &str, key: &str) -> Result<Option<Value>>;

    async fn kv_set(&self, store: &str, key: &str, value: Value) -> Result<()>;

    // --- Control API persistence-side operations (spec.md §6) ---

    /// Upsert a definition by name: re-registering under the same name
    /// replaces the stored tree (the definition row itself is otherwise
    /// immutable).
    async fn upsert_definition(&self, name: &str, definition: &DefinitionNode) -> Result<DefinitionRecord>;

    async fn create_instance(&self, definition_id: Uuid, initial_blackboard: Option<Blackboard>) -> Result<InstanceRecord>;

    async fn get_instance(&self, instance_id: Uuid) -> Result<Option<InstanceView>>;

    async fn list_instances(&self) -> Result<Vec<InstanceRecord>>;

    async fn delete_instance(&self, instance_id: Uuid) -> Result<()>;

    /// Re-open an instance: `status` → `runnable`, `next_run_at` → now,
    /// lease cleared, every step reset to `pending` with `attempts = 0`
    /// and `last_error` cleared.
    async fn reset_instance(&self, instance_id: Uuid) -> Result<()>;
}

/// Adapts any [`PersistenceAdapter`] to the executor layer's
/// [`crate::executors::kv::KvStore`] collaborator, so `KVGet`/`KVSet`
/// read and write the very same `workflow_kv` table the adapter backs
/// rather than a separate, divergent store.
pub struct AdapterKvStore<'a, A: PersistenceAdapter + ?Sized> {
    pub adapter: &'a A,
}

#[async_trait]
impl<'a, A: PersistenceAdapter + ?Sized> crate::executors::kv::KvStore for AdapterKvStore<'a, A> {
    async fn get(&self, store: &str, key: &str) -> std::result::Result<Option<Value>, String> {
        self.adapter.kv_get(store, key).await.map_err(|e| e.to_string())
    }

    async fn set(&self, store: &str, key: &str, value: Value) -> std::result::Result<(), String> {
        self.adapter.kv_set(store, key, value).await.map_err(|e| e.to_string())
    }
}

//! `sqlx`/`PgPool`-backed [`PersistenceAdapter`], matching the normative
//! schema in `spec.md` §6. Grounded in `weavegraph`'s
//! `PostgresCheckpointer`: embedded migrations gated behind the
//! `postgres-migrations` feature, `ON CONFLICT` upserts, explicit
//! transactions for multi-statement operations, errors mapped through one
//! `map_err` closure per query.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::blackboard::Blackboard;
use crate::definition::DefinitionNode;
use crate::types::{InstanceStatus, StepStatus};

use super::{
    DefinitionRecord, InstanceRecord, InstanceView, PersistenceAdapter, PersistenceError, Result, StepRecord,
};

fn backend(context: &str, e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Backend {
        message: format!("{context}: {e}"),
    }
}

fn serde_err(context: &str, e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Serde {
        message: format!("{context}: {e}"),
    }
}

fn definition_from_row(row: &PgRow) -> Result<DefinitionRecord> {
    let definition_json: Value = row.try_get("definition_json").map_err(|e| backend("read definition_json", e))?;
    let definition: DefinitionNode =
        serde_json::from_value(definition_json).map_err(|e| serde_err("decode definition", e))?;
    Ok(DefinitionRecord {
        id: row.try_get("id").map_err(|e| backend("read id", e))?,
        name: row.try_get("name").map_err(|e| backend("read name", e))?,
        definition,
        created_at: row.try_get("created_at").map_err(|e| backend("read created_at", e))?,
        updated_at: row.try_get("updated_at").map_err(|e| backend("read updated_at", e))?,
    })
}

fn instance_from_row(row: &PgRow) -> Result<InstanceRecord> {
    let status_text: String = row.try_get("status").map_err(|e| backend("read status", e))?;
    let status = InstanceStatus::parse(&status_text).ok_or_else(|| PersistenceError::Backend {
        message: format!("unrecognized instance status `{status_text}`"),
    })?;
    Ok(InstanceRecord {
        id: row.try_get("id").map_err(|e| backend("read id", e))?,
        definition_id: row.try_get("definition_id").map_err(|e| backend("read definition_id", e))?,
        status,
        blackboard: row.try_get("blackboard").map_err(|e| backend("read blackboard", e))?,
        next_run_at: row.try_get("next_run_at").map_err(|e| backend("read next_run_at", e))?,
        lease_owner: row.try_get("lease_owner").map_err(|e| backend("read lease_owner", e))?,
        lease_until: row.try_get("lease_until").map_err(|e| backend("read lease_until", e))?,
    })
}

fn step_from_row(row: &PgRow) -> Result<StepRecord> {
    let status_text: String = row.try_get("status").map_err(|e| backend("read status", e))?;
    let status = StepStatus::parse(&status_text).ok_or_else(|| PersistenceError::Backend {
        message: format!("unrecognized step status `{status_text}`"),
    })?;
    let attempts: i32 = row.try_get("attempts").map_err(|e| backend("read attempts", e))?;
    Ok(StepRecord {
        instance_id: row.try_get("instance_id").map_err(|e| backend("read instance_id", e))?,
        node_id: row.try_get("node_id").map_err(|e| backend("read node_id", e))?,
        status,
        attempts: attempts.max(0) as u32,
        last_error: row.try_get("last_error").map_err(|e| backend("read last_error", e))?,
        output: row.try_get("output").map_err(|e| backend("read output", e))?,
    })
}

/// Postgres-backed durable store, sized for the four tables in
/// `spec.md` §6.
pub struct PostgresAdapter {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresAdapter").finish()
    }
}

impl PostgresAdapter {
    /// Connect to `database_url` and, when the `postgres-migrations`
    /// feature is enabled, apply the embedded migrations in `./migrations`
    /// (idempotent — safe to call on every process start).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await.map_err(|e| backend("connect", e))?;
        #[cfg(feature = "postgres-migrations")]
        {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| backend("migrate", e))?;
        }
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PersistenceAdapter for PostgresAdapter {
    #[instrument(skip(self), err)]
    async fn claim_next(&self, worker_id: &str, lease_ms: i64) -> Result<Option<InstanceRecord>> {
        let row = sqlx::query(
            r#"
            UPDATE workflow_instances
            SET lease_owner = $1,
                lease_until = now() + ($2::bigint * interval '1 millisecond'),
                updated_at = now()
            WHERE id = (
                SELECT id FROM workflow_instances
                WHERE status = 'runnable'
                  AND next_run_at <= now()
                  AND (lease_until IS NULL OR lease_until < now())
                ORDER BY next_run_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, definition_id, status, blackboard, next_run_at, lease_owner, lease_until
            "#,
        )
        .bind(worker_id)
        .bind(lease_ms)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("claim_next", e))?;

        row.as_ref().map(instance_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn get_definition(&self, definition_id: Uuid) -> Result<DefinitionRecord> {
        let row = sqlx::query("SELECT id, name, definition_json, created_at, updated_at FROM workflow_definitions WHERE id = $1")
            .bind(definition_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("get_definition", e))?;
        match row {
            Some(row) => definition_from_row(&row),
            None => Err(PersistenceError::DefinitionNotFound(definition_id)),
        }
    }

    #[instrument(skip(self), err)]
    async fn load_steps(&self, instance_id: Uuid) -> Result<Vec<StepRecord>> {
        let rows = sqlx::query(
            "SELECT instance_id, node_id, status, attempts, last_error, output FROM workflow_steps WHERE instance_id = $1 ORDER BY node_id",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend("load_steps", e))?;
        rows.iter().map(step_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn get_or_create_step(&self, instance_id: Uuid, effective_id: &str) -> Result<StepRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_steps (instance_id, node_id, status, attempts)
            VALUES ($1, $2, 'pending', 0)
            ON CONFLICT (instance_id, node_id) DO UPDATE SET updated_at = now()
            RETURNING instance_id, node_id, status, attempts, last_error, output
            "#,
        )
        .bind(instance_id)
        .bind(effective_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| backend("get_or_create_step", e))?;
        step_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn increment_step_attempts(&self, instance_id: Uuid, effective_id: &str) -> Result<u32> {
        let row = sqlx::query(
            "UPDATE workflow_steps SET attempts = attempts + 1, updated_at = now() WHERE instance_id = $1 AND node_id = $2 RETURNING attempts",
        )
        .bind(instance_id)
        .bind(effective_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| backend("increment_step_attempts", e))?;
        let attempts: i32 = row.try_get("attempts").map_err(|e| backend("read attempts", e))?;
        Ok(attempts.max(0) as u32)
    }

    #[instrument(skip(self, output), err)]
    async fn update_step_success(&self, instance_id: Uuid, effective_id: &str, output: Option<Value>) -> Result<()> {
        sqlx::query(
            "UPDATE workflow_steps SET status = 'succeeded', output = $3, last_error = NULL, updated_at = now() WHERE instance_id = $1 AND node_id = $2",
        )
        .bind(instance_id)
        .bind(effective_id)
        .bind(output)
        .execute(&self.pool)
        .await
        .map_err(|e| backend("update_step_success", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn record_step_retry(&self, instance_id: Uuid, effective_id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE workflow_steps SET last_error = $3, updated_at = now() WHERE instance_id = $1 AND node_id = $2")
            .bind(instance_id)
            .bind(effective_id)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(|e| backend("record_step_retry", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn update_step_failed(&self, instance_id: Uuid, effective_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE workflow_steps SET status = 'failed', last_error = $3, updated_at = now() WHERE instance_id = $1 AND node_id = $2",
        )
        .bind(instance_id)
        .bind(effective_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| backend("update_step_failed", e))?;
        Ok(())
    }

    #[instrument(skip(self, blackboard), err)]
    async fn update_instance_blackboard(&self, instance_id: Uuid, blackboard: &Blackboard) -> Result<()> {
        sqlx::query("UPDATE workflow_instances SET blackboard = $2, updated_at = now() WHERE id = $1")
            .bind(instance_id)
            .bind(blackboard)
            .execute(&self.pool)
            .await
            .map_err(|e| backend("update_instance_blackboard", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn update_instance_status(
        &self,
        instance_id: Uuid,
        status: InstanceStatus,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        // `next_run_at` is only written when provided; terminal statuses
        // omit it and the column keeps its last value, never NULL — a
        // resumable instance must always carry a real schedule (see
        // DESIGN.md's resolution of the corresponding open question).
        sqlx::query(
            "UPDATE workflow_instances SET status = $2, next_run_at = COALESCE($3, next_run_at), lease_owner = NULL, lease_until = NULL, updated_at = now() WHERE id = $1",
        )
        .bind(instance_id)
        .bind(status.as_str())
        .bind(next_run_at)
        .execute(&self.pool)
        .await
        .map_err(|e| backend("update_instance_status", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn release_instance_lease(&self, instance_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE workflow_instances SET lease_owner = NULL, lease_until = NULL, updated_at = now() WHERE id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await
            .map_err(|e| backend("release_instance_lease", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_next_run_time(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT MIN(next_run_at) AS next_run_at FROM workflow_instances WHERE status = 'runnable'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| backend("get_next_run_time", e))?;
        row.try_get("next_run_at").map_err(|e| backend("read next_run_at", e))
    }

    #[instrument(skip(self), err)]
    async fn kv_get(&self, store: &str, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value FROM workflow_kv WHERE store_name = $1 AND key = $2")
            .bind(store)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("kv_get", e))?;
        row.map(|row| row.try_get("value").map_err(|e| backend("read value", e))).transpose()
    }

    #[instrument(skip(self, value), err)]
    async fn kv_set(&self, store: &str, key: &str, value: Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_kv (store_name, key, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (store_name, key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(store)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| backend("kv_set", e))?;
        Ok(())
    }

    #[instrument(skip(self, definition), err)]
    async fn upsert_definition(&self, name: &str, definition: &DefinitionNode) -> Result<DefinitionRecord> {
        let definition_json = serde_json::to_value(definition).map_err(|e| serde_err("encode definition", e))?;
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_definitions (id, name, definition_json)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET definition_json = EXCLUDED.definition_json, updated_at = now()
            RETURNING id, name, definition_json, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(definition_json)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| backend("upsert_definition", e))?;
        definition_from_row(&row)
    }

    #[instrument(skip(self, initial_blackboard), err)]
    async fn create_instance(&self, definition_id: Uuid, initial_blackboard: Option<Blackboard>) -> Result<InstanceRecord> {
        let blackboard = initial_blackboard.unwrap_or_else(crate::blackboard::empty);
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_instances (id, definition_id, status, blackboard, next_run_at)
            VALUES ($1, $2, 'runnable', $3, now())
            RETURNING id, definition_id, status, blackboard, next_run_at, lease_owner, lease_until
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(definition_id)
        .bind(blackboard)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => {
                PersistenceError::DefinitionNotFound(definition_id)
            }
            other => backend("create_instance", other),
        })?;
        instance_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn get_instance(&self, instance_id: Uuid) -> Result<Option<InstanceView>> {
        let row = sqlx::query(
            r#"
            SELECT i.id, i.definition_id, i.status, i.blackboard, i.next_run_at, i.lease_owner, i.lease_until,
                   d.id AS def_id, d.name AS def_name, d.definition_json, d.created_at AS def_created_at, d.updated_at AS def_updated_at
            FROM workflow_instances i
            JOIN workflow_definitions d ON d.id = i.definition_id
            WHERE i.id = $1
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("get_instance", e))?;

        let Some(row) = row else { return Ok(None) };
        let instance = instance_from_row(&row)?;
        let definition_json: Value = row.try_get("definition_json").map_err(|e| backend("read definition_json", e))?;
        let definition: DefinitionNode =
            serde_json::from_value(definition_json).map_err(|e| serde_err("decode definition", e))?;
        let definition_record = DefinitionRecord {
            id: row.try_get("def_id").map_err(|e| backend("read def_id", e))?,
            name: row.try_get("def_name").map_err(|e| backend("read def_name", e))?,
            definition,
            created_at: row.try_get("def_created_at").map_err(|e| backend("read def_created_at", e))?,
            updated_at: row.try_get("def_updated_at").map_err(|e| backend("read def_updated_at", e))?,
        };
        let steps = self.load_steps(instance_id).await?;
        Ok(Some(InstanceView {
            instance,
            definition: definition_record,
            steps,
        }))
    }

    #[instrument(skip(self), err)]
    async fn list_instances(&self) -> Result<Vec<InstanceRecord>> {
        let rows = sqlx::query(
            "SELECT id, definition_id, status, blackboard, next_run_at, lease_owner, lease_until FROM workflow_instances ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| backend("list_instances", e))?;
        rows.iter().map(instance_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn delete_instance(&self, instance_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM workflow_instances WHERE id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await
            .map_err(|e| backend("delete_instance", e))?;
        if result.rows_affected() == 0 {
            return Err(PersistenceError::InstanceNotFound(instance_id));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn reset_instance(&self, instance_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| backend("tx begin", e))?;
        let result = sqlx::query(
            "UPDATE workflow_instances SET status = 'runnable', next_run_at = now(), lease_owner = NULL, lease_until = NULL, updated_at = now() WHERE id = $1",
        )
        .bind(instance_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| backend("reset_instance: update instance", e))?;
        if result.rows_affected() == 0 {
            return Err(PersistenceError::InstanceNotFound(instance_id));
        }
        sqlx::query(
            "UPDATE workflow_steps SET status = 'pending', attempts = 0, last_error = NULL, updated_at = now() WHERE instance_id = $1",
        )
        .bind(instance_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| backend("reset_instance: update steps", e))?;
        tx.commit().await.map_err(|e| backend("tx commit", e))?;
        Ok(())
    }
}

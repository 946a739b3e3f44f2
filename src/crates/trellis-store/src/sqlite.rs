//! SQLite repositories

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use trellis_core::model::workflow::{Workflow, WorkflowSummary};
use trellis_core::state::ExecutionState;
use trellis_core::store::{ExecutionStateStore, StoreError, StoreResult, WorkflowStore};
use trellis_core::tenant::TenantId;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS workflows (
    tenant      TEXT NOT NULL,
    id          TEXT NOT NULL,
    version     TEXT NOT NULL,
    definition  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (tenant, id)
)"#,
    r#"CREATE TABLE IF NOT EXISTS execution_states (
    tenant        TEXT NOT NULL,
    execution_id  TEXT NOT NULL,
    snapshot      TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (tenant, execution_id)
)"#,
];

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Shared pool plus store constructors.
#[derive(Clone)]
pub struct SqliteStores {
    pool: SqlitePool,
}

impl SqliteStores {
    /// Connect and create the schema. `sqlite::memory:` works for tests.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        // A single connection keeps writes serialized per database and makes
        // `sqlite::memory:` behave as one shared database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(backend)?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await.map_err(backend)?;
        }
        debug!(url, "sqlite store ready");
        Ok(Self { pool })
    }

    pub fn workflows(&self) -> SqliteWorkflowStore {
        SqliteWorkflowStore {
            pool: self.pool.clone(),
        }
    }

    pub fn snapshots(&self) -> SqliteExecutionStateStore {
        SqliteExecutionStateStore {
            pool: self.pool.clone(),
        }
    }
}

/// Workflow definitions as JSON blobs keyed by `(tenant, id)`.
pub struct SqliteWorkflowStore {
    pool: SqlitePool,
}

#[async_trait]
impl WorkflowStore for SqliteWorkflowStore {
    async fn put(&self, tenant: &TenantId, workflow: Workflow) -> StoreResult<bool> {
        let definition = serde_json::to_string(&workflow)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let existing = sqlx::query("SELECT 1 FROM workflows WHERE tenant = ? AND id = ?")
            .bind(tenant.as_str())
            .bind(&workflow.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;

        sqlx::query(
            "INSERT INTO workflows (tenant, id, version, definition, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (tenant, id)
             DO UPDATE SET version = excluded.version,
                           definition = excluded.definition,
                           updated_at = excluded.updated_at",
        )
        .bind(tenant.as_str())
        .bind(&workflow.id)
        .bind(&workflow.version)
        .bind(&definition)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(existing.is_none())
    }

    async fn get(&self, tenant: &TenantId, id: &str) -> StoreResult<Option<Workflow>> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE tenant = ? AND id = ?")
            .bind(tenant.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => {
                let definition: String = row.try_get("definition").map_err(backend)?;
                serde_json::from_str(&definition)
                    .map(Some)
                    .map_err(|e| StoreError::Serialization(e.to_string()))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, tenant: &TenantId) -> StoreResult<Vec<WorkflowSummary>> {
        let rows = sqlx::query("SELECT id, version FROM workflows WHERE tenant = ? ORDER BY id")
            .bind(tenant.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                Ok(WorkflowSummary {
                    id: row.try_get("id").map_err(backend)?,
                    version: row.try_get("version").map_err(backend)?,
                })
            })
            .collect()
    }

    async fn delete(&self, tenant: &TenantId, id: &str) -> StoreResult<bool> {
        let outcome = sqlx::query("DELETE FROM workflows WHERE tenant = ? AND id = ?")
            .bind(tenant.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(outcome.rows_affected() > 0)
    }
}

/// Execution snapshots as JSON blobs keyed by `(tenant, execution_id)`.
pub struct SqliteExecutionStateStore {
    pool: SqlitePool,
}

#[async_trait]
impl ExecutionStateStore for SqliteExecutionStateStore {
    async fn save(
        &self,
        tenant: &TenantId,
        execution_id: &str,
        state: &ExecutionState,
    ) -> StoreResult<()> {
        let snapshot = serde_json::to_string(state)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO execution_states (tenant, execution_id, snapshot, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (tenant, execution_id)
             DO UPDATE SET snapshot = excluded.snapshot,
                           updated_at = excluded.updated_at",
        )
        .bind(tenant.as_str())
        .bind(execution_id)
        .bind(&snapshot)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn load(
        &self,
        tenant: &TenantId,
        execution_id: &str,
    ) -> StoreResult<Option<ExecutionState>> {
        let row = sqlx::query(
            "SELECT snapshot FROM execution_states WHERE tenant = ? AND execution_id = ?",
        )
        .bind(tenant.as_str())
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => {
                let snapshot: String = row.try_get("snapshot").map_err(backend)?;
                serde_json::from_str(&snapshot)
                    .map(Some)
                    .map_err(|e| StoreError::Serialization(e.to_string()))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, tenant: &TenantId, execution_id: &str) -> StoreResult<bool> {
        let outcome =
            sqlx::query("DELETE FROM execution_states WHERE tenant = ? AND execution_id = ?")
                .bind(tenant.as_str())
                .bind(execution_id)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        Ok(outcome.rows_affected() > 0)
    }

    async fn list(&self, tenant: &TenantId) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT execution_id FROM execution_states WHERE tenant = ? ORDER BY execution_id",
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| row.try_get("execution_id").map_err(backend))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use trellis_core::model::node::{EndNode, ExitStatus, Node};
    use trellis_core::state::NodeResult;

    fn workflow(id: &str, version: &str) -> Workflow {
        Workflow {
            id: id.to_string(),
            version: version.to_string(),
            metadata: Default::default(),
            agents: Default::default(),
            rubrics: Default::default(),
            nodes: [(
                "end".to_string(),
                Node::End(EndNode {
                    id: "end".to_string(),
                    exit_status: ExitStatus::Success,
                    transition_rules: vec![],
                    rubric_id: None,
                }),
            )]
            .into(),
            start_node: "end".to_string(),
            config: None,
        }
    }

    async fn stores() -> SqliteStores {
        SqliteStores::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_workflow_upsert_and_round_trip() {
        let stores = stores().await;
        let store = stores.workflows();
        let tenant = TenantId::new("acme");

        assert!(store.put(&tenant, workflow("wf1", "1")).await.unwrap());
        assert!(!store.put(&tenant, workflow("wf1", "2")).await.unwrap());

        let loaded = store.get(&tenant, "wf1").await.unwrap().unwrap();
        assert_eq!(loaded.version, "2");
        assert_eq!(loaded, workflow("wf1", "2"));

        let listed = store.list(&tenant).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].version, "2");
    }

    #[tokio::test]
    async fn test_workflow_tenant_isolation() {
        let stores = stores().await;
        let store = stores.workflows();
        let acme = TenantId::new("acme");
        let globex = TenantId::new("globex");

        store.put(&acme, workflow("wf1", "1")).await.unwrap();
        assert!(store.get(&globex, "wf1").await.unwrap().is_none());
        assert!(!store.delete(&globex, "wf1").await.unwrap());
        assert!(store.delete(&acme, "wf1").await.unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_stays_mutable() {
        let stores = stores().await;
        let store = stores.snapshots();
        let tenant = TenantId::new("acme");

        let mut state = ExecutionState::new("wf1", "n0");
        state.set("k", serde_json::json!([1, 2, 3]));
        state.history.record_step("n0", NodeResult::success("done"));
        store.save(&tenant, "e1", &state).await.unwrap();

        // Overwrite with more history; load must reflect the latest write.
        state.history.record_step("n1", NodeResult::failure("retry"));
        store.save(&tenant, "e1", &state).await.unwrap();

        let mut loaded = store.load(&tenant, "e1").await.unwrap().unwrap();
        assert_eq!(loaded.history.steps.len(), 2);
        loaded.history.record_step("n2", NodeResult::success("appended"));
        assert_eq!(loaded.history.steps.len(), 3);

        assert_eq!(store.list(&tenant).await.unwrap(), vec!["e1".to_string()]);
        assert!(store.delete(&tenant, "e1").await.unwrap());
        assert!(store.load(&tenant, "e1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trellis.db");
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let tenant = TenantId::new("acme");

        {
            let stores = SqliteStores::connect(&url).await.unwrap();
            stores
                .workflows()
                .put(&tenant, workflow("wf1", "1"))
                .await
                .unwrap();
        }

        // A fresh connection sees the previous write.
        let stores = SqliteStores::connect(&url).await.unwrap();
        let loaded = stores.workflows().get(&tenant, "wf1").await.unwrap();
        assert_eq!(loaded.unwrap().version, "1");
    }

    #[tokio::test]
    async fn test_snapshot_blob_is_contract_shaped() {
        let stores = stores().await;
        let store = stores.snapshots();
        let tenant = TenantId::new("acme");

        let state = ExecutionState::new("wf1", "n0");
        store.save(&tenant, "e1", &state).await.unwrap();

        let row = sqlx::query("SELECT snapshot FROM execution_states")
            .fetch_one(&stores.pool)
            .await
            .unwrap();
        let blob: String = row.try_get("snapshot").unwrap();
        let value: serde_json::Value = serde_json::from_str(&blob).unwrap();
        assert_eq!(value["workflowId"], "wf1");
        assert_eq!(value["currentNode"], "n0");
        assert!(value["history"].get("steps").is_some());
        let _unused: HashMap<String, serde_json::Value> =
            serde_json::from_value(value["context"].clone()).unwrap();
    }
}

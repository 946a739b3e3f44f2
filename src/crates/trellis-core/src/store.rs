//! Persistence boundary
//!
//! Two tenant-scoped repository interfaces: workflow definitions and
//! execution snapshots. The engine only ever sees these traits; the
//! in-memory implementations here are the default for tests and
//! single-process use, the relational implementations live in
//! `trellis-store`. Implementations must serialize writes for a given
//! `(tenant, id)` pair.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

use crate::model::workflow::{Workflow, WorkflowSummary};
use crate::state::ExecutionState;
use crate::tenant::TenantId;

/// Errors from a repository implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Serialization failure: {0}")]
    Serialization(String),
    #[error("Backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Repository of workflow definitions, per tenant.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Upsert. Returns `true` when the workflow was newly created.
    async fn put(&self, tenant: &TenantId, workflow: Workflow) -> StoreResult<bool>;
    async fn get(&self, tenant: &TenantId, id: &str) -> StoreResult<Option<Workflow>>;
    async fn list(&self, tenant: &TenantId) -> StoreResult<Vec<WorkflowSummary>>;
    /// Returns `true` when something was removed.
    async fn delete(&self, tenant: &TenantId, id: &str) -> StoreResult<bool>;
}

/// Repository of execution snapshots, per tenant and execution id.
#[async_trait]
pub trait ExecutionStateStore: Send + Sync {
    async fn save(
        &self,
        tenant: &TenantId,
        execution_id: &str,
        state: &ExecutionState,
    ) -> StoreResult<()>;
    async fn load(&self, tenant: &TenantId, execution_id: &str)
        -> StoreResult<Option<ExecutionState>>;
    async fn delete(&self, tenant: &TenantId, execution_id: &str) -> StoreResult<bool>;
    /// Ids of every snapshot stored for the tenant.
    async fn list(&self, tenant: &TenantId) -> StoreResult<Vec<String>>;
}

type Key = (String, String);

/// In-memory workflow repository.
#[derive(Default)]
pub struct MemoryWorkflowStore {
    workflows: RwLock<HashMap<Key, Workflow>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn put(&self, tenant: &TenantId, workflow: Workflow) -> StoreResult<bool> {
        let key = (tenant.to_string(), workflow.id.clone());
        Ok(self.workflows.write().insert(key, workflow).is_none())
    }

    async fn get(&self, tenant: &TenantId, id: &str) -> StoreResult<Option<Workflow>> {
        let key = (tenant.to_string(), id.to_string());
        Ok(self.workflows.read().get(&key).cloned())
    }

    async fn list(&self, tenant: &TenantId) -> StoreResult<Vec<WorkflowSummary>> {
        let mut summaries: Vec<WorkflowSummary> = self
            .workflows
            .read()
            .iter()
            .filter(|((t, _), _)| t == tenant.as_str())
            .map(|(_, wf)| WorkflowSummary {
                id: wf.id.clone(),
                version: wf.version.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    async fn delete(&self, tenant: &TenantId, id: &str) -> StoreResult<bool> {
        let key = (tenant.to_string(), id.to_string());
        Ok(self.workflows.write().remove(&key).is_some())
    }
}

/// In-memory execution snapshot repository. Snapshots are stored in their
/// JSON form so the memory and relational backends share one format.
#[derive(Default)]
pub struct MemoryExecutionStateStore {
    snapshots: RwLock<HashMap<Key, String>>,
}

impl MemoryExecutionStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStateStore for MemoryExecutionStateStore {
    async fn save(
        &self,
        tenant: &TenantId,
        execution_id: &str,
        state: &ExecutionState,
    ) -> StoreResult<()> {
        let blob = serde_json::to_string(state)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let key = (tenant.to_string(), execution_id.to_string());
        self.snapshots.write().insert(key, blob);
        Ok(())
    }

    async fn load(
        &self,
        tenant: &TenantId,
        execution_id: &str,
    ) -> StoreResult<Option<ExecutionState>> {
        let key = (tenant.to_string(), execution_id.to_string());
        match self.snapshots.read().get(&key) {
            Some(blob) => serde_json::from_str(blob)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn delete(&self, tenant: &TenantId, execution_id: &str) -> StoreResult<bool> {
        let key = (tenant.to_string(), execution_id.to_string());
        Ok(self.snapshots.write().remove(&key).is_some())
    }

    async fn list(&self, tenant: &TenantId) -> StoreResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .snapshots
            .read()
            .keys()
            .filter(|(t, _)| t == tenant.as_str())
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::{EndNode, ExitStatus, Node};

    fn workflow(id: &str) -> Workflow {
        Workflow {
            id: id.to_string(),
            version: "1".to_string(),
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

    #[tokio::test]
    async fn test_workflow_store_upsert_semantics() {
        let store = MemoryWorkflowStore::new();
        let tenant = TenantId::new("acme");

        assert!(store.put(&tenant, workflow("wf1")).await.unwrap());
        assert!(!store.put(&tenant, workflow("wf1")).await.unwrap());

        let listed = store.list(&tenant).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "wf1");

        assert!(store.delete(&tenant, "wf1").await.unwrap());
        assert!(!store.delete(&tenant, "wf1").await.unwrap());
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let store = MemoryWorkflowStore::new();
        let acme = TenantId::new("acme");
        let globex = TenantId::new("globex");

        store.put(&acme, workflow("wf1")).await.unwrap();
        assert!(store.get(&globex, "wf1").await.unwrap().is_none());
        assert!(store.list(&globex).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_state_store_round_trip() {
        let store = MemoryExecutionStateStore::new();
        let tenant = TenantId::new("acme");

        let mut state = ExecutionState::new("wf1", "n0");
        state.set("k", serde_json::json!("v"));
        store.save(&tenant, "e1", &state).await.unwrap();

        let loaded = store.load(&tenant, "e1").await.unwrap().unwrap();
        assert_eq!(loaded.workflow_id, "wf1");
        assert_eq!(loaded.get_str("k"), Some("v"));

        assert_eq!(store.list(&tenant).await.unwrap(), vec!["e1".to_string()]);
        assert!(store.delete(&tenant, "e1").await.unwrap());
        assert!(store.load(&tenant, "e1").await.unwrap().is_none());
    }
}

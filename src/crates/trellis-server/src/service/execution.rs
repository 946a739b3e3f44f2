//! Execution service
//!
//! Orchestrates start, resume, query and cancel for tenant-bound
//! executions. Each started execution runs the core driver on its own task;
//! the service tracks a per-execution record for status queries and holds
//! the cancellation handle. Pause snapshots live in the state repository, so
//! a paused execution can be resumed after a process restart even though the
//! in-memory record is gone.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use trellis_core::actions::ActionHandlerRegistry;
use trellis_core::agent::AgentRegistry;
use trellis_core::events::{EventBroadcaster, EventKind, ExecutionEvent};
use trellis_core::exec::{
    cancel_pair, drive, CancelHandle, ExecutionContext, ExecutionResult, GenericHandlerRegistry,
};
use trellis_core::model::node::ExitStatus;
use trellis_core::model::workflow::Workflow;
use trellis_core::plan::{Plan, Planner};
use trellis_core::review::{AutoApprove, ReviewHandler};
use trellis_core::rubric::RubricEngine;
use trellis_core::state::{keys, Context, ExecutionState};
use trellis_core::store::{ExecutionStateStore, StoreError, WorkflowStore};
use trellis_core::tenant::TenantId;
use trellis_core::tools::ToolRegistry;
use trellis_mcp::{McpSessionManager, McpToolClient, McpToolInvoker};

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Lifecycle state of one execution as the service sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Rejected,
    Cancelled,
}

#[derive(Clone)]
struct ExecutionRecord {
    workflow_id: String,
    status: ExecutionStatus,
    current_node: Option<String>,
    has_pending_plan: bool,
    final_context: Option<Context>,
    cancel: Option<Arc<CancelHandle>>,
}

/// Status row returned by query endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionView {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    pub has_pending_plan: bool,
}

/// Staged-plan summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanView {
    pub plan_id: String,
    pub total_steps: usize,
    pub current_step: usize,
}

/// Orchestrates executions for all tenants of this process.
pub struct ExecutionService {
    workflows: Arc<dyn WorkflowStore>,
    snapshots: Arc<dyn ExecutionStateStore>,
    agents: Arc<AgentRegistry>,
    tools: Arc<ToolRegistry>,
    actions: Arc<ActionHandlerRegistry>,
    generic_handlers: Arc<GenericHandlerRegistry>,
    rubrics: Arc<RubricEngine>,
    review: Arc<dyn ReviewHandler>,
    planner: Option<Arc<dyn Planner>>,
    events: EventBroadcaster,
    mcp_tools: Arc<McpToolClient>,
    executions: Arc<DashMap<(String, String), ExecutionRecord>>,
}

impl ExecutionService {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        snapshots: Arc<dyn ExecutionStateStore>,
        mcp_sessions: Arc<McpSessionManager>,
    ) -> Self {
        let mcp_tools = Arc::new(McpToolClient::new(mcp_sessions));
        let actions = ActionHandlerRegistry::new();
        actions.register(
            "mcp",
            Arc::new(trellis_mcp::McpActionHandler::new(mcp_tools.clone())),
        );
        Self {
            workflows,
            snapshots,
            agents: Arc::new(AgentRegistry::new()),
            tools: Arc::new(ToolRegistry::new()),
            actions: Arc::new(actions),
            generic_handlers: Arc::new(GenericHandlerRegistry::new()),
            rubrics: Arc::new(RubricEngine::default()),
            review: Arc::new(AutoApprove),
            planner: None,
            events: EventBroadcaster::new(),
            mcp_tools,
            executions: Arc::new(DashMap::new()),
        }
    }

    pub fn with_review(mut self, review: Arc<dyn ReviewHandler>) -> Self {
        self.review = review;
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Registries for startup-time wiring of agents, tools and handlers.
    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn actions(&self) -> &Arc<ActionHandlerRegistry> {
        &self.actions
    }

    pub fn generic_handlers(&self) -> &Arc<GenericHandlerRegistry> {
        &self.generic_handlers
    }

    pub fn rubrics(&self) -> &Arc<RubricEngine> {
        &self.rubrics
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn workflows(&self) -> &Arc<dyn WorkflowStore> {
        &self.workflows
    }

    /// Start a new execution. Returns the execution id immediately; the
    /// driver runs on its own task.
    pub async fn start(
        &self,
        tenant: &TenantId,
        workflow_id: &str,
        initial_context: Option<Context>,
    ) -> ServiceResult<String> {
        let workflow = self
            .workflows
            .get(tenant, workflow_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("workflow '{workflow_id}' not found")))?;
        workflow.validate().map_err(ServiceError::Invalid)?;

        let execution_id = Uuid::new_v4().to_string();
        let mut state = ExecutionState::new(workflow.id.clone(), workflow.start_node.clone());
        if let Some(initial) = initial_context {
            state.context = initial;
        }
        state.set(keys::TENANT, json!(tenant.as_str()));

        info!(
            tenant = %tenant,
            workflow = workflow_id,
            execution = %execution_id,
            "starting execution"
        );
        self.events.publish(ExecutionEvent::new(
            &execution_id,
            workflow_id,
            tenant.as_str(),
            EventKind::Started,
        ));

        self.spawn_run(tenant.clone(), execution_id.clone(), Arc::new(workflow), state);
        Ok(execution_id)
    }

    /// Resume a paused execution with an approval decision.
    pub async fn resume(
        &self,
        tenant: &TenantId,
        execution_id: &str,
        approved: bool,
        modifications: Option<HashMap<String, Value>>,
    ) -> ServiceResult<()> {
        let key = (tenant.to_string(), execution_id.to_string());
        if let Some(record) = self.executions.get(&key) {
            if record.status == ExecutionStatus::Running {
                return Err(ServiceError::Conflict(format!(
                    "execution '{execution_id}' is running"
                )));
            }
        }

        let mut state = self
            .snapshots
            .load(tenant, execution_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("no snapshot for execution '{execution_id}'"))
            })?;

        if !approved {
            info!(tenant = %tenant, execution = execution_id, "resume declined; rejecting");
            state.context.remove(keys::PENDING_PLAN);
            self.snapshots.save(tenant, execution_id, &state).await?;
            self.update_record(tenant, execution_id, &state.workflow_id.clone(), |record| {
                record.status = ExecutionStatus::Rejected;
                record.has_pending_plan = false;
                record.final_context = Some(state.context.clone());
            });
            self.events.publish(ExecutionEvent::new(
                execution_id,
                &state.workflow_id,
                tenant.as_str(),
                EventKind::Error {
                    message: "rejected: plan declined by reviewer".to_string(),
                },
            ));
            return Ok(());
        }

        let workflow = self
            .workflows
            .get(tenant, &state.workflow_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("workflow '{}' not found", state.workflow_id))
            })?;

        if let Some(modifications) = modifications {
            state.context.extend(modifications);
        }
        state.set(keys::PLAN_APPROVED, json!(true));

        info!(tenant = %tenant, execution = execution_id, "resuming execution");
        self.spawn_run(
            tenant.clone(),
            execution_id.to_string(),
            Arc::new(workflow),
            state,
        );
        Ok(())
    }

    /// Status view for one execution.
    pub async fn status(
        &self,
        tenant: &TenantId,
        execution_id: &str,
    ) -> ServiceResult<ExecutionView> {
        let key = (tenant.to_string(), execution_id.to_string());
        if let Some(record) = self.executions.get(&key) {
            return Ok(Self::view(execution_id, &record));
        }
        // No live record (e.g. process restarted); fall back to the snapshot.
        let state = self
            .snapshots
            .load(tenant, execution_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("execution '{execution_id}' not found"))
            })?;
        let has_pending_plan = state.get(keys::PENDING_PLAN).is_some();
        Ok(ExecutionView {
            execution_id: execution_id.to_string(),
            workflow_id: state.workflow_id.clone(),
            status: if has_pending_plan {
                ExecutionStatus::Paused
            } else {
                ExecutionStatus::Running
            },
            current_node_id: Some(state.current_node),
            has_pending_plan,
        })
    }

    /// Staged plan for a paused execution.
    pub async fn plan(&self, tenant: &TenantId, execution_id: &str) -> ServiceResult<PlanView> {
        let state = self
            .snapshots
            .load(tenant, execution_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("execution '{execution_id}' not found"))
            })?;
        let plan: Plan = state
            .get(keys::PENDING_PLAN)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .ok_or_else(|| {
                ServiceError::NotFound(format!("execution '{execution_id}' has no pending plan"))
            })?;
        Ok(PlanView {
            plan_id: plan.id,
            total_steps: plan.steps.len(),
            current_step: 0,
        })
    }

    /// Paused executions for a tenant.
    pub fn paused(&self, tenant: &TenantId) -> Vec<ExecutionView> {
        let mut views: Vec<ExecutionView> = self
            .executions
            .iter()
            .filter(|entry| {
                entry.key().0 == tenant.as_str()
                    && entry.value().status == ExecutionStatus::Paused
            })
            .map(|entry| Self::view(&entry.key().1, entry.value()))
            .collect();
        views.sort_by(|a, b| a.execution_id.cmp(&b.execution_id));
        views
    }

    /// Final context with engine-internal keys stripped.
    pub async fn result(
        &self,
        tenant: &TenantId,
        execution_id: &str,
    ) -> ServiceResult<Map<String, Value>> {
        let key = (tenant.to_string(), execution_id.to_string());
        let context = match self.executions.get(&key).and_then(|r| r.final_context.clone()) {
            Some(context) => context,
            None => {
                self.snapshots
                    .load(tenant, execution_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("execution '{execution_id}' not found"))
                    })?
                    .context
            }
        };
        Ok(context
            .into_iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .collect())
    }

    /// Signal cancellation; the driver observes it between nodes.
    pub fn cancel(&self, tenant: &TenantId, execution_id: &str) -> ServiceResult<()> {
        let key = (tenant.to_string(), execution_id.to_string());
        let record = self
            .executions
            .get(&key)
            .ok_or_else(|| ServiceError::NotFound(format!("execution '{execution_id}' not found")))?;
        match &record.cancel {
            Some(handle) => {
                handle.cancel();
                Ok(())
            }
            None => Err(ServiceError::Conflict(format!(
                "execution '{execution_id}' is not running"
            ))),
        }
    }

    fn view(execution_id: &str, record: &ExecutionRecord) -> ExecutionView {
        ExecutionView {
            execution_id: execution_id.to_string(),
            workflow_id: record.workflow_id.clone(),
            status: record.status,
            current_node_id: record.current_node.clone(),
            has_pending_plan: record.has_pending_plan,
        }
    }

    fn update_record<F>(&self, tenant: &TenantId, execution_id: &str, workflow_id: &str, apply: F)
    where
        F: FnOnce(&mut ExecutionRecord),
    {
        let key = (tenant.to_string(), execution_id.to_string());
        let mut record = self.executions.entry(key).or_insert_with(|| ExecutionRecord {
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Running,
            current_node: None,
            has_pending_plan: false,
            final_context: None,
            cancel: None,
        });
        apply(record.value_mut());
    }

    fn spawn_run(
        &self,
        tenant: TenantId,
        execution_id: String,
        workflow: Arc<Workflow>,
        mut state: ExecutionState,
    ) {
        let (cancel_handle, cancel_flag) = cancel_pair();
        let workflow_id = workflow.id.clone();

        self.update_record(&tenant, &execution_id, &workflow_id, |record| {
            record.workflow_id = workflow_id.clone();
            record.status = ExecutionStatus::Running;
            record.current_node = Some(state.current_node.clone());
            record.has_pending_plan = false;
            record.final_context = None;
            record.cancel = Some(Arc::new(cancel_handle));
        });

        let mut builder = ExecutionContext::builder(tenant.clone(), workflow)
            .execution_id(execution_id.clone())
            .agents(self.agents.clone())
            .tools(self.tools.clone())
            .actions(self.actions.clone())
            .generic_handlers(self.generic_handlers.clone())
            .rubrics(self.rubrics.clone())
            .review(self.review.clone())
            .events(self.events.clone())
            .workflow_store(self.workflows.clone())
            .snapshot_store(self.snapshots.clone())
            .cancel(cancel_flag)
            .tool_invoker(Arc::new(McpToolInvoker::new(
                self.mcp_tools.clone(),
                tenant.as_str(),
            )))
            // No local shell on the server-side action executor.
            .forbid_local_exec();
        if let Some(planner) = &self.planner {
            builder = builder.planner(planner.clone());
        }
        let ctx = builder.build();

        let executions = self.executions.clone();
        let snapshots = self.snapshots.clone();
        tokio::spawn(async move {
            let outcome = drive(&ctx, &mut state).await;
            let final_state = outcome.state().clone();

            // Persist the terminal snapshot so queries survive restarts.
            if let Err(err) = snapshots.save(&tenant, &execution_id, &final_state).await {
                warn!(execution = %execution_id, error = %err, "failed to persist final snapshot");
            }

            let status = match &outcome {
                ExecutionResult::Completed { exit_status, .. } => match exit_status {
                    ExitStatus::Success => ExecutionStatus::Completed,
                    ExitStatus::Failure => ExecutionStatus::Failed,
                    ExitStatus::Cancel => ExecutionStatus::Cancelled,
                },
                ExecutionResult::Rejected { .. } => ExecutionStatus::Rejected,
                ExecutionResult::Failed { .. } => ExecutionStatus::Failed,
                ExecutionResult::Paused { .. } => ExecutionStatus::Paused,
                ExecutionResult::Cancelled { .. } => ExecutionStatus::Cancelled,
            };

            let key = (tenant.to_string(), execution_id.clone());
            if let Some(mut record) = executions.get_mut(&key) {
                record.status = status;
                record.current_node = Some(final_state.current_node.clone());
                record.has_pending_plan = final_state.get(keys::PENDING_PLAN).is_some();
                record.cancel = None;
                if !matches!(status, ExecutionStatus::Running | ExecutionStatus::Paused) {
                    record.final_context = Some(final_state.context.clone());
                }
            }
            info!(execution = %execution_id, status = ?status, "execution settled");
        });
    }
}

//! Execution context
//!
//! One [`ExecutionContext`] per execution, cloned cheaply (all shared pieces
//! are `Arc`s) into branch tasks so tenant identity, registries and the
//! cancellation flag cross task boundaries by value. Registries are
//! per-server singletons constructed at startup and threaded through here,
//! never process-wide mutable globals.

use std::sync::Arc;
use tokio::sync::watch;

use crate::actions::{ActionHandlerRegistry, CommandRegistry};
use crate::agent::AgentRegistry;
use crate::events::EventBroadcaster;
use crate::exec::executors::generic::GenericHandlerRegistry;
use crate::exec::forkjoin::ForkTable;
use crate::model::workflow::Workflow;
use crate::plan::Planner;
use crate::review::{AutoApprove, ReviewHandler};
use crate::rubric::RubricEngine;
use crate::state::ExecutionState;
use crate::store::{
    ExecutionStateStore, MemoryExecutionStateStore, MemoryWorkflowStore, WorkflowStore,
};
use crate::tenant::TenantId;
use crate::tools::{ToolInvoker, ToolRegistry};

/// Maximum sub-workflow nesting before the executor refuses to recurse.
pub const MAX_SUBWORKFLOW_DEPTH: u32 = 8;

/// Read side of the per-execution cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelFlag {
    rx: watch::Receiver<bool>,
}

impl CancelFlag {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// A flag that never fires, for tests and fire-and-forget runs.
    pub fn never() -> Self {
        // Dropping the sender freezes the value at `false`.
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }
}

/// Write side of the cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create a linked cancellation handle/flag pair.
pub fn cancel_pair() -> (CancelHandle, CancelFlag) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelFlag { rx })
}

/// Callbacks fired at the driver's stable points.
///
/// `on_checkpoint` fires before each node body; the state it sees is the
/// consistent recovery point. `on_paused` fires after a pause snapshot has
/// been persisted.
pub trait ExecutionObserver: Send + Sync {
    fn on_checkpoint(&self, _state: &ExecutionState) {}
    fn on_paused(&self, _state: &ExecutionState) {}
}

/// Observer doing nothing.
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {}

/// Everything node executors and pipeline processors need, bundled.
#[derive(Clone)]
pub struct ExecutionContext {
    pub tenant: TenantId,
    pub execution_id: String,
    pub workflow: Arc<Workflow>,
    pub agents: Arc<AgentRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub actions: Arc<ActionHandlerRegistry>,
    pub commands: Arc<CommandRegistry>,
    pub rubrics: Arc<RubricEngine>,
    pub review: Arc<dyn ReviewHandler>,
    pub planner: Option<Arc<dyn Planner>>,
    /// Seam used by the plan executor; defaults to the local tool registry.
    pub tool_invoker: Arc<dyn ToolInvoker>,
    pub generic_handlers: Arc<GenericHandlerRegistry>,
    pub workflows: Arc<dyn WorkflowStore>,
    pub snapshots: Arc<dyn ExecutionStateStore>,
    pub events: EventBroadcaster,
    pub observer: Arc<dyn ExecutionObserver>,
    pub cancel: CancelFlag,
    pub forks: ForkTable,
    /// When false, `Execute` actions are rejected outright (server-side
    /// executor: no local shell).
    pub allow_local_exec: bool,
    /// Sub-workflow nesting depth of this context.
    pub depth: u32,
}

impl ExecutionContext {
    pub fn builder(tenant: TenantId, workflow: Arc<Workflow>) -> ExecutionContextBuilder {
        ExecutionContextBuilder::new(tenant, workflow)
    }

    /// Derive the context a child workflow runs under.
    pub fn for_sub_workflow(&self, child: Arc<Workflow>, sub_node_id: &str) -> Self {
        let mut ctx = self.clone();
        ctx.execution_id = format!("{}:{}", self.execution_id, sub_node_id);
        ctx.workflow = child;
        ctx.forks = ForkTable::new();
        ctx.depth = self.depth + 1;
        ctx
    }
}

/// Builder for [`ExecutionContext`] with test-friendly defaults: in-memory
/// repositories, auto-approving review, no planner.
pub struct ExecutionContextBuilder {
    tenant: TenantId,
    execution_id: Option<String>,
    workflow: Arc<Workflow>,
    agents: Arc<AgentRegistry>,
    tools: Arc<ToolRegistry>,
    actions: Arc<ActionHandlerRegistry>,
    commands: Arc<CommandRegistry>,
    rubrics: Arc<RubricEngine>,
    review: Arc<dyn ReviewHandler>,
    planner: Option<Arc<dyn Planner>>,
    tool_invoker: Option<Arc<dyn ToolInvoker>>,
    generic_handlers: Arc<GenericHandlerRegistry>,
    workflows: Option<Arc<dyn WorkflowStore>>,
    snapshots: Option<Arc<dyn ExecutionStateStore>>,
    events: EventBroadcaster,
    observer: Arc<dyn ExecutionObserver>,
    cancel: Option<CancelFlag>,
    allow_local_exec: bool,
}

impl ExecutionContextBuilder {
    pub fn new(tenant: TenantId, workflow: Arc<Workflow>) -> Self {
        Self {
            tenant,
            execution_id: None,
            workflow,
            agents: Arc::new(AgentRegistry::new()),
            tools: Arc::new(ToolRegistry::new()),
            actions: Arc::new(ActionHandlerRegistry::new()),
            commands: Arc::new(CommandRegistry::new()),
            rubrics: Arc::new(RubricEngine::default()),
            review: Arc::new(AutoApprove),
            planner: None,
            tool_invoker: None,
            generic_handlers: Arc::new(GenericHandlerRegistry::new()),
            workflows: None,
            snapshots: None,
            events: EventBroadcaster::new(),
            observer: Arc::new(NoopObserver),
            cancel: None,
            allow_local_exec: true,
        }
    }

    pub fn execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    pub fn agents(mut self, agents: Arc<AgentRegistry>) -> Self {
        self.agents = agents;
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn actions(mut self, actions: Arc<ActionHandlerRegistry>) -> Self {
        self.actions = actions;
        self
    }

    pub fn commands(mut self, commands: Arc<CommandRegistry>) -> Self {
        self.commands = commands;
        self
    }

    pub fn rubrics(mut self, rubrics: Arc<RubricEngine>) -> Self {
        self.rubrics = rubrics;
        self
    }

    pub fn review(mut self, review: Arc<dyn ReviewHandler>) -> Self {
        self.review = review;
        self
    }

    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn tool_invoker(mut self, invoker: Arc<dyn ToolInvoker>) -> Self {
        self.tool_invoker = Some(invoker);
        self
    }

    pub fn generic_handlers(mut self, handlers: Arc<GenericHandlerRegistry>) -> Self {
        self.generic_handlers = handlers;
        self
    }

    pub fn workflow_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.workflows = Some(store);
        self
    }

    pub fn snapshot_store(mut self, store: Arc<dyn ExecutionStateStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub fn events(mut self, events: EventBroadcaster) -> Self {
        self.events = events;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn forbid_local_exec(mut self) -> Self {
        self.allow_local_exec = false;
        self
    }

    pub fn build(self) -> ExecutionContext {
        let tool_invoker: Arc<dyn ToolInvoker> = match self.tool_invoker {
            Some(invoker) => invoker,
            None => self.tools.clone(),
        };
        ExecutionContext {
            tenant: self.tenant,
            execution_id: self
                .execution_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            workflow: self.workflow,
            agents: self.agents,
            tools: self.tools,
            actions: self.actions,
            commands: self.commands,
            rubrics: self.rubrics,
            review: self.review,
            planner: self.planner,
            tool_invoker,
            generic_handlers: self.generic_handlers,
            workflows: self
                .workflows
                .unwrap_or_else(|| Arc::new(MemoryWorkflowStore::new())),
            snapshots: self
                .snapshots
                .unwrap_or_else(|| Arc::new(MemoryExecutionStateStore::new())),
            events: self.events,
            observer: self.observer,
            cancel: self.cancel.unwrap_or_else(CancelFlag::never),
            forks: ForkTable::new(),
            allow_local_exec: self.allow_local_exec,
            depth: 0,
        }
    }
}

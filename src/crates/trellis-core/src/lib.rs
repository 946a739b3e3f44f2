//! # trellis-core
//!
//! Core execution engine for Trellis, a multi-tenant workflow engine for
//! AI/LLM pipelines. A workflow is a directed graph of nodes with ordered
//! transition rules; the driver walks the graph node by node, wrapping every
//! node body in a pre/post processing pipeline that validates output,
//! records history, gates on human review, scores results against rubrics
//! (backtracking automatically on failures) and resolves the next cursor
//! position.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Driver loop (per execution)                                │
//! │                                                             │
//! │   cursor ──► checkpoint ──► executor ──► post-pipeline ──┐  │
//! │     ▲                                                    │  │
//! │     │          output ▸ history ▸ review ▸ rubric ▸      │  │
//! │     └────────────────── transition ◄─────────────────────┘  │
//! │                                                             │
//! │   terminal: Completed / Rejected / Failed / Paused /        │
//! │             Cancelled                                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The crate is transport-free: agents, action handlers, review handlers,
//! planners and repositories are trait seams filled in by the embedding
//! process (see `trellis-server` and `trellis-mcp`).

pub mod actions;
pub mod agent;
pub mod error;
pub mod events;
pub mod exec;
pub mod model;
pub mod plan;
pub mod retry;
pub mod review;
pub mod rubric;
pub mod state;
pub mod store;
pub mod template;
pub mod tenant;
pub mod tools;
pub mod validation;

pub use agent::{Agent, AgentError, AgentRegistry, AgentResponse};
pub use error::{EngineError, Result};
pub use events::{EventBroadcaster, EventKind, ExecutionEvent};
pub use exec::{
    cancel_pair, drive, CancelFlag, CancelHandle, ExecutionContext, ExecutionContextBuilder,
    ExecutionObserver, ExecutionResult,
};
pub use model::{Node, TransitionRule, Workflow};
pub use state::{ExecutionState, NodeResult, NodeStatus};
pub use store::{
    ExecutionStateStore, MemoryExecutionStateStore, MemoryWorkflowStore, StoreError, WorkflowStore,
};
pub use tenant::TenantId;

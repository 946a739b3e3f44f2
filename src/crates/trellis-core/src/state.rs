//! Per-execution mutable state
//!
//! [`ExecutionState`] is the single mutable object owned by one execution: the
//! context map, the cursor, and the append-only history of steps and
//! backtracks. Its JSON form is the snapshot stored by the state repository
//! and is a compatibility contract:
//!
//! ```text
//! {workflowId, currentNode, context, history: {steps, backtracks},
//!  rubricEvaluation?, loopBreakTarget?}
//! ```
//!
//! No two driver tasks ever touch the same `ExecutionState`. Branch tasks
//! spawned by Parallel/Fork nodes operate on derived snapshots and merge back
//! through their executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::model::rubric::RubricEvaluation;
use crate::model::NodeId;

/// Key-value execution context. Keys beginning with `_` are reserved for
/// engine-internal metadata.
pub type Context = HashMap<String, Value>;

/// Reserved context keys understood by the engine.
pub mod keys {
    /// Set on a Pending result when a generated plan awaits human review.
    pub const PLAN_REVIEW_REQUIRED: &str = "_plan_review_required";
    /// Routing target attached when plan execution fails.
    pub const PLAN_FAILURE_TARGET: &str = "_plan_failure_target";
    /// Staged plan awaiting approval, serialized into context on pause.
    pub const PENDING_PLAN: &str = "_pending_plan";
    /// Marks a staged plan as approved by a resume request.
    pub const PLAN_APPROVED: &str = "_plan_approved";
    /// Target consumed by the transition processor when a loop exits.
    pub const LOOP_EXIT_TARGET: &str = "loop_exit_target";
    /// Counter gating rubric-driven same-node retries.
    pub const RETRY_ATTEMPT: &str = "retry_attempt";
    /// Human-readable reason for the most recent automatic backtrack.
    pub const BACKTRACK_REASON: &str = "backtrack_reason";
    /// Criteria that failed in the most recent rubric evaluation.
    pub const FAILED_CRITERIA: &str = "failed_criteria";
    /// Suggestions from the most recent rubric evaluation.
    pub const IMPROVEMENT_SUGGESTIONS: &str = "improvement_suggestions";
    /// Optional recommendations attached on automatic backtrack.
    pub const RECOMMENDATIONS: &str = "recommendations";
    /// Tenant owning this execution; set by the execution service so
    /// handlers crossing the process boundary can route per tenant.
    pub const TENANT: &str = "_tenant";

    /// Per-node retry counter used by `Failure(maxRetries, target)` rules.
    pub fn retry_count(node_id: &str) -> String {
        format!("_retry_count:{node_id}")
    }

    /// Prompt override staged by a review backtrack, consumed once by the
    /// standard executor on the next visit to the target node.
    pub fn edited_prompt(node_id: &str) -> String {
        format!("_edited_prompt:{node_id}")
    }
}

/// Outcome class of a single node execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Success,
    Failure,
    /// The node paused the execution (e.g. plan review).
    Pending,
    /// Terminal marker produced only by End nodes.
    End,
}

/// Result produced by a node executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub status: NodeStatus,
    /// Node output, usually a string. `None` when the node produced nothing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    /// Internal error detail. Never serialized.
    #[serde(skip)]
    pub error: Option<String>,
}

impl NodeResult {
    pub fn success(output: impl Into<Value>) -> Self {
        Self {
            status: NodeStatus::Success,
            output: Some(output.into()),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: NodeStatus::Failure,
            output: Some(Value::String(message.clone())),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            error: Some(message),
        }
    }

    pub fn pending() -> Self {
        Self {
            status: NodeStatus::Pending,
            output: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn end() -> Self {
        Self {
            status: NodeStatus::End,
            output: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == NodeStatus::Success
    }

    /// String form of the output, for validation and template use.
    pub fn output_text(&self) -> Option<String> {
        match &self.output {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        }
    }
}

/// One completed node body within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub node_id: NodeId,
    pub result: NodeResult,
    pub timestamp: DateTime<Utc>,
}

/// How a backtrack was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BacktrackType {
    /// Decided by a human reviewer.
    Manual,
    /// Decided by the rubric processor.
    Automatic,
    /// Explicit jump requested by a node.
    Jump,
}

/// A cursor move to an earlier node, recorded without unwinding history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktrackEvent {
    pub from: NodeId,
    pub to: NodeId,
    pub reason: String,
    #[serde(rename = "type")]
    pub backtrack_type: BacktrackType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rubric_score: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only record of everything an execution did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionHistory {
    #[serde(default)]
    pub steps: Vec<ExecutionStep>,
    #[serde(default)]
    pub backtracks: Vec<BacktrackEvent>,
}

impl ExecutionHistory {
    pub fn record_step(&mut self, node_id: impl Into<NodeId>, result: NodeResult) {
        self.steps.push(ExecutionStep {
            node_id: node_id.into(),
            result,
            timestamp: Utc::now(),
        });
    }

    pub fn record_backtrack(&mut self, event: BacktrackEvent) {
        self.backtracks.push(event);
    }

    pub fn last_step(&self) -> Option<&ExecutionStep> {
        self.steps.last()
    }
}

/// Mutable state of a single execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub workflow_id: String,
    pub current_node: NodeId,
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub history: ExecutionHistory,
    /// Most recent rubric evaluation, for downstream processors and score
    /// transitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rubric_evaluation: Option<RubricEvaluation>,
    /// One-shot cursor override consumed by the transition processor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_break_target: Option<NodeId>,
}

impl ExecutionState {
    pub fn new(workflow_id: impl Into<String>, start_node: impl Into<NodeId>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            current_node: start_node.into(),
            context: Context::new(),
            history: ExecutionHistory::default(),
            rubric_evaluation: None,
            loop_break_target: None,
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.context.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }

    /// Current value of the per-node retry counter for `Failure` rules.
    pub fn retry_count(&self, node_id: &str) -> u32 {
        self.context
            .get(&keys::retry_count(node_id))
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    }

    /// Increment and return the per-node retry counter.
    pub fn bump_retry_count(&mut self, node_id: &str) -> u32 {
        let next = self.retry_count(node_id) + 1;
        self.context
            .insert(keys::retry_count(node_id), Value::from(next));
        next
    }

    /// Reset counters when the cursor enters `node_id` from a different
    /// predecessor. Counters persist across self-loops.
    pub fn reset_retry_counters(&mut self, node_id: &str) {
        self.context.remove(&keys::retry_count(node_id));
        self.context.remove(keys::RETRY_ATTEMPT);
    }
}

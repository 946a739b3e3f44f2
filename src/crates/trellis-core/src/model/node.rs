//! Node taxonomy
//!
//! A node is a tagged variant over nine shapes. Every shape shares `id`,
//! `transitionRules` and an optional `rubricId`; the executor registry
//! dispatches on the tag.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::model::transition::TransitionRule;
use crate::model::NodeId;
use crate::plan::Plan;

/// A workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Node {
    Standard(StandardNode),
    Action(ActionNode),
    Generic(GenericNode),
    Parallel(ParallelNode),
    Fork(ForkNode),
    Join(JoinNode),
    SubWorkflow(SubWorkflowNode),
    Loop(LoopNode),
    End(EndNode),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Standard(n) => &n.id,
            Node::Action(n) => &n.id,
            Node::Generic(n) => &n.id,
            Node::Parallel(n) => &n.id,
            Node::Fork(n) => &n.id,
            Node::Join(n) => &n.id,
            Node::SubWorkflow(n) => &n.id,
            Node::Loop(n) => &n.id,
            Node::End(n) => &n.id,
        }
    }

    pub fn transition_rules(&self) -> &[TransitionRule] {
        match self {
            Node::Standard(n) => &n.transition_rules,
            Node::Action(n) => &n.transition_rules,
            Node::Generic(n) => &n.transition_rules,
            Node::Parallel(n) => &n.transition_rules,
            Node::Fork(n) => &n.transition_rules,
            Node::Join(n) => &n.transition_rules,
            Node::SubWorkflow(n) => &n.transition_rules,
            Node::Loop(n) => &n.transition_rules,
            Node::End(n) => &n.transition_rules,
        }
    }

    pub fn rubric_id(&self) -> Option<&str> {
        match self {
            Node::Standard(n) => n.rubric_id.as_deref(),
            Node::Action(n) => n.rubric_id.as_deref(),
            Node::Generic(n) => n.rubric_id.as_deref(),
            Node::Parallel(n) => n.rubric_id.as_deref(),
            Node::Fork(n) => n.rubric_id.as_deref(),
            Node::Join(n) => n.rubric_id.as_deref(),
            Node::SubWorkflow(n) => n.rubric_id.as_deref(),
            Node::Loop(n) => n.rubric_id.as_deref(),
            Node::End(n) => n.rubric_id.as_deref(),
        }
    }

    pub fn review_config(&self) -> Option<&ReviewConfig> {
        match self {
            Node::Standard(n) => n.review_config.as_ref(),
            _ => None,
        }
    }

    /// Variant name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Standard(_) => "standard",
            Node::Action(_) => "action",
            Node::Generic(_) => "generic",
            Node::Parallel(_) => "parallel",
            Node::Fork(_) => "fork",
            Node::Join(_) => "join",
            Node::SubWorkflow(_) => "subWorkflow",
            Node::Loop(_) => "loop",
            Node::End(_) => "end",
        }
    }
}

/// Prompt-driven agent node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardNode {
    pub id: NodeId,
    pub agent_id: String,
    /// Template string resolved against the execution context.
    pub prompt: String,
    /// Top-level JSON keys extracted from the output into the context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_params: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transition_rules: Vec<TransitionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_config: Option<ReviewConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planning_config: Option<PlanningConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_plan: Option<Plan>,
}

/// When a human review gate applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReviewMode {
    #[default]
    Off,
    /// Review only non-success results.
    Optional,
    /// Review every result.
    Required,
}

/// Human review gate configuration for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewConfig {
    pub mode: ReviewMode,
    /// Free-text guidance shown to the reviewer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Planning behavior for a standard node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningConfig {
    pub mode: PlanningMode,
    /// Pause for human approval before executing the plan.
    #[serde(default)]
    pub review_before_execute: bool,
    /// Node to route to when plan execution fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_failure_target: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlanningMode {
    /// Use the node's `staticPlan`.
    Static,
    /// Ask the planner for a plan over the registered tools.
    Dynamic,
}

/// Ordered side-effect node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionNode {
    pub id: NodeId,
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transition_rules: Vec<TransitionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_id: Option<String>,
}

/// A single action within an [`ActionNode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Action {
    /// Dispatch a payload to a registered handler.
    Send {
        handler: String,
        #[serde(default)]
        payload: HashMap<String, Value>,
    },
    /// Run a command from the workflow-adjacent commands file.
    Execute { command: String },
}

/// User-extensible node dispatched by handler name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericNode {
    pub id: NodeId,
    pub executor_type: String,
    #[serde(default)]
    pub config: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transition_rules: Vec<TransitionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_id: Option<String>,
}

/// Concurrent multi-agent node with consensus evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelNode {
    pub id: NodeId,
    pub branches: Vec<Branch>,
    pub consensus: ConsensusConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transition_rules: Vec<TransitionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_id: Option<String>,
}

/// One arm of a parallel node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: String,
    pub agent_id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_id: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// How branch outcomes are combined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusConfig {
    pub strategy: ConsensusStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_agent: Option<String>,
    /// Minimum fraction (0..=1) required to declare consensus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsensusStrategy {
    MajorityVote,
    WeightedVote,
    Unanimous,
    JudgeDecides,
}

/// Spawns branch tasks and returns immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkNode {
    pub id: NodeId,
    pub targets: Vec<NodeId>,
    #[serde(default = "default_true")]
    pub wait_for_all: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transition_rules: Vec<TransitionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_id: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Blocks on previously forked branches and merges their outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinNode {
    pub id: NodeId,
    /// Fork node ids this join consumes.
    pub await_targets: Vec<NodeId>,
    pub merge_strategy: MergeStrategy,
    /// Context key receiving the merged value.
    pub output_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub fail_on_any_error: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transition_rules: Vec<TransitionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// Ordered list of every branch output, in fork target order.
    CollectAll,
    /// First successful branch output.
    FirstSuccess,
    /// CollectAll plus a declared winner when a strict majority agrees.
    Majority,
}

/// Runs a child workflow with field remapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubWorkflowNode {
    pub id: NodeId,
    pub workflow_id: String,
    /// parent context key -> child context key
    #[serde(default)]
    pub input_mapping: HashMap<String, String>,
    /// child context key -> parent context key
    #[serde(default)]
    pub output_mapping: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transition_rules: Vec<TransitionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_id: Option<String>,
}

/// Loop anchor; exit routing is carried in state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopNode {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transition_rules: Vec<TransitionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_id: Option<String>,
}

/// Terminal node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndNode {
    pub id: NodeId,
    #[serde(default)]
    pub exit_status: ExitStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transition_rules: Vec<TransitionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_id: Option<String>,
}

/// How a completed execution finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitStatus {
    #[default]
    Success,
    Failure,
    Cancel,
}

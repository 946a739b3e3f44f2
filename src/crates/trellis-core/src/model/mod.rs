//! Immutable workflow value types
//!
//! Everything under this module is immutable post-build and serializes to the
//! workflow JSON contract. The [`Workflow`] object is the root; nodes are a
//! tagged variant over the shapes in [`node`], transitions a tagged variant in
//! [`transition`], quality gates in [`rubric`].

pub mod agent;
pub mod node;
pub mod rubric;
pub mod transition;
pub mod workflow;

/// Node identifier, unique within a workflow.
pub type NodeId = String;

pub use agent::AgentConfig;
pub use node::{
    Action, ActionNode, Branch, ConsensusConfig, ConsensusStrategy, EndNode, ExitStatus,
    ForkNode, GenericNode, JoinNode, LoopNode, MergeStrategy, Node, ParallelNode, PlanningConfig,
    PlanningMode, ReviewConfig, ReviewMode, StandardNode, SubWorkflowNode,
};
pub use rubric::{
    Criterion, CriterionResult, EvaluationType, Rubric, RubricEvaluation,
};
pub use transition::{ScoreCondition, ScoreOperator, TransitionRule};
pub use workflow::{ExecutionConfig, Workflow, WorkflowMetadata, WorkflowSummary};

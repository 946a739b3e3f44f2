//! Error types for workflow execution
//!
//! All engine errors are variants of [`EngineError`]. The distinction that
//! matters at runtime is between errors that terminate an execution (invalid
//! workflow, missing rubric, dead-end transitions) and errors that are folded
//! into a node's [`NodeResult`](crate::state::NodeResult) so transition rules
//! can route around them (agent failures, action failures, join timeouts).

use thiserror::Error;

/// Convenience result type using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the execution engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The workflow definition is structurally invalid.
    ///
    /// Raised before any node executes: dangling transition targets, a
    /// missing start node, rubric references without a source, and similar
    /// authoring mistakes. Executions failing this way are never
    /// checkpointed.
    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// The execution cursor points at a node id that is not in the workflow.
    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    /// A node produced output that failed safety validation.
    #[error("Output validation failed for node '{node}': {reason}")]
    OutputValidation { node: String, reason: String },

    /// A node references an agent id that is not registered.
    #[error("Agent '{0}' is not registered")]
    AgentMissing(String),

    /// A node carries a rubric id with no registered rubric and no loadable
    /// source in the workflow.
    #[error("Rubric '{0}' not found")]
    RubricMissing(String),

    /// Rubric evaluation itself failed (distinct from a failing score).
    #[error("Rubric evaluation failed: {0}")]
    Rubric(String),

    /// No transition rule produced a target node.
    #[error("No valid transition from {0}")]
    TransitionDeadEnd(String),

    /// Action handler or command execution failure.
    #[error("Action failed: {0}")]
    Action(String),

    /// Sub-workflow lookup or recursion failure.
    #[error("Sub-workflow error: {0}")]
    SubWorkflow(String),

    /// Persistence failure from a repository implementation.
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// An operation exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Step budget or wall-clock budget exhausted.
    #[error("Execution budget exceeded: {0}")]
    BudgetExceeded(String),

    /// The execution was cancelled.
    #[error("Execution cancelled")]
    Cancelled,

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for internal invariant violations.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Shorthand for an [`EngineError::OutputValidation`] with context.
    pub fn output_validation(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OutputValidation {
            node: node.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::TransitionDeadEnd("review".to_string());
        assert_eq!(format!("{}", err), "No valid transition from review");

        let err = EngineError::output_validation("n0", "oversized output");
        assert_eq!(
            format!("{}", err),
            "Output validation failed for node 'n0': oversized output"
        );
    }
}

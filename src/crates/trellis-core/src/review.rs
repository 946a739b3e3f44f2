//! Human review gate
//!
//! Nodes carrying a `reviewConfig` hand their result to a [`ReviewHandler`]
//! after execution. Synchronous handlers block the driver task and return a
//! decision directly; asynchronous deployments pause the execution instead
//! and resume it through the service layer once a decision arrives.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;
use crate::model::node::{Node, ReviewConfig};
use crate::model::workflow::Workflow;
use crate::model::NodeId;
use crate::state::{ExecutionState, NodeResult};

/// Everything a reviewer sees. `state` is a snapshot copy; mutating it does
/// not affect the live execution.
pub struct ReviewRequest<'a> {
    pub node: &'a Node,
    pub result: &'a NodeResult,
    pub state: ExecutionState,
    pub config: &'a ReviewConfig,
    pub workflow: &'a Workflow,
}

/// Outcome of a review.
#[derive(Debug, Clone)]
pub enum ReviewDecision {
    /// Continue, optionally merging a context patch first.
    Approve { patch: Option<HashMap<String, Value>> },
    /// Terminate the execution as rejected.
    Reject { reason: String },
    /// Move the cursor to an earlier node. When the target is a Standard
    /// node, `edited_prompt` replaces its prompt for the next visit only.
    Backtrack {
        target: NodeId,
        reason: String,
        edited_prompt: Option<String>,
    },
}

#[async_trait]
pub trait ReviewHandler: Send + Sync {
    async fn review(&self, request: ReviewRequest<'_>) -> Result<ReviewDecision>;
}

/// Non-interactive handler approving everything; makes the review processor
/// a no-op.
pub struct AutoApprove;

#[async_trait]
impl ReviewHandler for AutoApprove {
    async fn review(&self, _request: ReviewRequest<'_>) -> Result<ReviewDecision> {
        Ok(ReviewDecision::Approve { patch: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auto_approve() {
        use crate::model::node::{EndNode, ExitStatus};

        let node = Node::End(EndNode {
            id: "end".to_string(),
            exit_status: ExitStatus::Success,
            transition_rules: vec![],
            rubric_id: None,
        });
        let workflow = Workflow {
            id: "wf".to_string(),
            version: "1".to_string(),
            metadata: Default::default(),
            agents: Default::default(),
            rubrics: Default::default(),
            nodes: [("end".to_string(), node.clone())].into(),
            start_node: "end".to_string(),
            config: None,
        };
        let config = ReviewConfig {
            mode: crate::model::node::ReviewMode::Required,
            instructions: None,
        };
        let result = NodeResult::success("x");

        let decision = AutoApprove
            .review(ReviewRequest {
                node: &node,
                result: &result,
                state: ExecutionState::new("wf", "end"),
                config: &config,
                workflow: &workflow,
            })
            .await
            .unwrap();

        assert!(matches!(decision, ReviewDecision::Approve { patch: None }));
    }
}

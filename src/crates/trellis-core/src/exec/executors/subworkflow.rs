//! Sub-workflow executor
//!
//! Looks the child workflow up under the same tenant, runs it with the input
//! field mapping applied to a fresh state, and folds the child's terminal
//! result into the parent. A child `Failure` or `Rejected` surfaces as this
//! node's Failure result, routable by the parent's transition rules.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::exec::context::{ExecutionContext, MAX_SUBWORKFLOW_DEPTH};
use crate::exec::driver::{drive, ExecutionResult};
use crate::model::node::{ExitStatus, SubWorkflowNode};
use crate::state::{ExecutionState, NodeResult};

pub async fn execute(
    ctx: &ExecutionContext,
    node: &SubWorkflowNode,
    state: &mut ExecutionState,
) -> Result<NodeResult> {
    if ctx.depth >= MAX_SUBWORKFLOW_DEPTH {
        return Ok(NodeResult::failure(format!(
            "Sub-workflow nesting exceeds depth {MAX_SUBWORKFLOW_DEPTH}"
        )));
    }

    let child = match ctx.workflows.get(&ctx.tenant, &node.workflow_id).await? {
        Some(child) => Arc::new(child),
        None => {
            return Ok(NodeResult::failure(format!(
                "Sub-workflow '{}' not found",
                node.workflow_id
            )))
        }
    };

    let mut child_state = ExecutionState::new(child.id.clone(), child.start_node.clone());
    for (parent_key, child_key) in &node.input_mapping {
        if let Some(value) = state.context.get(parent_key) {
            child_state.context.insert(child_key.clone(), value.clone());
        }
    }

    let child_ctx = ctx.for_sub_workflow(child, &node.id);
    debug!(
        node = %node.id,
        child = %node.workflow_id,
        depth = child_ctx.depth,
        "entering sub-workflow"
    );
    let outcome = drive(&child_ctx, &mut child_state).await;

    match outcome {
        ExecutionResult::Completed { state: final_state, exit_status } => {
            if exit_status != ExitStatus::Success {
                return Ok(NodeResult::failure(format!(
                    "Sub-workflow '{}' exited with {:?}",
                    node.workflow_id, exit_status
                )));
            }
            for (child_key, parent_key) in &node.output_mapping {
                if let Some(value) = final_state.context.get(child_key) {
                    state.context.insert(parent_key.clone(), value.clone());
                }
            }
            let visible: serde_json::Map<String, Value> = final_state
                .context
                .iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Ok(NodeResult::success(json!(visible)))
        }
        ExecutionResult::Failed { error, .. } => Ok(NodeResult::failure(format!(
            "Sub-workflow '{}' failed: {error}",
            node.workflow_id
        ))),
        ExecutionResult::Rejected { reason, .. } => Ok(NodeResult::failure(format!(
            "Sub-workflow '{}' rejected: {reason}",
            node.workflow_id
        ))),
        ExecutionResult::Paused { .. } => Ok(NodeResult::failure(format!(
            "Sub-workflow '{}' paused; pausing is not supported below the root",
            node.workflow_id
        ))),
        ExecutionResult::Cancelled { .. } => Ok(NodeResult::failure(format!(
            "Sub-workflow '{}' was cancelled",
            node.workflow_id
        ))),
    }
}

//! Action node executor
//!
//! Runs the node's actions in order. `Send` resolves template placeholders
//! in the payload and dispatches to the registered handler; `Execute` looks
//! the command up in the command registry and spawns it locally. The
//! server-side variant of this executor is the same code with
//! `allow_local_exec` off: `Execute` is rejected outright, and MCP-bound
//! sends go through the handler registered under the `mcp` id.

use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::actions::{run_command, ActionError};
use crate::error::Result;
use crate::exec::context::ExecutionContext;
use crate::model::node::{Action, ActionNode};
use crate::state::{ExecutionState, NodeResult};

pub async fn execute(
    ctx: &ExecutionContext,
    node: &ActionNode,
    state: &mut ExecutionState,
) -> Result<NodeResult> {
    let mut outputs: Vec<Value> = Vec::with_capacity(node.actions.len());

    for action in &node.actions {
        match action {
            Action::Send { handler, payload } => {
                let Some(action_handler) = ctx.actions.get(handler) else {
                    return Ok(NodeResult::failure(format!(
                        "Unknown action handler '{handler}'"
                    )));
                };
                let resolved: HashMap<String, Value> = payload
                    .iter()
                    .map(|(k, v)| (k.clone(), crate::template::resolve_value(v, &state.context)))
                    .collect();
                debug!(node = %node.id, handler = %handler, "dispatching send action");
                match action_handler.execute(&resolved, &state.context).await {
                    Ok(value) => outputs.push(value),
                    Err(err) => return Ok(NodeResult::failure(err.to_string())),
                }
            }
            Action::Execute { command } => {
                if !ctx.allow_local_exec {
                    return Ok(NodeResult::failure(
                        ActionError::ExecuteForbidden.to_string(),
                    ));
                }
                let Some(spec) = ctx.commands.get(command) else {
                    return Ok(NodeResult::failure(format!("Unknown command '{command}'")));
                };
                let resolved = crate::template::resolve(&spec.command, &state.context);
                debug!(node = %node.id, command = %command, "running execute action");
                match run_command(spec, &resolved).await {
                    Ok(output) => outputs.push(Value::String(output)),
                    Err(err) => return Ok(NodeResult::failure(err.to_string())),
                }
            }
        }
    }

    Ok(NodeResult::success(json!(outputs)))
}

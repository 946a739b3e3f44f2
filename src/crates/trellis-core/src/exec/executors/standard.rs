//! Standard node executor
//!
//! Resolves the prompt against the context and delegates to the configured
//! agent, retrying transient failures per the agent's retry budget. Nodes
//! with a `planningConfig` run a plan instead: static or planner-generated,
//! optionally pausing for human approval before execution.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::{EventKind, ExecutionEvent};
use crate::exec::context::ExecutionContext;
use crate::model::agent::AgentConfig;
use crate::model::node::{PlanningConfig, PlanningMode, StandardNode};
use crate::plan::{Plan, PlanExecutor};
use crate::retry::RetryPolicy;
use crate::state::{keys, ExecutionState, NodeResult};

pub async fn execute(
    ctx: &ExecutionContext,
    node: &StandardNode,
    state: &mut ExecutionState,
) -> Result<NodeResult> {
    if let Some(planning) = &node.planning_config {
        return execute_plan(ctx, node, planning, state).await;
    }

    // A review backtrack may have staged a one-shot prompt override.
    let edited_key = keys::edited_prompt(&node.id);
    let template = match state.context.remove(&edited_key) {
        Some(Value::String(edited)) => edited,
        Some(other) => other.to_string(),
        None => node.prompt.clone(),
    };
    let prompt = crate::template::resolve(&template, &state.context);

    let Some(agent) = ctx.agents.get(&node.agent_id) else {
        return Ok(NodeResult::failure(format!(
            "Agent '{}' is not registered",
            node.agent_id
        )));
    };
    let config = ctx
        .workflow
        .agents
        .get(&node.agent_id)
        .cloned()
        .unwrap_or_default();

    let policy = RetryPolicy::new(config.max_retries);
    let mut attempt = 0u32;
    loop {
        match call_agent(&*agent, &prompt, state, &config).await {
            Ok(text) => return Ok(NodeResult::success(text)),
            Err(err) if err.is_transient() && policy.should_retry(attempt) => {
                let delay = policy.delay(attempt);
                warn!(
                    node = %node.id,
                    agent = %node.agent_id,
                    attempt,
                    error = %err,
                    "transient agent failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Ok(NodeResult::failure(err.to_string())),
        }
    }
}

async fn call_agent(
    agent: &dyn crate::agent::Agent,
    prompt: &str,
    state: &ExecutionState,
    config: &AgentConfig,
) -> std::result::Result<String, crate::agent::AgentError> {
    let call = agent.execute(prompt, &state.context);
    let response = match config.timeout {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), call)
            .await
            .map_err(|_| crate::agent::AgentError::Timeout)??,
        None => call.await?,
    };
    Ok(response.text)
}

async fn execute_plan(
    ctx: &ExecutionContext,
    node: &StandardNode,
    planning: &PlanningConfig,
    state: &mut ExecutionState,
) -> Result<NodeResult> {
    // A resume request marks the staged plan approved; consume both keys.
    let approved = state
        .context
        .remove(keys::PLAN_APPROVED)
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let staged: Option<Plan> = state
        .context
        .remove(keys::PENDING_PLAN)
        .and_then(|v| serde_json::from_value(v).ok());

    let plan = match staged {
        Some(plan) if approved => plan,
        _ => {
            let plan = match planning.mode {
                PlanningMode::Static => match &node.static_plan {
                    Some(plan) => plan.clone(),
                    None => {
                        return Ok(NodeResult::failure(format!(
                            "Node '{}' requires a static plan but none is defined",
                            node.id
                        )))
                    }
                },
                PlanningMode::Dynamic => {
                    let Some(planner) = &ctx.planner else {
                        return Ok(NodeResult::failure(
                            "Dynamic planning requested but no planner is configured",
                        ));
                    };
                    let prompt = crate::template::resolve(&node.prompt, &state.context);
                    match planner
                        .plan(&prompt, &ctx.tools.descriptors(), &state.context)
                        .await
                    {
                        Ok(plan) => plan,
                        Err(err) => {
                            return Ok(NodeResult::failure(format!("Planning failed: {err}")))
                        }
                    }
                }
            };

            ctx.events.publish(ExecutionEvent::new(
                &ctx.execution_id,
                &ctx.workflow.id,
                ctx.tenant.as_str(),
                EventKind::PlanCreated {
                    plan_id: plan.id.clone(),
                    total_steps: plan.steps.len(),
                },
            ));

            if planning.review_before_execute {
                debug!(node = %node.id, plan = %plan.id, "plan staged for review");
                state.set(keys::PENDING_PLAN, serde_json::to_value(&plan)?);
                return Ok(NodeResult::pending()
                    .with_metadata(keys::PLAN_REVIEW_REQUIRED, true));
            }
            plan
        }
    };

    let executor = PlanExecutor::new(ctx.tool_invoker.clone());
    let report = executor.run(&plan, &state.context).await;

    if report.succeeded {
        ctx.events.publish(ExecutionEvent::new(
            &ctx.execution_id,
            &ctx.workflow.id,
            ctx.tenant.as_str(),
            EventKind::PlanCompleted {
                plan_id: plan.id.clone(),
            },
        ));
        Ok(NodeResult::success(json!(report)))
    } else {
        let mut result = NodeResult::failure("Plan execution failed");
        result.output = Some(json!(report));
        if let Some(target) = &planning.plan_failure_target {
            result = result.with_metadata(keys::PLAN_FAILURE_TARGET, target.clone());
        }
        Ok(result)
    }
}

//! Plans and plan execution
//!
//! A standard node with a `planningConfig` does not call its agent directly.
//! It obtains a [`Plan`] (the node's static plan, or one produced by a
//! [`Planner`] over the registered tools) and runs each step through the
//! [`PlanExecutor`]. When `reviewBeforeExecute` is set the plan is staged and
//! the execution pauses for human approval instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::state::Context;
use crate::tools::{ToolDescriptor, ToolInvoker};

/// An ordered list of tool invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            steps,
        }
    }
}

/// One tool call within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub args: HashMap<String, Value>,
    #[serde(default)]
    pub description: String,
}

/// Produces a plan for a prompt given the available tools.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        prompt: &str,
        tools: &[ToolDescriptor],
        context: &Context,
    ) -> Result<Plan>;
}

/// Outcome of running a full plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRunReport {
    pub plan_id: String,
    pub steps: Vec<PlanStepResult>,
    pub succeeded: bool,
}

/// Outcome of one plan step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStepResult {
    pub step_id: String,
    pub tool: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs plan steps in order through a [`ToolInvoker`], stopping at the first
/// failure.
pub struct PlanExecutor {
    invoker: Arc<dyn ToolInvoker>,
}

impl PlanExecutor {
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self { invoker }
    }

    pub async fn run(&self, plan: &Plan, context: &Context) -> PlanRunReport {
        let mut steps = Vec::with_capacity(plan.steps.len());
        let mut succeeded = true;

        for step in &plan.steps {
            let args: HashMap<String, Value> = step
                .args
                .iter()
                .map(|(k, v)| (k.clone(), crate::template::resolve_value(v, context)))
                .collect();

            debug!(step = %step.id, tool = %step.tool, "executing plan step");
            match self.invoker.invoke(&step.tool, &args).await {
                Ok(output) => steps.push(PlanStepResult {
                    step_id: step.id.clone(),
                    tool: step.tool.clone(),
                    succeeded: true,
                    output: Some(output),
                    error: None,
                }),
                Err(err) => {
                    warn!(step = %step.id, tool = %step.tool, error = %err, "plan step failed");
                    steps.push(PlanStepResult {
                        step_id: step.id.clone(),
                        tool: step.tool.clone(),
                        succeeded: false,
                        output: None,
                        error: Some(err.to_string()),
                    });
                    succeeded = false;
                    break;
                }
            }
        }

        PlanRunReport {
            plan_id: plan.id.clone(),
            steps,
            succeeded,
        }
    }
}

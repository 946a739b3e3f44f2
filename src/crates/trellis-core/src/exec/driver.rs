//! Graph driver
//!
//! The step loop: look up the cursor node, fire the checkpoint observer, run
//! the pre-pipeline, dispatch the node executor, run the post-pipeline, and
//! iterate until a terminal result. Cancellation is polled once per
//! iteration; a step budget derived from the workflow bounds runaway loops.

use futures::future::BoxFuture;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::events::{EventKind, ExecutionEvent};
use crate::exec::context::ExecutionContext;
use crate::exec::executors::execute_node;
use crate::exec::pipeline::{run_post_pipeline, run_pre_pipeline, PipelineOutcome};
use crate::model::node::{ExitStatus, Node};
use crate::state::{keys, ExecutionState, NodeStatus};

/// Minimum step budget regardless of workflow size.
const MIN_STEP_BUDGET: u64 = 64;

/// Terminal result of a driver run.
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    Completed {
        state: ExecutionState,
        exit_status: ExitStatus,
    },
    Rejected {
        reason: String,
        state: ExecutionState,
    },
    Failed {
        state: ExecutionState,
        error: String,
    },
    Paused {
        state: ExecutionState,
    },
    Cancelled {
        state: ExecutionState,
    },
}

impl ExecutionResult {
    pub fn state(&self) -> &ExecutionState {
        match self {
            ExecutionResult::Completed { state, .. }
            | ExecutionResult::Rejected { state, .. }
            | ExecutionResult::Failed { state, .. }
            | ExecutionResult::Paused { state }
            | ExecutionResult::Cancelled { state } => state,
        }
    }

    /// Short status label for logs and the API.
    pub fn status_label(&self) -> &'static str {
        match self {
            ExecutionResult::Completed { exit_status, .. } => match exit_status {
                ExitStatus::Success => "COMPLETED",
                ExitStatus::Failure => "FAILED",
                ExitStatus::Cancel => "CANCELLED",
            },
            ExecutionResult::Rejected { .. } => "REJECTED",
            ExecutionResult::Failed { .. } => "FAILED",
            ExecutionResult::Paused { .. } => "PAUSED",
            ExecutionResult::Cancelled { .. } => "CANCELLED",
        }
    }
}

/// Drive `state` through `ctx.workflow` until a terminal result.
///
/// Boxed so the sub-workflow executor can recurse through it.
pub fn drive<'a>(
    ctx: &'a ExecutionContext,
    state: &'a mut ExecutionState,
) -> BoxFuture<'a, ExecutionResult> {
    Box::pin(drive_inner(ctx, state))
}

async fn drive_inner(ctx: &ExecutionContext, state: &mut ExecutionState) -> ExecutionResult {
    let workflow = &ctx.workflow;
    let step_budget = step_budget(workflow.nodes.len() as u64, workflow.max_retry_cap() as u64);
    let deadline = workflow
        .config
        .as_ref()
        .and_then(|c| c.max_execution_time)
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let emit_steps = workflow
        .config
        .as_ref()
        .map_or(true, |c| c.emit_step_events);
    let checkpoint_every_step = workflow
        .config
        .as_ref()
        .is_some_and(|c| c.checkpoint_every_step);

    let mut steps_taken: u64 = 0;

    info!(
        execution = %ctx.execution_id,
        workflow = %workflow.id,
        start = %state.current_node,
        "driver started"
    );

    loop {
        if ctx.cancel.is_cancelled() {
            return self::cancelled(ctx, state).await;
        }
        if steps_taken >= step_budget {
            return budget_exceeded(ctx, state, format!("step budget of {step_budget} exhausted"));
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return budget_exceeded(ctx, state, "maxExecutionTime exceeded".to_string());
            }
        }

        let node_id = state.current_node.clone();
        let Some(node) = workflow.node(&node_id) else {
            return failed(ctx, state, EngineError::UnknownNode(node_id).to_string());
        };

        // End nodes terminate without a body or a history step.
        if let Node::End(end) = node {
            let exit_status = end.exit_status;
            info!(execution = %ctx.execution_id, node = %node_id, ?exit_status, "workflow completed");
            ctx.events.publish(ExecutionEvent::new(
                &ctx.execution_id,
                &workflow.id,
                ctx.tenant.as_str(),
                EventKind::Completed { exit_status },
            ));
            return ExecutionResult::Completed {
                state: state.clone(),
                exit_status,
            };
        }

        // Stable persistence point: the about-to-execute state.
        state.rubric_evaluation = None;
        ctx.observer.on_checkpoint(state);
        if checkpoint_every_step {
            if let Err(err) = ctx.snapshots.save(&ctx.tenant, &ctx.execution_id, state).await {
                return failed(ctx, state, EngineError::Store(err).to_string());
            }
        }

        if let PipelineOutcome::Terminal(terminal) = run_pre_pipeline(ctx, node, state).await {
            return publish_terminal(ctx, terminal);
        }

        if emit_steps {
            ctx.events.publish(ExecutionEvent::new(
                &ctx.execution_id,
                &workflow.id,
                ctx.tenant.as_str(),
                EventKind::StepStarted {
                    node_id: node_id.clone(),
                },
            ));
        }

        debug!(execution = %ctx.execution_id, node = %node_id, kind = node.kind(), "executing node");
        let result = match execute_node(ctx, node, state).await {
            Ok(result) => result,
            Err(err) => {
                // Executor-level errors are aborting (persistence and the
                // like); routable failures come back as Failure results.
                return failed(ctx, state, err.to_string());
            }
        };

        // A pending result with the review marker pauses the execution.
        if result.status == NodeStatus::Pending
            && result
                .metadata
                .get(keys::PLAN_REVIEW_REQUIRED)
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false)
        {
            if let Err(err) = ctx.snapshots.save(&ctx.tenant, &ctx.execution_id, state).await {
                return failed(ctx, state, EngineError::Store(err).to_string());
            }
            ctx.observer.on_paused(state);
            warn!(execution = %ctx.execution_id, node = %node_id, "execution paused for plan review");
            ctx.events.publish(ExecutionEvent::new(
                &ctx.execution_id,
                &workflow.id,
                ctx.tenant.as_str(),
                EventKind::Paused {
                    node_id: node_id.clone(),
                },
            ));
            return ExecutionResult::Paused {
                state: state.clone(),
            };
        }

        match run_post_pipeline(ctx, node, state, &result).await {
            PipelineOutcome::Terminal(terminal) => return publish_terminal(ctx, terminal),
            PipelineOutcome::Continue => {}
        }

        if emit_steps {
            ctx.events.publish(ExecutionEvent::new(
                &ctx.execution_id,
                &workflow.id,
                ctx.tenant.as_str(),
                EventKind::StepCompleted {
                    node_id: node_id.clone(),
                    status: format!("{:?}", result.status),
                },
            ));
        }

        steps_taken += 1;
    }
}

fn step_budget(node_count: u64, max_retry_cap: u64) -> u64 {
    MIN_STEP_BUDGET.max(4 * node_count.max(1) * (1 + max_retry_cap))
}

async fn cancelled(ctx: &ExecutionContext, state: &mut ExecutionState) -> ExecutionResult {
    warn!(execution = %ctx.execution_id, "execution cancelled");
    ctx.forks.abort_all();
    if let Err(err) = ctx.snapshots.save(&ctx.tenant, &ctx.execution_id, state).await {
        error!(execution = %ctx.execution_id, error = %err, "failed to snapshot on cancel");
    }
    ctx.events.publish(ExecutionEvent::new(
        &ctx.execution_id,
        &ctx.workflow.id,
        ctx.tenant.as_str(),
        EventKind::Completed {
            exit_status: ExitStatus::Cancel,
        },
    ));
    ExecutionResult::Cancelled {
        state: state.clone(),
    }
}

fn budget_exceeded(
    ctx: &ExecutionContext,
    state: &ExecutionState,
    detail: String,
) -> ExecutionResult {
    failed(ctx, state, EngineError::BudgetExceeded(detail).to_string())
}

fn failed(ctx: &ExecutionContext, state: &ExecutionState, error: String) -> ExecutionResult {
    error!(execution = %ctx.execution_id, error = %error, "execution failed");
    ctx.events.publish(ExecutionEvent::new(
        &ctx.execution_id,
        &ctx.workflow.id,
        ctx.tenant.as_str(),
        EventKind::Error {
            message: error.clone(),
        },
    ));
    ExecutionResult::Failed {
        state: state.clone(),
        error,
    }
}

fn publish_terminal(ctx: &ExecutionContext, terminal: ExecutionResult) -> ExecutionResult {
    match &terminal {
        ExecutionResult::Failed { error, .. } => {
            error!(execution = %ctx.execution_id, error = %error, "execution failed");
            ctx.events.publish(ExecutionEvent::new(
                &ctx.execution_id,
                &ctx.workflow.id,
                ctx.tenant.as_str(),
                EventKind::Error {
                    message: error.clone(),
                },
            ));
        }
        ExecutionResult::Rejected { reason, .. } => {
            warn!(execution = %ctx.execution_id, reason = %reason, "execution rejected");
            ctx.events.publish(ExecutionEvent::new(
                &ctx.execution_id,
                &ctx.workflow.id,
                ctx.tenant.as_str(),
                EventKind::Error {
                    message: format!("rejected: {reason}"),
                },
            ));
        }
        _ => {}
    }
    terminal
}

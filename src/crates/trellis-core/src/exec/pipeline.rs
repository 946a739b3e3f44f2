//! Post-execution pipeline
//!
//! Processors run strictly in order (output extraction, history, human
//! review, rubric evaluation, transition resolution), short-circuiting on
//! the first terminal result. Processors may redirect the cursor; the
//! transition processor never overrides a redirect made earlier in the same
//! pass.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::exec::context::ExecutionContext;
use crate::exec::driver::ExecutionResult;
use crate::model::node::Node;
use crate::model::TransitionRule;
use crate::review::{ReviewDecision, ReviewRequest};
use crate::state::{keys, BacktrackEvent, BacktrackType, ExecutionState, NodeResult, NodeStatus};
use crate::validation::validate_output;

/// Same-node rubric retries allowed before the minor band gives up.
const MINOR_RETRY_LIMIT: u64 = 3;

/// What a processor decided.
pub enum PipelineOutcome {
    /// Keep going: next processor, or next driver iteration.
    Continue,
    /// Stop the execution with this result.
    Terminal(ExecutionResult),
}

/// Outcome of the review and rubric processors, which may move the cursor.
/// A redirect suppresses transition resolution for the rest of the pass,
/// even when it targets the current node as a self-retry does.
enum StepOutcome {
    Continue,
    Redirected,
    Terminal(ExecutionResult),
}

/// Pre-execution pipeline. Currently carries no processors; the hook exists
/// so input guards can be added without touching the driver.
pub async fn run_pre_pipeline(
    _ctx: &ExecutionContext,
    _node: &Node,
    _state: &mut ExecutionState,
) -> PipelineOutcome {
    PipelineOutcome::Continue
}

/// Run the ordered post-execution processors.
pub async fn run_post_pipeline(
    ctx: &ExecutionContext,
    node: &Node,
    state: &mut ExecutionState,
    result: &NodeResult,
) -> PipelineOutcome {
    if let PipelineOutcome::Terminal(terminal) = extract_output(node, state, result) {
        return PipelineOutcome::Terminal(terminal);
    }

    state.history.record_step(node.id(), result.clone());

    let mut redirected = false;

    match review(ctx, node, state, result).await {
        StepOutcome::Terminal(terminal) => return PipelineOutcome::Terminal(terminal),
        StepOutcome::Redirected => redirected = true,
        StepOutcome::Continue => {}
    }

    match evaluate_rubric(ctx, node, state, result).await {
        StepOutcome::Terminal(terminal) => return PipelineOutcome::Terminal(terminal),
        StepOutcome::Redirected => redirected = true,
        StepOutcome::Continue => {}
    }

    if redirected {
        return PipelineOutcome::Continue;
    }
    resolve_transition(node, state, result)
}

/// Move the cursor, resetting retry counters when entering a different node.
fn redirect(state: &mut ExecutionState, from: &str, target: &str) {
    if from != target {
        state.reset_retry_counters(target);
    }
    state.current_node = target.to_string();
}

// ---------------------------------------------------------------------------
// 1. Output extraction
// ---------------------------------------------------------------------------

fn extract_output(node: &Node, state: &mut ExecutionState, result: &NodeResult) -> PipelineOutcome {
    let Some(output) = &result.output else {
        return PipelineOutcome::Continue;
    };
    let text = result.output_text().unwrap_or_default();

    if let Err(violation) = validate_output(&text) {
        return PipelineOutcome::Terminal(ExecutionResult::Failed {
            error: EngineError::output_validation(node.id(), violation.to_string()).to_string(),
            state: state.clone(),
        });
    }

    state.context.insert(node.id().to_string(), output.clone());

    if let Node::Standard(standard) = node {
        if !standard.output_params.is_empty() {
            match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => {
                    for param in &standard.output_params {
                        if let Some(value) = map.get(param) {
                            state.context.insert(param.clone(), value.clone());
                        }
                    }
                }
                Ok(_) => {
                    warn!(node = %standard.id, "output is JSON but not an object; skipping outputParams");
                }
                Err(err) => {
                    warn!(node = %standard.id, error = %err, "output is not valid JSON; skipping outputParams");
                }
            }
        }
    }

    PipelineOutcome::Continue
}

// ---------------------------------------------------------------------------
// 3. Human review
// ---------------------------------------------------------------------------

async fn review(
    ctx: &ExecutionContext,
    node: &Node,
    state: &mut ExecutionState,
    result: &NodeResult,
) -> StepOutcome {
    let Some(config) = node.review_config() else {
        return StepOutcome::Continue;
    };
    let applies = match config.mode {
        crate::model::node::ReviewMode::Off => false,
        crate::model::node::ReviewMode::Required => true,
        crate::model::node::ReviewMode::Optional => !result.is_success(),
    };
    if !applies {
        return StepOutcome::Continue;
    }

    let request = ReviewRequest {
        node,
        result,
        state: state.clone(),
        config,
        workflow: &ctx.workflow,
    };
    let decision = match ctx.review.review(request).await {
        Ok(decision) => decision,
        Err(err) => {
            return StepOutcome::Terminal(ExecutionResult::Failed {
                error: format!("Review handler failed: {err}"),
                state: state.clone(),
            })
        }
    };

    match decision {
        ReviewDecision::Approve { patch } => {
            if let Some(patch) = patch {
                state.context.extend(patch);
            }
            StepOutcome::Continue
        }
        ReviewDecision::Reject { reason } => StepOutcome::Terminal(ExecutionResult::Rejected {
            reason,
            state: state.clone(),
        }),
        ReviewDecision::Backtrack {
            target,
            reason,
            edited_prompt,
        } => {
            if !ctx.workflow.nodes.contains_key(&target) {
                return StepOutcome::Terminal(ExecutionResult::Failed {
                    error: format!("Review backtrack targets unknown node '{target}'"),
                    state: state.clone(),
                });
            }
            if let Some(prompt) = edited_prompt {
                if matches!(ctx.workflow.node(&target), Some(Node::Standard(_))) {
                    state.set(keys::edited_prompt(&target), Value::String(prompt));
                }
            }
            state.history.record_backtrack(BacktrackEvent {
                from: node.id().to_string(),
                to: target.clone(),
                reason,
                backtrack_type: BacktrackType::Manual,
                rubric_score: None,
                timestamp: chrono::Utc::now(),
            });
            redirect(state, node.id(), &target);
            StepOutcome::Redirected
        }
    }
}

// ---------------------------------------------------------------------------
// 4. Rubric evaluation and auto-backtrack
// ---------------------------------------------------------------------------

async fn evaluate_rubric(
    ctx: &ExecutionContext,
    node: &Node,
    state: &mut ExecutionState,
    result: &NodeResult,
) -> StepOutcome {
    let Some(rubric_id) = node.rubric_id() else {
        return StepOutcome::Continue;
    };

    if !ctx.rubrics.contains(rubric_id) {
        let Some(source) = ctx.workflow.rubrics.get(rubric_id) else {
            return StepOutcome::Terminal(ExecutionResult::Failed {
                error: EngineError::RubricMissing(rubric_id.to_string()).to_string(),
                state: state.clone(),
            });
        };
        if let Err(err) = ctx.rubrics.ensure_loaded(rubric_id, source) {
            return StepOutcome::Terminal(ExecutionResult::Failed {
                error: err.to_string(),
                state: state.clone(),
            });
        }
    }

    let evaluation = match ctx.rubrics.evaluate(rubric_id, result, &state.context).await {
        Ok(evaluation) => evaluation,
        Err(err) => {
            return StepOutcome::Terminal(ExecutionResult::Failed {
                error: err.to_string(),
                state: state.clone(),
            })
        }
    };

    debug!(
        node = %node.id(),
        rubric = rubric_id,
        score = evaluation.score,
        passed = evaluation.passed,
        "rubric evaluated"
    );
    state.rubric_evaluation = Some(evaluation.clone());

    if evaluation.passed {
        return StepOutcome::Continue;
    }

    // A user-authored Score rule matching this score takes precedence over
    // any automatic backtracking.
    let user_routed = node
        .transition_rules()
        .iter()
        .any(|rule| rule.matching_score_target(evaluation.score).is_some());
    if user_routed {
        return StepOutcome::Continue;
    }

    let score = evaluation.score;
    let (target, reason) = if score < 30.0 {
        // Critical: restart from the earliest rubric-gated step.
        let target = earliest_rubric_step(ctx, state)
            .unwrap_or_else(|| ctx.workflow.start_node.clone());
        state.set(
            keys::FAILED_CRITERIA,
            Value::from(evaluation.failed_criteria.clone()),
        );
        if !evaluation.suggestions.is_empty() {
            state.set(
                keys::RECOMMENDATIONS,
                Value::from(evaluation.suggestions.clone()),
            );
        }
        (target, format!("Critical rubric failure: {score:.1}"))
    } else if score < 60.0 {
        // Moderate: revisit the most recent differently-gated step.
        let Some(target) = latest_other_rubric_step(ctx, state, rubric_id) else {
            return StepOutcome::Continue;
        };
        state.set(
            keys::IMPROVEMENT_SUGGESTIONS,
            Value::from(evaluation.suggestions.clone()),
        );
        (target, format!("Moderate rubric failure: {score:.1}"))
    } else if score < 80.0 {
        // Minor: retry this node, bounded by the attempt counter.
        let attempts = state
            .context
            .get(keys::RETRY_ATTEMPT)
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if attempts >= MINOR_RETRY_LIMIT {
            debug!(node = %node.id(), attempts, "minor rubric retry limit reached");
            return StepOutcome::Continue;
        }
        state.set(keys::RETRY_ATTEMPT, Value::from(attempts + 1));
        if !evaluation.suggestions.is_empty() {
            state.set(
                keys::IMPROVEMENT_SUGGESTIONS,
                Value::from(evaluation.suggestions.clone()),
            );
        }
        (
            node.id().to_string(),
            format!("Minor rubric failure: {score:.1}"),
        )
    } else {
        // Failed above 80 (threshold or required criterion): defer to
        // transition rules.
        return StepOutcome::Continue;
    };

    state.set(keys::BACKTRACK_REASON, Value::String(reason.clone()));
    state.history.record_backtrack(BacktrackEvent {
        from: node.id().to_string(),
        to: target.clone(),
        reason,
        backtrack_type: BacktrackType::Automatic,
        rubric_score: Some(score),
        timestamp: chrono::Utc::now(),
    });
    redirect(state, node.id(), &target);
    StepOutcome::Redirected
}

/// Earliest prior step whose node carries a rubric. The step just recorded
/// for the current node is excluded.
fn earliest_rubric_step(ctx: &ExecutionContext, state: &ExecutionState) -> Option<String> {
    let prior = state.history.steps.split_last().map(|(_, rest)| rest)?;
    prior
        .iter()
        .find(|step| {
            ctx.workflow
                .node(&step.node_id)
                .is_some_and(|n| n.rubric_id().is_some())
        })
        .map(|step| step.node_id.clone())
}

/// Most recent prior step whose node carries a rubric different from
/// `current_rubric`.
fn latest_other_rubric_step(
    ctx: &ExecutionContext,
    state: &ExecutionState,
    current_rubric: &str,
) -> Option<String> {
    let prior = state.history.steps.split_last().map(|(_, rest)| rest)?;
    prior
        .iter()
        .rev()
        .find(|step| {
            ctx.workflow
                .node(&step.node_id)
                .and_then(|n| n.rubric_id())
                .is_some_and(|r| r != current_rubric)
        })
        .map(|step| step.node_id.clone())
}

// ---------------------------------------------------------------------------
// 5. Transition resolution
// ---------------------------------------------------------------------------

fn resolve_transition(
    node: &Node,
    state: &mut ExecutionState,
    result: &NodeResult,
) -> PipelineOutcome {
    // A prior processor already moved the cursor; do not override.
    if state.current_node != node.id() {
        return PipelineOutcome::Continue;
    }

    if let Some(target) = state.loop_break_target.take() {
        redirect(state, node.id(), &target);
        return PipelineOutcome::Continue;
    }

    if matches!(node, Node::Loop(_)) {
        if let Some(target) = state
            .context
            .remove(keys::LOOP_EXIT_TARGET)
            .and_then(|v| v.as_str().map(String::from))
        {
            redirect(state, node.id(), &target);
            return PipelineOutcome::Continue;
        }
    }

    // Plan failures carry their routing target in result metadata.
    if result.status == NodeStatus::Failure {
        if let Some(target) = result
            .metadata
            .get(keys::PLAN_FAILURE_TARGET)
            .and_then(Value::as_str)
        {
            let target = target.to_string();
            redirect(state, node.id(), &target);
            return PipelineOutcome::Continue;
        }
    }

    for rule in node.transition_rules() {
        let target = match rule {
            TransitionRule::Always { target } => Some(target.clone()),
            TransitionRule::Success { target } => {
                (result.status == NodeStatus::Success).then(|| target.clone())
            }
            TransitionRule::Failure {
                max_retries,
                target,
            } => {
                if result.status == NodeStatus::Failure {
                    let count = state.bump_retry_count(node.id());
                    (count <= *max_retries).then(|| target.clone())
                } else {
                    None
                }
            }
            TransitionRule::Score { .. } => resolve_score(state)
                .and_then(|score| rule.matching_score_target(score).cloned()),
        };
        if let Some(target) = target {
            redirect(state, node.id(), &target);
            return PipelineOutcome::Continue;
        }
    }

    PipelineOutcome::Terminal(ExecutionResult::Failed {
        error: format!("No valid transition from {}", node.id()),
        state: state.clone(),
    })
}

/// Score for `Score` rules: the live rubric evaluation wins, then the
/// self-reported context keys in documented order.
fn resolve_score(state: &ExecutionState) -> Option<f64> {
    if let Some(evaluation) = &state.rubric_evaluation {
        return Some(evaluation.score);
    }
    for key in ["score", "final_score", "quality_score", "evaluation_score"] {
        if let Some(score) = state.context.get(key).and_then(Value::as_f64) {
            return Some(score);
        }
    }
    None
}

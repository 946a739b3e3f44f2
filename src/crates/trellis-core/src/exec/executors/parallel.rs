//! Parallel node executor
//!
//! Spawns one task per branch, each an independent agent invocation, then
//! evaluates the configured consensus strategy over the branch outcomes.
//! Consensus reached routes through `Success` transitions; no consensus is a
//! `Failure` result addressable by failure transitions.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::error::Result;
use crate::exec::context::ExecutionContext;
use crate::model::node::{ConsensusStrategy, ParallelNode};
use crate::state::{Context, ExecutionState, NodeResult};

const DEFAULT_THRESHOLD: f64 = 0.5;

struct BranchOutcome {
    id: String,
    weight: f64,
    outcome: std::result::Result<String, String>,
}

impl BranchOutcome {
    fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

pub async fn execute(
    ctx: &ExecutionContext,
    node: &ParallelNode,
    state: &mut ExecutionState,
) -> Result<NodeResult> {
    if node.branches.is_empty() {
        return Ok(NodeResult::failure("Parallel node has no branches"));
    }

    let mut handles = Vec::with_capacity(node.branches.len());
    for branch in &node.branches {
        let agent = ctx.agents.get(&branch.agent_id);
        let prompt = crate::template::resolve(&branch.prompt, &state.context);
        let context = state.context.clone();
        let id = branch.id.clone();
        let weight = branch.weight;
        let agent_id = branch.agent_id.clone();

        handles.push(tokio::spawn(async move {
            let outcome = match agent {
                Some(agent) => run_branch(agent, &prompt, &context).await,
                None => Err(format!("Agent '{agent_id}' is not registered")),
            };
            BranchOutcome { id, weight, outcome }
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                warn!(node = %node.id, error = %err, "parallel branch task failed");
                outcomes.push(BranchOutcome {
                    id: "<panicked>".to_string(),
                    weight: 0.0,
                    outcome: Err(format!("branch task failed: {err}")),
                });
            }
        }
    }

    let threshold = node.consensus.threshold.unwrap_or(DEFAULT_THRESHOLD);
    let (consensus, consensus_success, judge_output) = match node.consensus.strategy {
        ConsensusStrategy::MajorityVote => {
            let successes = outcomes.iter().filter(|o| o.succeeded()).count();
            let failures = outcomes.len() - successes;
            let majority = successes.max(failures) as f64 / outcomes.len() as f64;
            (majority >= threshold, successes >= failures, None)
        }
        ConsensusStrategy::WeightedVote => {
            let total: f64 = outcomes.iter().map(|o| o.weight).sum();
            let success_weight: f64 = outcomes
                .iter()
                .filter(|o| o.succeeded())
                .map(|o| o.weight)
                .sum();
            let failure_weight = total - success_weight;
            let winner_share = if total > 0.0 {
                success_weight.max(failure_weight) / total
            } else {
                0.0
            };
            (
                winner_share >= threshold,
                success_weight >= failure_weight,
                None,
            )
        }
        ConsensusStrategy::Unanimous => {
            let all_success = outcomes.iter().all(|o| o.succeeded());
            let all_failure = outcomes.iter().all(|o| !o.succeeded());
            (all_success || all_failure, all_success, None)
        }
        ConsensusStrategy::JudgeDecides => {
            match judge(ctx, node, &outcomes, &state.context).await {
                Ok((verdict, output)) => (true, verdict, Some(output)),
                Err(message) => {
                    return Ok(NodeResult::failure(message));
                }
            }
        }
    };

    let mut branch_outputs = Map::new();
    for outcome in &outcomes {
        let entry = match &outcome.outcome {
            Ok(text) => json!(text),
            Err(err) => json!({ "error": err }),
        };
        branch_outputs.insert(outcome.id.clone(), entry);
    }

    let output = json!({
        "branches": Value::Object(branch_outputs),
        "consensus": consensus && consensus_success,
    });
    debug!(
        node = %node.id,
        consensus,
        success = consensus_success,
        "parallel consensus evaluated"
    );

    if consensus && consensus_success {
        let mut result = NodeResult::success(output);
        if let Some(judge_text) = judge_output {
            result = result.with_metadata("judge_output", judge_text);
        }
        Ok(result)
    } else {
        let mut result = NodeResult::failure(if consensus {
            "Consensus reached on failure"
        } else {
            "No consensus reached"
        });
        result.output = Some(output);
        Ok(result)
    }
}

async fn run_branch(
    agent: Arc<dyn Agent>,
    prompt: &str,
    context: &Context,
) -> std::result::Result<String, String> {
    agent
        .execute(prompt, context)
        .await
        .map(|response| response.text)
        .map_err(|err| err.to_string())
}

/// Ask the judge agent to decide. Returns `(success, judge text)`.
async fn judge(
    ctx: &ExecutionContext,
    node: &ParallelNode,
    outcomes: &[BranchOutcome],
    context: &Context,
) -> std::result::Result<(bool, String), String> {
    let Some(judge_id) = &node.consensus.judge_agent else {
        return Err("JudgeDecides consensus requires a judgeAgent".to_string());
    };
    let Some(agent) = ctx.agents.get(judge_id) else {
        return Err(format!("Judge agent '{judge_id}' is not registered"));
    };

    let mut prompt = String::from(
        "You are judging candidate responses. Reply with JSON \
         {\"accept\": true|false, \"verdict\": \"...\"}.\n\n",
    );
    for outcome in outcomes {
        match &outcome.outcome {
            Ok(text) => prompt.push_str(&format!("[{}] {}\n", outcome.id, text)),
            Err(err) => prompt.push_str(&format!("[{}] <failed: {}>\n", outcome.id, err)),
        }
    }

    let response = agent
        .execute(&prompt, context)
        .await
        .map_err(|err| format!("Judge agent failed: {err}"))?;

    // Structured verdicts are preferred; any non-empty reply counts as accept.
    if let Ok(parsed) = serde_json::from_str::<Value>(&response.text) {
        if let Some(accept) = parsed.get("accept").and_then(Value::as_bool) {
            let verdict = parsed
                .get("verdict")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok((accept, verdict));
        }
    }
    Ok((!response.text.trim().is_empty(), response.text))
}

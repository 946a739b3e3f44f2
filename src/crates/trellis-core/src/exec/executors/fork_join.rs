//! Fork and Join executors
//!
//! Fork spawns one task per target node, each running a single-node sub-run
//! on a derived state snapshot, records the handles in the fork table, and
//! returns immediately. Join blocks on the recorded handles with an optional
//! deadline and merges branch outputs per its strategy, in the order the
//! fork declared its targets.

use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::Result;
use crate::exec::context::ExecutionContext;
use crate::exec::forkjoin::{ForkBranchResult, ForkJoinContext};
use crate::model::node::{ForkNode, JoinNode, MergeStrategy};
use crate::model::NodeId;
use crate::state::{ExecutionState, NodeResult};

pub async fn execute_fork(
    ctx: &ExecutionContext,
    node: &ForkNode,
    state: &mut ExecutionState,
) -> Result<NodeResult> {
    let mut handles = Vec::with_capacity(node.targets.len());

    for target in &node.targets {
        let Some(target_node) = ctx.workflow.node(target) else {
            return Ok(NodeResult::failure(format!(
                "Fork target '{target}' does not exist"
            )));
        };

        let branch_ctx = ctx.clone();
        let branch_node = target_node.clone();
        let mut branch_state = state.clone();
        let node_id = target.clone();

        let handle = tokio::spawn(async move {
            let result = match super::execute_node_boxed(&branch_ctx, &branch_node, &mut branch_state)
                .await
            {
                Ok(result) => result,
                Err(err) => NodeResult::failure(err.to_string()),
            };
            ForkBranchResult {
                node_id: branch_node.id().to_string(),
                result,
            }
        });
        handles.push((node_id, handle));
    }

    debug!(fork = %node.id, branches = handles.len(), "fork spawned branches");
    ctx.forks.insert(ForkJoinContext {
        fork_node_id: node.id.clone(),
        targets: node.targets.clone(),
        handles,
        started_at: Instant::now(),
    });

    Ok(NodeResult::success(Value::Null).with_metadata("fork_id", node.id.clone()))
}

pub async fn execute_join(
    ctx: &ExecutionContext,
    node: &JoinNode,
    state: &mut ExecutionState,
) -> Result<NodeResult> {
    let deadline = node
        .timeout_ms
        .map(|ms| Instant::now() + Duration::from_millis(ms));

    // Branch results in fork target declaration order, across all awaited
    // forks in awaitTargets order.
    let mut ordered: Vec<(NodeId, std::result::Result<NodeResult, String>)> = Vec::new();

    for fork_id in &node.await_targets {
        let Some(fork_ctx) = ctx.forks.take(fork_id) else {
            return Ok(NodeResult::failure(format!(
                "No fork context for '{fork_id}'"
            )));
        };

        let mut remaining = fork_ctx.handles;
        for (branch_id, handle) in remaining.drain(..) {
            let joined = match deadline {
                Some(deadline) => {
                    let budget = deadline.saturating_duration_since(Instant::now());
                    let abort = handle.abort_handle();
                    match tokio::time::timeout(budget, handle).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            warn!(join = %node.id, fork = %fork_id, "join timed out");
                            abort.abort();
                            ordered.push((branch_id, Err("join timed out".to_string())));
                            continue;
                        }
                    }
                }
                None => handle.await,
            };
            match joined {
                Ok(branch) => ordered.push((branch_id, Ok(branch.result))),
                Err(err) => ordered.push((branch_id, Err(format!("branch task failed: {err}")))),
            }
        }
    }

    let timed_out = ordered.iter().any(|(_, r)| {
        matches!(r, Err(message) if message == "join timed out")
    });

    match node.merge_strategy {
        MergeStrategy::CollectAll | MergeStrategy::Majority => {
            if timed_out {
                return Ok(NodeResult::failure(format!(
                    "Join '{}' timed out waiting for branches",
                    node.id
                )));
            }

            let mut entries: Vec<Value> = Vec::with_capacity(ordered.len());
            for (branch_id, outcome) in &ordered {
                match outcome {
                    Ok(result) if result.is_success() => {
                        entries.push(result.output.clone().unwrap_or(Value::Null));
                    }
                    Ok(result) => {
                        if node.fail_on_any_error {
                            return Ok(NodeResult::failure(format!(
                                "Branch '{}' failed: {}",
                                branch_id,
                                result.error.clone().unwrap_or_default()
                            )));
                        }
                        entries.push(json!({
                            "error": result.error.clone().unwrap_or_else(|| "failed".to_string())
                        }));
                    }
                    Err(message) => {
                        if node.fail_on_any_error {
                            return Ok(NodeResult::failure(format!(
                                "Branch '{}' failed: {}",
                                branch_id, message
                            )));
                        }
                        entries.push(json!({ "error": message }));
                    }
                }
            }

            let merged = match node.merge_strategy {
                MergeStrategy::Majority => {
                    let winner = majority_winner(&entries);
                    json!({ "results": entries, "winner": winner })
                }
                _ => Value::Array(entries),
            };

            state.context.insert(node.output_field.clone(), merged.clone());
            Ok(NodeResult::success(merged))
        }
        MergeStrategy::FirstSuccess => {
            let first = ordered.iter().find_map(|(_, outcome)| match outcome {
                Ok(result) if result.is_success() => result.output.clone(),
                _ => None,
            });
            match first {
                Some(output) => {
                    state
                        .context
                        .insert(node.output_field.clone(), output.clone());
                    Ok(NodeResult::success(output))
                }
                None => Ok(NodeResult::failure(format!(
                    "Join '{}' saw no successful branch",
                    node.id
                ))),
            }
        }
    }
}

/// Value shared by a strict majority of entries, if any.
fn majority_winner(entries: &[Value]) -> Value {
    for candidate in entries {
        let count = entries.iter().filter(|e| *e == candidate).count();
        if count * 2 > entries.len() {
            return candidate.clone();
        }
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, AgentRegistry, ScriptedAgent};
    use crate::model::agent::AgentConfig;
    use crate::model::node::{Node, StandardNode};
    use crate::model::workflow::Workflow;
    use crate::tenant::TenantId;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn standard(id: &str, agent: &str) -> Node {
        Node::Standard(StandardNode {
            id: id.to_string(),
            agent_id: agent.to_string(),
            prompt: "go".to_string(),
            output_params: vec![],
            transition_rules: vec![],
            rubric_id: None,
            review_config: None,
            planning_config: None,
            static_plan: None,
        })
    }

    fn fork(id: &str, targets: &[&str]) -> ForkNode {
        ForkNode {
            id: id.to_string(),
            targets: targets.iter().map(|t| t.to_string()).collect(),
            wait_for_all: true,
            transition_rules: vec![],
            rubric_id: None,
        }
    }

    fn join(await_targets: &[&str], strategy: MergeStrategy, fail_on_any_error: bool) -> JoinNode {
        JoinNode {
            id: "j".to_string(),
            await_targets: await_targets.iter().map(|t| t.to_string()).collect(),
            merge_strategy: strategy,
            output_field: "merged".to_string(),
            timeout_ms: None,
            fail_on_any_error,
            transition_rules: vec![],
            rubric_id: None,
        }
    }

    fn ctx(agents: Vec<(&str, ScriptedAgent)>, nodes: Vec<Node>) -> ExecutionContext {
        let registry = AgentRegistry::new();
        let mut agent_configs = HashMap::new();
        for (id, agent) in agents {
            registry.register(id, Arc::new(agent));
            agent_configs.insert(id.to_string(), AgentConfig::default());
        }
        let mut node_map = HashMap::new();
        for node in nodes {
            node_map.insert(node.id().to_string(), node);
        }
        let workflow = Arc::new(Workflow {
            id: "wf".to_string(),
            version: "1".to_string(),
            metadata: Default::default(),
            agents: agent_configs,
            rubrics: Default::default(),
            nodes: node_map,
            start_node: "f".to_string(),
            config: None,
        });
        ExecutionContext::builder(TenantId::new("t"), workflow)
            .agents(Arc::new(registry))
            .build()
    }

    #[tokio::test]
    async fn test_collect_all_preserves_target_order() {
        let ctx = ctx(
            vec![
                ("slow", ScriptedAgent::replying("aa")),
                ("fast", ScriptedAgent::replying("bb")),
            ],
            vec![standard("A", "slow"), standard("B", "fast")],
        );
        let mut state = ExecutionState::new("wf", "f");

        let fork_result = execute_fork(&ctx, &fork("f", &["A", "B"]), &mut state)
            .await
            .unwrap();
        assert!(fork_result.is_success());
        assert_eq!(fork_result.metadata.get("fork_id"), Some(&json!("f")));

        let join_result = execute_join(
            &ctx,
            &join(&["f"], MergeStrategy::CollectAll, true),
            &mut state,
        )
        .await
        .unwrap();
        assert!(join_result.is_success());
        assert_eq!(state.context["merged"], json!(["aa", "bb"]));
    }

    #[tokio::test]
    async fn test_fail_on_any_error() {
        let ctx = ctx(
            vec![
                ("ok", ScriptedAgent::replying("fine")),
                (
                    "down",
                    ScriptedAgent::with_script(vec![Err(AgentError::Other("dead".to_string()))]),
                ),
            ],
            vec![standard("A", "ok"), standard("B", "down")],
        );
        let mut state = ExecutionState::new("wf", "f");

        execute_fork(&ctx, &fork("f", &["A", "B"]), &mut state)
            .await
            .unwrap();
        let result = execute_join(
            &ctx,
            &join(&["f"], MergeStrategy::CollectAll, true),
            &mut state,
        )
        .await
        .unwrap();
        assert!(!result.is_success());
        assert!(state.context.get("merged").is_none());
    }

    #[tokio::test]
    async fn test_errors_tagged_when_tolerated() {
        let ctx = ctx(
            vec![
                ("ok", ScriptedAgent::replying("fine")),
                (
                    "down",
                    ScriptedAgent::with_script(vec![Err(AgentError::Other("dead".to_string()))]),
                ),
            ],
            vec![standard("A", "ok"), standard("B", "down")],
        );
        let mut state = ExecutionState::new("wf", "f");

        execute_fork(&ctx, &fork("f", &["A", "B"]), &mut state)
            .await
            .unwrap();
        let result = execute_join(
            &ctx,
            &join(&["f"], MergeStrategy::CollectAll, false),
            &mut state,
        )
        .await
        .unwrap();
        assert!(result.is_success());
        let merged = state.context["merged"].as_array().unwrap();
        assert_eq!(merged[0], json!("fine"));
        assert!(merged[1].get("error").is_some());
    }

    #[tokio::test]
    async fn test_first_success() {
        let ctx = ctx(
            vec![
                (
                    "down",
                    ScriptedAgent::with_script(vec![Err(AgentError::Other("dead".to_string()))]),
                ),
                ("ok", ScriptedAgent::replying("winner")),
            ],
            vec![standard("A", "down"), standard("B", "ok")],
        );
        let mut state = ExecutionState::new("wf", "f");

        execute_fork(&ctx, &fork("f", &["A", "B"]), &mut state)
            .await
            .unwrap();
        let result = execute_join(
            &ctx,
            &join(&["f"], MergeStrategy::FirstSuccess, false),
            &mut state,
        )
        .await
        .unwrap();
        assert!(result.is_success());
        assert_eq!(state.context["merged"], json!("winner"));
    }

    #[tokio::test]
    async fn test_join_without_fork_context_fails() {
        let ctx = ctx(vec![], vec![]);
        let mut state = ExecutionState::new("wf", "j");
        let result = execute_join(
            &ctx,
            &join(&["ghost"], MergeStrategy::CollectAll, true),
            &mut state,
        )
        .await
        .unwrap();
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_majority_declares_winner() {
        let ctx = ctx(
            vec![
                ("same", ScriptedAgent::replying("x")),
                ("other", ScriptedAgent::replying("y")),
            ],
            vec![
                standard("A", "same"),
                standard("B", "same"),
                standard("C", "other"),
            ],
        );
        let mut state = ExecutionState::new("wf", "f");

        execute_fork(&ctx, &fork("f", &["A", "B", "C"]), &mut state)
            .await
            .unwrap();
        let result = execute_join(
            &ctx,
            &join(&["f"], MergeStrategy::Majority, false),
            &mut state,
        )
        .await
        .unwrap();
        assert!(result.is_success());
        assert_eq!(state.context["merged"]["winner"], json!("x"));
    }
}

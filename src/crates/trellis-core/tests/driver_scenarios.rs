//! End-to-end driver scenarios over in-memory collaborators.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use trellis_core::agent::{AgentRegistry, ScriptedAgent};
use trellis_core::exec::{drive, ExecutionContext, ExecutionResult};
use trellis_core::model::agent::AgentConfig;
use trellis_core::model::node::{
    Branch, ConsensusConfig, ConsensusStrategy, EndNode, ExitStatus, ForkNode, JoinNode,
    MergeStrategy, Node, ParallelNode, ReviewConfig, ReviewMode, StandardNode,
};
use trellis_core::model::workflow::{Workflow, WorkflowMetadata};
use trellis_core::model::{ScoreCondition, ScoreOperator, TransitionRule};
use trellis_core::review::{ReviewDecision, ReviewHandler, ReviewRequest};
use trellis_core::state::{keys, BacktrackType, ExecutionState};
use trellis_core::store::{ExecutionStateStore, MemoryExecutionStateStore};
use trellis_core::tenant::TenantId;

fn standard(id: &str, agent: &str, prompt: &str, rules: Vec<TransitionRule>) -> Node {
    Node::Standard(StandardNode {
        id: id.to_string(),
        agent_id: agent.to_string(),
        prompt: prompt.to_string(),
        output_params: vec![],
        transition_rules: rules,
        rubric_id: None,
        review_config: None,
        planning_config: None,
        static_plan: None,
    })
}

fn end(id: &str, exit_status: ExitStatus) -> Node {
    Node::End(EndNode {
        id: id.to_string(),
        exit_status,
        transition_rules: vec![],
        rubric_id: None,
    })
}

fn success_to(target: &str) -> TransitionRule {
    TransitionRule::Success {
        target: target.to_string(),
    }
}

fn workflow(nodes: Vec<Node>, start: &str, agents: Vec<&str>) -> Workflow {
    let mut node_map = HashMap::new();
    for node in nodes {
        node_map.insert(node.id().to_string(), node);
    }
    Workflow {
        id: "wf".to_string(),
        version: "1".to_string(),
        metadata: WorkflowMetadata::default(),
        agents: agents
            .into_iter()
            .map(|id| (id.to_string(), AgentConfig::default()))
            .collect(),
        rubrics: HashMap::new(),
        nodes: node_map,
        start_node: start.to_string(),
        config: None,
    }
}

/// Rubric whose aggregate score is controlled by marker words in the output:
/// `alpha` is worth 20 points, `beta` the remaining 80.
fn marker_rubric() -> String {
    json!({
        "id": "r1",
        "name": "markers",
        "version": "1",
        "type": "test",
        "passThreshold": 80.0,
        "criteria": [
            {
                "id": "c-alpha",
                "name": "mentions alpha",
                "description": "",
                "weight": 20.0,
                "minScore": 50.0,
                "required": false,
                "evaluationType": "automated",
                "evaluationLogic": "contains:alpha"
            },
            {
                "id": "c-beta",
                "name": "mentions beta",
                "description": "",
                "weight": 80.0,
                "minScore": 50.0,
                "required": false,
                "evaluationType": "automated",
                "evaluationLogic": "contains:beta"
            }
        ]
    })
    .to_string()
}

// S1: simple linear workflow.
#[tokio::test]
async fn linear_workflow_completes() {
    let agents = AgentRegistry::new();
    agents.register("a", Arc::new(ScriptedAgent::replying("ok")));

    let wf = workflow(
        vec![
            standard("n0", "a", "hi", vec![success_to("n1")]),
            end("n1", ExitStatus::Success),
        ],
        "n0",
        vec!["a"],
    );
    wf.validate().unwrap();

    let ctx = ExecutionContext::builder(TenantId::new("t"), Arc::new(wf))
        .agents(Arc::new(agents))
        .build();
    let mut state = ExecutionState::new("wf", "n0");

    match drive(&ctx, &mut state).await {
        ExecutionResult::Completed { state, exit_status } => {
            assert_eq!(exit_status, ExitStatus::Success);
            assert_eq!(state.history.steps.len(), 1);
            assert_eq!(state.history.steps[0].node_id, "n0");
            assert!(state.history.steps[0].result.is_success());
            assert_eq!(state.context["n0"], json!("ok"));
            // Every recorded step names a real node.
            for step in &state.history.steps {
                assert!(ctx.workflow.node(&step.node_id).is_some());
            }
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

// S2: outputParams extraction.
#[tokio::test]
async fn output_params_extracted_from_json() {
    let agents = AgentRegistry::new();
    agents.register(
        "a",
        Arc::new(ScriptedAgent::replying(
            r#"{"score": 42, "reason": "meh", "extra": true}"#,
        )),
    );

    let mut wf = workflow(
        vec![
            standard("n0", "a", "hi", vec![success_to("n1")]),
            end("n1", ExitStatus::Success),
        ],
        "n0",
        vec!["a"],
    );
    if let Some(Node::Standard(n)) = wf.nodes.get_mut("n0") {
        n.output_params = vec!["score".to_string(), "reason".to_string()];
    }

    let ctx = ExecutionContext::builder(TenantId::new("t"), Arc::new(wf))
        .agents(Arc::new(agents))
        .build();
    let mut state = ExecutionState::new("wf", "n0");

    match drive(&ctx, &mut state).await {
        ExecutionResult::Completed { state, .. } => {
            assert_eq!(state.context["score"], json!(42));
            assert_eq!(state.context["reason"], json!("meh"));
            assert!(state.context.get("extra").is_none());
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

// S3: score-based routing wins over auto-backtrack.
#[tokio::test]
async fn score_transition_respects_user_routing() {
    let agents = AgentRegistry::new();
    // Output mentions only alpha, so the marker rubric scores 20.
    agents.register("a", Arc::new(ScriptedAgent::replying("alpha only")));

    let mut wf = workflow(
        vec![
            standard(
                "review",
                "a",
                "assess",
                vec![
                    TransitionRule::Score {
                        conditions: vec![
                            ScoreCondition {
                                operator: ScoreOperator::Gte,
                                value: 80.0,
                                upper: None,
                                target: "done".to_string(),
                            },
                            ScoreCondition {
                                operator: ScoreOperator::Lt,
                                value: 80.0,
                                upper: None,
                                target: "revise".to_string(),
                            },
                        ],
                    },
                ],
            ),
            end("revise", ExitStatus::Success),
            end("done", ExitStatus::Success),
        ],
        "review",
        vec!["a"],
    );
    wf.rubrics.insert("r1".to_string(), marker_rubric());
    if let Some(Node::Standard(n)) = wf.nodes.get_mut("review") {
        n.rubric_id = Some("r1".to_string());
    }
    wf.validate().unwrap();

    let ctx = ExecutionContext::builder(TenantId::new("t"), Arc::new(wf))
        .agents(Arc::new(agents))
        .build();
    let mut state = ExecutionState::new("wf", "review");

    match drive(&ctx, &mut state).await {
        ExecutionResult::Completed { state, .. } => {
            // Score 20 (< 80) routes to "revise" via the user rule.
            assert_eq!(state.current_node, "revise");
            let evaluation = state.rubric_evaluation.expect("evaluation retained");
            assert!(!evaluation.passed);
            // No automatic backtracking when a Score rule matched.
            assert!(state.history.backtracks.is_empty());
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

// S4: auto-backtrack on critical failure.
#[tokio::test]
async fn critical_rubric_failure_backtracks_to_start() {
    let agents = AgentRegistry::new();
    agents.register("planner", Arc::new(ScriptedAgent::replying("plan made")));
    agents.register(
        "writer",
        Arc::new(ScriptedAgent::with_script(vec![
            Ok("alpha".to_string()),
            Ok("alpha beta".to_string()),
        ])),
    );

    let mut wf = workflow(
        vec![
            standard("n0", "planner", "plan", vec![success_to("review")]),
            standard("review", "writer", "write", vec![success_to("finish")]),
            end("finish", ExitStatus::Success),
        ],
        "n0",
        vec!["planner", "writer"],
    );
    wf.rubrics.insert("r1".to_string(), marker_rubric());
    if let Some(Node::Standard(n)) = wf.nodes.get_mut("review") {
        n.rubric_id = Some("r1".to_string());
    }
    wf.validate().unwrap();

    let ctx = ExecutionContext::builder(TenantId::new("t"), Arc::new(wf))
        .agents(Arc::new(agents))
        .build();
    let mut state = ExecutionState::new("wf", "n0");

    match drive(&ctx, &mut state).await {
        ExecutionResult::Completed { state, .. } => {
            // First visit scored 20 => critical. No prior rubric step exists,
            // so the cursor fell back to the workflow start node.
            assert_eq!(state.history.backtracks.len(), 1);
            let backtrack = &state.history.backtracks[0];
            assert_eq!(backtrack.from, "review");
            assert_eq!(backtrack.to, "n0");
            assert_eq!(backtrack.backtrack_type, BacktrackType::Automatic);
            assert_eq!(backtrack.rubric_score, Some(20.0));
            assert_eq!(
                state.context[keys::BACKTRACK_REASON],
                json!("Critical rubric failure: 20.0")
            );
            assert!(state.context.get(keys::FAILED_CRITERIA).is_some());
            // Second pass succeeded and reached the end.
            assert_eq!(state.current_node, "finish");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

// Minor rubric failure retries the same node instead of transitioning.
#[tokio::test]
async fn minor_rubric_failure_retries_in_place() {
    // alpha alone scores 70 with these weights: the minor band.
    let rubric = json!({
        "id": "r-minor",
        "name": "markers",
        "version": "1",
        "type": "test",
        "passThreshold": 80.0,
        "criteria": [
            {
                "id": "c-alpha", "name": "alpha", "description": "",
                "weight": 70.0, "minScore": 50.0, "required": false,
                "evaluationType": "automated", "evaluationLogic": "contains:alpha"
            },
            {
                "id": "c-beta", "name": "beta", "description": "",
                "weight": 30.0, "minScore": 50.0, "required": false,
                "evaluationType": "automated", "evaluationLogic": "contains:beta"
            }
        ]
    })
    .to_string();

    let agents = AgentRegistry::new();
    agents.register(
        "writer",
        Arc::new(ScriptedAgent::with_script(vec![
            Ok("alpha".to_string()),
            Ok("alpha beta".to_string()),
        ])),
    );

    let mut wf = workflow(
        vec![
            standard("draft", "writer", "write", vec![success_to("finish")]),
            end("finish", ExitStatus::Success),
        ],
        "draft",
        vec!["writer"],
    );
    wf.rubrics.insert("r-minor".to_string(), rubric);
    if let Some(Node::Standard(n)) = wf.nodes.get_mut("draft") {
        n.rubric_id = Some("r-minor".to_string());
    }

    let ctx = ExecutionContext::builder(TenantId::new("t"), Arc::new(wf))
        .agents(Arc::new(agents))
        .build();
    let mut state = ExecutionState::new("wf", "draft");

    match drive(&ctx, &mut state).await {
        ExecutionResult::Completed { state, .. } => {
            // First visit scored 70 => retried in place; the Success rule did
            // not fire until the second, passing visit.
            let visited: Vec<&str> = state
                .history
                .steps
                .iter()
                .map(|s| s.node_id.as_str())
                .collect();
            assert_eq!(visited, vec!["draft", "draft"]);
            assert_eq!(state.history.backtracks.len(), 1);
            assert_eq!(state.history.backtracks[0].rubric_score, Some(70.0));
            assert_eq!(state.current_node, "finish");
            // The attempt counter was cleared on leaving the node.
            assert!(state.get(keys::RETRY_ATTEMPT).is_none());
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

// S5: fork/join collect-all merge in declared order.
#[tokio::test]
async fn fork_join_collect_all() {
    let agents = AgentRegistry::new();
    agents.register("agent-a", Arc::new(ScriptedAgent::replying("aa")));
    agents.register("agent-b", Arc::new(ScriptedAgent::replying("bb")));

    let fork = Node::Fork(ForkNode {
        id: "f".to_string(),
        targets: vec!["A".to_string(), "B".to_string()],
        wait_for_all: true,
        transition_rules: vec![success_to("j")],
        rubric_id: None,
    });
    let join = Node::Join(JoinNode {
        id: "j".to_string(),
        await_targets: vec!["f".to_string()],
        merge_strategy: MergeStrategy::CollectAll,
        output_field: "merged".to_string(),
        timeout_ms: None,
        fail_on_any_error: true,
        transition_rules: vec![success_to("finish")],
        rubric_id: None,
    });

    let wf = workflow(
        vec![
            fork,
            join,
            standard("A", "agent-a", "go", vec![]),
            standard("B", "agent-b", "go", vec![]),
            end("finish", ExitStatus::Success),
        ],
        "f",
        vec!["agent-a", "agent-b"],
    );
    wf.validate().unwrap();

    let ctx = ExecutionContext::builder(TenantId::new("t"), Arc::new(wf))
        .agents(Arc::new(agents))
        .build();
    let mut state = ExecutionState::new("wf", "f");

    match drive(&ctx, &mut state).await {
        ExecutionResult::Completed { state, .. } => {
            assert_eq!(state.context["merged"], json!(["aa", "bb"]));
            let join_step = state
                .history
                .steps
                .iter()
                .find(|s| s.node_id == "j")
                .expect("join step recorded");
            assert!(join_step.result.is_success());
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

// S6: output rejection leaves no trace in history.
#[tokio::test]
async fn unicode_manipulation_output_rejected() {
    let agents = AgentRegistry::new();
    agents.register(
        "a",
        Arc::new(ScriptedAgent::replying("evil \u{202E}payload")),
    );

    let wf = workflow(
        vec![
            standard("n0", "a", "hi", vec![success_to("n1")]),
            end("n1", ExitStatus::Success),
        ],
        "n0",
        vec!["a"],
    );
    let ctx = ExecutionContext::builder(TenantId::new("t"), Arc::new(wf))
        .agents(Arc::new(agents))
        .build();
    let mut state = ExecutionState::new("wf", "n0");

    match drive(&ctx, &mut state).await {
        ExecutionResult::Failed { state, error } => {
            assert!(error.contains("contains Unicode manipulation characters"));
            // Extraction short-circuits before the history processor runs.
            assert!(state.history.steps.is_empty());
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

// Parallel consensus feeding transitions.
#[tokio::test]
async fn parallel_consensus_routes_by_status() {
    let agents = AgentRegistry::new();
    agents.register("v1", Arc::new(ScriptedAgent::replying("approve")));
    agents.register("v2", Arc::new(ScriptedAgent::replying("approve")));
    agents.register("v3", Arc::new(ScriptedAgent::replying("approve")));

    let parallel = Node::Parallel(ParallelNode {
        id: "vote".to_string(),
        branches: vec![
            Branch {
                id: "b1".to_string(),
                agent_id: "v1".to_string(),
                prompt: "opinion?".to_string(),
                rubric_id: None,
                weight: 1.0,
            },
            Branch {
                id: "b2".to_string(),
                agent_id: "v2".to_string(),
                prompt: "opinion?".to_string(),
                rubric_id: None,
                weight: 1.0,
            },
            Branch {
                id: "b3".to_string(),
                agent_id: "v3".to_string(),
                prompt: "opinion?".to_string(),
                rubric_id: None,
                weight: 1.0,
            },
        ],
        consensus: ConsensusConfig {
            strategy: ConsensusStrategy::MajorityVote,
            judge_agent: None,
            threshold: Some(0.6),
        },
        transition_rules: vec![
            success_to("accepted"),
            TransitionRule::Failure {
                max_retries: 0,
                target: "accepted".to_string(),
            },
            TransitionRule::Always {
                target: "no-consensus".to_string(),
            },
        ],
        rubric_id: None,
    });

    let wf = workflow(
        vec![
            parallel,
            end("accepted", ExitStatus::Success),
            end("no-consensus", ExitStatus::Failure),
        ],
        "vote",
        vec!["v1", "v2", "v3"],
    );
    let ctx = ExecutionContext::builder(TenantId::new("t"), Arc::new(wf))
        .agents(Arc::new(agents))
        .build();
    let mut state = ExecutionState::new("wf", "vote");

    match drive(&ctx, &mut state).await {
        ExecutionResult::Completed { state, exit_status } => {
            assert_eq!(exit_status, ExitStatus::Success);
            assert_eq!(state.current_node, "accepted");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

// Manual review backtrack with an edited prompt.
#[tokio::test]
async fn review_backtrack_stages_edited_prompt() {
    struct BacktrackOnce {
        fired: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ReviewHandler for BacktrackOnce {
        async fn review(
            &self,
            _request: ReviewRequest<'_>,
        ) -> trellis_core::Result<ReviewDecision> {
            if self.fired.swap(true, std::sync::atomic::Ordering::SeqCst) {
                Ok(ReviewDecision::Approve { patch: None })
            } else {
                Ok(ReviewDecision::Backtrack {
                    target: "n0".to_string(),
                    reason: "try a sharper prompt".to_string(),
                    edited_prompt: Some("edited prompt".to_string()),
                })
            }
        }
    }

    struct PromptEcho;

    #[async_trait]
    impl trellis_core::agent::Agent for PromptEcho {
        async fn execute(
            &self,
            prompt: &str,
            _context: &trellis_core::state::Context,
        ) -> std::result::Result<trellis_core::agent::AgentResponse, trellis_core::agent::AgentError>
        {
            Ok(trellis_core::agent::AgentResponse::text(prompt))
        }
    }

    let agents = AgentRegistry::new();
    agents.register("a", Arc::new(PromptEcho));

    let mut wf = workflow(
        vec![
            standard("n0", "a", "original prompt", vec![success_to("n1")]),
            end("n1", ExitStatus::Success),
        ],
        "n0",
        vec!["a"],
    );
    if let Some(Node::Standard(n)) = wf.nodes.get_mut("n0") {
        n.review_config = Some(ReviewConfig {
            mode: ReviewMode::Required,
            instructions: None,
        });
    }

    let ctx = ExecutionContext::builder(TenantId::new("t"), Arc::new(wf))
        .agents(Arc::new(agents))
        .review(Arc::new(BacktrackOnce {
            fired: std::sync::atomic::AtomicBool::new(false),
        }))
        .build();
    let mut state = ExecutionState::new("wf", "n0");

    match drive(&ctx, &mut state).await {
        ExecutionResult::Completed { state, .. } => {
            assert_eq!(state.history.steps.len(), 2);
            assert_eq!(
                state.history.steps[1].result.output,
                Some(Value::String("edited prompt".to_string()))
            );
            assert_eq!(state.history.backtracks.len(), 1);
            assert_eq!(
                state.history.backtracks[0].backtrack_type,
                BacktrackType::Manual
            );
            // The staged prompt was consumed.
            assert!(state.get(&keys::edited_prompt("n0")).is_none());
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

// Review rejection terminates with the reviewer's reason.
#[tokio::test]
async fn review_reject_terminates() {
    struct AlwaysReject;

    #[async_trait]
    impl ReviewHandler for AlwaysReject {
        async fn review(
            &self,
            _request: ReviewRequest<'_>,
        ) -> trellis_core::Result<ReviewDecision> {
            Ok(ReviewDecision::Reject {
                reason: "not good enough".to_string(),
            })
        }
    }

    let agents = AgentRegistry::new();
    agents.register("a", Arc::new(ScriptedAgent::replying("draft")));

    let mut wf = workflow(
        vec![
            standard("n0", "a", "hi", vec![success_to("n1")]),
            end("n1", ExitStatus::Success),
        ],
        "n0",
        vec!["a"],
    );
    if let Some(Node::Standard(n)) = wf.nodes.get_mut("n0") {
        n.review_config = Some(ReviewConfig {
            mode: ReviewMode::Required,
            instructions: None,
        });
    }

    let ctx = ExecutionContext::builder(TenantId::new("t"), Arc::new(wf))
        .agents(Arc::new(agents))
        .review(Arc::new(AlwaysReject))
        .build();
    let mut state = ExecutionState::new("wf", "n0");

    match drive(&ctx, &mut state).await {
        ExecutionResult::Rejected { reason, state } => {
            assert_eq!(reason, "not good enough");
            // The step was recorded before review ran.
            assert_eq!(state.history.steps.len(), 1);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

// Plan review pause and resume.
#[tokio::test]
async fn plan_review_pauses_and_resumes() {
    use trellis_core::model::node::{PlanningConfig, PlanningMode};
    use trellis_core::plan::{Plan, PlanStep};
    use trellis_core::tools::{Tool, ToolDescriptor, ToolRegistry};

    struct Greet;

    #[async_trait]
    impl Tool for Greet {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new("greet", "Say hello")
        }

        async fn call(
            &self,
            _args: &HashMap<String, Value>,
        ) -> trellis_core::Result<Value> {
            Ok(json!("hello from tool"))
        }
    }

    let agents = AgentRegistry::new();
    agents.register("a", Arc::new(ScriptedAgent::replying("unused")));

    let tools = ToolRegistry::new();
    tools.register(Arc::new(Greet));

    let mut wf = workflow(
        vec![
            standard("n0", "a", "do work", vec![success_to("n1")]),
            end("n1", ExitStatus::Success),
        ],
        "n0",
        vec!["a"],
    );
    if let Some(Node::Standard(n)) = wf.nodes.get_mut("n0") {
        n.planning_config = Some(PlanningConfig {
            mode: PlanningMode::Static,
            review_before_execute: true,
            plan_failure_target: None,
        });
        n.static_plan = Some(Plan::new(vec![PlanStep {
            id: "s1".to_string(),
            tool: "greet".to_string(),
            args: HashMap::new(),
            description: "greet".to_string(),
        }]));
    }

    let snapshots = Arc::new(MemoryExecutionStateStore::new());
    let tenant = TenantId::new("t");
    let ctx = ExecutionContext::builder(tenant.clone(), Arc::new(wf))
        .agents(Arc::new(agents))
        .tools(Arc::new(tools))
        .snapshot_store(snapshots.clone())
        .execution_id("e1")
        .build();

    let mut state = ExecutionState::new("wf", "n0");
    match drive(&ctx, &mut state).await {
        ExecutionResult::Paused { state } => {
            assert!(state.get(keys::PENDING_PLAN).is_some());
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // The pause snapshot is durable and carries the staged plan.
    let mut resumed = snapshots.load(&tenant, "e1").await.unwrap().unwrap();
    assert!(resumed.get(keys::PENDING_PLAN).is_some());

    // Approve and re-enter the driver at the same node.
    resumed.set(keys::PLAN_APPROVED, json!(true));
    match drive(&ctx, &mut resumed).await {
        ExecutionResult::Completed { state, .. } => {
            assert_eq!(state.current_node, "n1");
            let step = &state.history.steps[0];
            assert!(step.result.is_success());
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

// Retry counters reset when entering a node from a different predecessor.
#[tokio::test]
async fn retry_counters_reset_on_fresh_entry() {
    // flaky fails twice then succeeds; its Failure rule allows one retry and
    // then falls through to a detour that comes back.
    let agents = AgentRegistry::new();
    agents.register(
        "flaky",
        Arc::new(ScriptedAgent::with_script(vec![
            Err(trellis_core::agent::AgentError::Refused("v1".to_string())),
            Err(trellis_core::agent::AgentError::Refused("v2".to_string())),
            Ok("third time lucky".to_string()),
        ])),
    );
    agents.register("helper", Arc::new(ScriptedAgent::replying("context added")));

    let wf = workflow(
        vec![
            standard(
                "work",
                "flaky",
                "try",
                vec![
                    success_to("finish"),
                    TransitionRule::Failure {
                        max_retries: 1,
                        target: "work".to_string(),
                    },
                    TransitionRule::Always {
                        target: "detour".to_string(),
                    },
                ],
            ),
            standard("detour", "helper", "assist", vec![success_to("work")]),
            end("finish", ExitStatus::Success),
        ],
        "work",
        vec!["flaky", "helper"],
    );
    let ctx = ExecutionContext::builder(TenantId::new("t"), Arc::new(wf))
        .agents(Arc::new(agents))
        .build();
    let mut state = ExecutionState::new("wf", "work");

    match drive(&ctx, &mut state).await {
        ExecutionResult::Completed { state, .. } => {
            // Path: work(fail) -> work(fail, budget spent) -> detour -> work(ok).
            let visited: Vec<&str> = state
                .history
                .steps
                .iter()
                .map(|s| s.node_id.as_str())
                .collect();
            assert_eq!(visited, vec!["work", "work", "detour", "work"]);
            // Counter was reset when re-entering from the detour.
            assert_eq!(state.retry_count("work"), 0);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

// Cancellation between nodes.
#[tokio::test]
async fn cancellation_stops_the_driver() {
    let agents = AgentRegistry::new();
    agents.register("a", Arc::new(ScriptedAgent::replying("ok")));

    let wf = workflow(
        vec![
            standard("n0", "a", "hi", vec![success_to("n1")]),
            end("n1", ExitStatus::Success),
        ],
        "n0",
        vec!["a"],
    );

    let (handle, flag) = trellis_core::exec::cancel_pair();
    handle.cancel();

    let ctx = ExecutionContext::builder(TenantId::new("t"), Arc::new(wf))
        .agents(Arc::new(agents))
        .cancel(flag)
        .build();
    let mut state = ExecutionState::new("wf", "n0");

    match drive(&ctx, &mut state).await {
        ExecutionResult::Cancelled { state } => {
            assert!(state.history.steps.is_empty());
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

// Dead-end transitions fail with the authoring-error message.
#[tokio::test]
async fn missing_transition_is_a_failure() {
    let agents = AgentRegistry::new();
    agents.register(
        "a",
        Arc::new(ScriptedAgent::with_script(vec![Err(
            trellis_core::agent::AgentError::Other("broken".to_string()),
        )])),
    );

    let wf = workflow(
        vec![
            standard("n0", "a", "hi", vec![success_to("n1")]),
            end("n1", ExitStatus::Success),
        ],
        "n0",
        vec!["a"],
    );
    let ctx = ExecutionContext::builder(TenantId::new("t"), Arc::new(wf))
        .agents(Arc::new(agents))
        .build();
    let mut state = ExecutionState::new("wf", "n0");

    match drive(&ctx, &mut state).await {
        ExecutionResult::Failed { error, .. } => {
            assert_eq!(error, "No valid transition from n0");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

// Sub-workflow node drives a child workflow end to end.
#[tokio::test]
async fn sub_workflow_runs_child() {
    use trellis_core::model::node::SubWorkflowNode;
    use trellis_core::store::{MemoryWorkflowStore, WorkflowStore};

    let tenant = TenantId::new("t");
    let child = workflow(
        vec![
            standard("c0", "child-agent", "handle {task}", vec![success_to("c1")]),
            end("c1", ExitStatus::Success),
        ],
        "c0",
        vec!["child-agent"],
    );
    let mut child = child;
    child.id = "child".to_string();

    let workflows = Arc::new(MemoryWorkflowStore::new());
    workflows.put(&tenant, child).await.unwrap();

    let agents = AgentRegistry::new();
    agents.register("child-agent", Arc::new(ScriptedAgent::replying("done by child")));

    let sub = Node::SubWorkflow(SubWorkflowNode {
        id: "sub".to_string(),
        workflow_id: "child".to_string(),
        input_mapping: [("goal".to_string(), "task".to_string())].into(),
        output_mapping: [("c0".to_string(), "child_said".to_string())].into(),
        transition_rules: vec![success_to("finish")],
        rubric_id: None,
    });

    let wf = workflow(vec![sub, end("finish", ExitStatus::Success)], "sub", vec![]);
    let ctx = ExecutionContext::builder(tenant, Arc::new(wf))
        .agents(Arc::new(agents))
        .workflow_store(workflows)
        .build();

    let mut state = ExecutionState::new("wf", "sub");
    state.set("goal", json!("translate"));

    match drive(&ctx, &mut state).await {
        ExecutionResult::Completed { state, .. } => {
            assert_eq!(state.context["child_said"], json!("done by child"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

//! Workflow root object and structural validation
//!
//! A [`Workflow`] is immutable once built. [`Workflow::validate`] is the
//! submit-time gate: every transition target must name an existing node, the
//! start node must exist, and every `rubricId` must have a source. A workflow
//! failing validation is rejected before any node executes and never
//! checkpointed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::agent::AgentConfig;
use crate::model::node::Node;
use crate::model::NodeId;

/// A declarative workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    /// agent id -> configuration
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    /// rubric id -> source locator (inline JSON or a path understood by the
    /// rubric loader)
    #[serde(default)]
    pub rubrics: HashMap<String, String>,
    pub nodes: HashMap<NodeId, Node>,
    pub start_node: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ExecutionConfig>,
}

/// Display metadata; not interpreted by the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Execution-wide limits and policies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    /// Wall-clock cap in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_execution_time: Option<u64>,
    /// Snapshot state before every node body (default) or only on pause.
    #[serde(default)]
    pub checkpoint_every_step: bool,
    /// Emit step-level events to subscribers.
    #[serde(default = "default_true")]
    pub emit_step_events: bool,
}

fn default_true() -> bool {
    true
}

/// Listing row returned by the workflow repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub version: String,
}

impl Workflow {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Largest `maxRetries` declared by any Failure rule, for the driver's
    /// step budget.
    pub fn max_retry_cap(&self) -> u32 {
        self.nodes
            .values()
            .flat_map(|n| n.transition_rules())
            .filter_map(|rule| match rule {
                crate::model::TransitionRule::Failure { max_retries, .. } => Some(*max_retries),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Structural validation. Errors name the first offending reference.
    pub fn validate(&self) -> Result<(), String> {
        if !self.nodes.contains_key(&self.start_node) {
            return Err(format!("start node '{}' does not exist", self.start_node));
        }

        for (id, node) in &self.nodes {
            if id != node.id() {
                return Err(format!(
                    "node map key '{}' does not match node id '{}'",
                    id,
                    node.id()
                ));
            }
            for rule in node.transition_rules() {
                for target in rule.targets() {
                    if !self.nodes.contains_key(target) {
                        return Err(format!(
                            "transition target '{}' from node '{}' does not exist",
                            target, id
                        ));
                    }
                }
            }
            if let Some(rubric_id) = node.rubric_id() {
                if !self.rubrics.contains_key(rubric_id) {
                    return Err(format!(
                        "node '{}' references rubric '{}' with no source",
                        id, rubric_id
                    ));
                }
            }
            match node {
                Node::Standard(standard) => {
                    if !self.agents.contains_key(&standard.agent_id) {
                        return Err(format!(
                            "node '{}' references unknown agent '{}'",
                            id, standard.agent_id
                        ));
                    }
                }
                Node::Parallel(parallel) => {
                    let mut seen = std::collections::HashSet::new();
                    for branch in &parallel.branches {
                        if !seen.insert(&branch.id) {
                            return Err(format!(
                                "parallel node '{}' has duplicate branch id '{}'",
                                id, branch.id
                            ));
                        }
                        if let Some(rubric_id) = &branch.rubric_id {
                            if !self.rubrics.contains_key(rubric_id) {
                                return Err(format!(
                                    "branch '{}' references rubric '{}' with no source",
                                    branch.id, rubric_id
                                ));
                            }
                        }
                    }
                }
                Node::Fork(fork) => {
                    for target in &fork.targets {
                        if !self.nodes.contains_key(target) {
                            return Err(format!(
                                "fork '{}' targets unknown node '{}'",
                                id, target
                            ));
                        }
                    }
                }
                Node::Join(join) => {
                    for target in &join.await_targets {
                        if !self.nodes.contains_key(target) {
                            return Err(format!(
                                "join '{}' awaits unknown fork '{}'",
                                id, target
                            ));
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::{EndNode, ExitStatus, StandardNode};
    use crate::model::TransitionRule;

    fn workflow_with(nodes: Vec<Node>, start: &str) -> Workflow {
        let mut map = HashMap::new();
        for node in nodes {
            map.insert(node.id().to_string(), node);
        }
        Workflow {
            id: "wf".to_string(),
            version: "1".to_string(),
            metadata: WorkflowMetadata::default(),
            agents: [("a".to_string(), AgentConfig::default())].into(),
            rubrics: HashMap::new(),
            nodes: map,
            start_node: start.to_string(),
            config: None,
        }
    }

    fn standard(id: &str, target: &str) -> Node {
        Node::Standard(StandardNode {
            id: id.to_string(),
            agent_id: "a".to_string(),
            prompt: "hi".to_string(),
            output_params: vec![],
            transition_rules: vec![TransitionRule::Success {
                target: target.to_string(),
            }],
            rubric_id: None,
            review_config: None,
            planning_config: None,
            static_plan: None,
        })
    }

    fn end(id: &str) -> Node {
        Node::End(EndNode {
            id: id.to_string(),
            exit_status: ExitStatus::Success,
            transition_rules: vec![],
            rubric_id: None,
        })
    }

    #[test]
    fn test_valid_workflow() {
        let wf = workflow_with(vec![standard("n0", "n1"), end("n1")], "n0");
        assert!(wf.validate().is_ok());
    }

    #[test]
    fn test_missing_start_node() {
        let wf = workflow_with(vec![standard("n0", "n0")], "missing");
        let err = wf.validate().unwrap_err();
        assert!(err.contains("start node"));
    }

    #[test]
    fn test_dangling_transition_target() {
        let wf = workflow_with(vec![standard("n0", "ghost")], "n0");
        let err = wf.validate().unwrap_err();
        assert!(err.contains("ghost"));
    }

    #[test]
    fn test_missing_rubric_source() {
        let mut wf = workflow_with(vec![standard("n0", "n1"), end("n1")], "n0");
        if let Some(Node::Standard(n)) = wf.nodes.get_mut("n0") {
            n.rubric_id = Some("r1".to_string());
        }
        let err = wf.validate().unwrap_err();
        assert!(err.contains("rubric 'r1'"));
    }

    #[test]
    fn test_workflow_json_round_trip() {
        let wf = workflow_with(vec![standard("n0", "n1"), end("n1")], "n0");
        let json = serde_json::to_string(&wf).unwrap();
        let back: Workflow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wf);
    }
}

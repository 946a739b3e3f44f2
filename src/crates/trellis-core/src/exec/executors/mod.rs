//! Node executors
//!
//! One executor per node variant. An executor returns `Ok(NodeResult)` for
//! every outcome transition rules may route around (including failures);
//! `Err` is reserved for execution-aborting conditions such as persistence
//! failures.

pub mod action;
pub mod fork_join;
pub mod generic;
pub mod parallel;
pub mod standard;
pub mod subworkflow;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::exec::context::ExecutionContext;
use crate::model::node::Node;
use crate::state::{ExecutionState, NodeResult, NodeStatus};

/// Dispatch a node to its executor.
pub async fn execute_node(
    ctx: &ExecutionContext,
    node: &Node,
    state: &mut ExecutionState,
) -> Result<NodeResult> {
    match node {
        Node::Standard(n) => standard::execute(ctx, n, state).await,
        Node::Action(n) => action::execute(ctx, n, state).await,
        Node::Generic(n) => generic::execute(ctx, n, state).await,
        Node::Parallel(n) => parallel::execute(ctx, n, state).await,
        Node::Fork(n) => fork_join::execute_fork(ctx, n, state).await,
        Node::Join(n) => fork_join::execute_join(ctx, n, state).await,
        Node::SubWorkflow(n) => subworkflow::execute(ctx, n, state).await,
        Node::Loop(_) => Ok(loop_result()),
        Node::End(_) => Ok(NodeResult::end()),
    }
}

/// Boxed entry point for `execute_node`, used where the caller (a spawned
/// branch task) would otherwise form a recursive `Send` cycle through the
/// `Fork` dispatch arm above.
pub fn execute_node_boxed<'a>(
    ctx: &'a ExecutionContext,
    node: &'a Node,
    state: &'a mut ExecutionState,
) -> BoxFuture<'a, Result<NodeResult>> {
    Box::pin(execute_node(ctx, node, state))
}

/// Loop nodes are pass-throughs: exit routing is resolved by the transition
/// processor from `loop_exit_target` in context.
fn loop_result() -> NodeResult {
    NodeResult {
        status: NodeStatus::Success,
        output: None,
        metadata: Default::default(),
        timestamp: chrono::Utc::now(),
        error: None,
    }
}

//! Generic node executor
//!
//! Dispatches to a user-registered handler keyed by the node's
//! `executorType`. The handler is an opaque function over the node's
//! freeform config; the engine only cares about the returned result.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::Result;
use crate::exec::context::ExecutionContext;
use crate::model::node::GenericNode;
use crate::state::{ExecutionState, NodeResult};

/// User-supplied executor for generic nodes.
#[async_trait]
pub trait GenericHandler: Send + Sync {
    async fn execute(&self, node: &GenericNode, state: &ExecutionState) -> Result<NodeResult>;
}

/// Registry from `executorType` to handler.
#[derive(Default)]
pub struct GenericHandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn GenericHandler>>>,
}

impl GenericHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, executor_type: impl Into<String>, handler: Arc<dyn GenericHandler>) {
        self.handlers.write().insert(executor_type.into(), handler);
    }

    pub fn get(&self, executor_type: &str) -> Option<Arc<dyn GenericHandler>> {
        self.handlers.read().get(executor_type).cloned()
    }
}

pub async fn execute(
    ctx: &ExecutionContext,
    node: &GenericNode,
    state: &mut ExecutionState,
) -> Result<NodeResult> {
    let Some(handler) = ctx.generic_handlers.get(&node.executor_type) else {
        return Ok(NodeResult::failure(format!(
            "Unknown generic executor type '{}'",
            node.executor_type
        )));
    };

    match handler.execute(node, state).await {
        Ok(result) => Ok(result),
        Err(err) => {
            warn!(node = %node.id, error = %err, "generic handler failed");
            Ok(NodeResult::failure(err.to_string()))
        }
    }
}

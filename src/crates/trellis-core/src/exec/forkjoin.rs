//! Fork/join coordination state
//!
//! The Fork executor creates a [`ForkJoinContext`] holding one task handle
//! per spawned branch and transfers it into the [`ForkTable`]; the Join
//! executor consumes and removes it. The table is runtime-only state and is
//! never serialized, so a crash between fork and join replays the fork on
//! resume (at-least-once semantics).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

use crate::model::NodeId;
use crate::state::NodeResult;

/// Result of one forked branch's single-node sub-run.
#[derive(Debug)]
pub struct ForkBranchResult {
    pub node_id: NodeId,
    pub result: NodeResult,
}

/// Per-fork state held between the Fork and Join executors.
pub struct ForkJoinContext {
    pub fork_node_id: NodeId,
    /// Declared target order; CollectAll merges in this order.
    pub targets: Vec<NodeId>,
    pub handles: Vec<(NodeId, JoinHandle<ForkBranchResult>)>,
    pub started_at: Instant,
}

/// Fork contexts keyed by fork node id, shared across context clones within
/// one execution.
#[derive(Clone, Default)]
pub struct ForkTable {
    inner: Arc<Mutex<HashMap<NodeId, ForkJoinContext>>>,
}

impl ForkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fork context, replacing (and aborting) any stale one left by
    /// a prior visit to the same fork node.
    pub fn insert(&self, context: ForkJoinContext) {
        let mut inner = self.inner.lock();
        if let Some(stale) = inner.insert(context.fork_node_id.clone(), context) {
            for (_, handle) in stale.handles {
                handle.abort();
            }
        }
    }

    /// Remove and return the context for a fork node.
    pub fn take(&self, fork_node_id: &str) -> Option<ForkJoinContext> {
        self.inner.lock().remove(fork_node_id)
    }

    pub fn contains(&self, fork_node_id: &str) -> bool {
        self.inner.lock().contains_key(fork_node_id)
    }

    /// Abort every outstanding branch; used on cancellation.
    pub fn abort_all(&self) {
        let mut inner = self.inner.lock();
        for (_, context) in inner.drain() {
            for (_, handle) in context.handles {
                handle.abort();
            }
        }
    }
}

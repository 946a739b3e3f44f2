//! Execution lifecycle events
//!
//! The broadcaster fans execution events out to any number of subscribers
//! over a bounded broadcast channel. Slow subscribers lose old events rather
//! than blocking the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::model::node::ExitStatus;

const DEFAULT_CAPACITY: usize = 256;

/// One execution lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    pub execution_id: String,
    pub workflow_id: String,
    pub tenant: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

/// Event discriminator plus event-specific payload fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EventKind {
    Started,
    PlanCreated { plan_id: String, total_steps: usize },
    StepStarted { node_id: String },
    StepCompleted { node_id: String, status: String },
    PlanRevised { plan_id: String },
    PlanCompleted { plan_id: String },
    Paused { node_id: String },
    Completed { exit_status: ExitStatus },
    Error { message: String },
}

impl ExecutionEvent {
    pub fn new(
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        tenant: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            tenant: tenant.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    /// SSE event name for this event.
    pub fn name(&self) -> &'static str {
        match &self.kind {
            EventKind::Started => "execution.started",
            EventKind::PlanCreated { .. } => "plan.created",
            EventKind::StepStarted { .. } => "step.started",
            EventKind::StepCompleted { .. } => "step.completed",
            EventKind::PlanRevised { .. } => "plan.revised",
            EventKind::PlanCompleted { .. } => "plan.completed",
            EventKind::Paused { .. } => "execution.paused",
            EventKind::Completed { .. } => "execution.completed",
            EventKind::Error { .. } => "execution.error",
        }
    }

    /// JSON payload keyed by `executionId`.
    pub fn payload(&self) -> Value {
        let mut payload = match serde_json::to_value(&self.kind) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => json!({}),
        };
        if let Value::Object(map) = &mut payload {
            map.remove("type");
            map.insert("executionId".to_string(), json!(self.execution_id));
            map.insert("workflowId".to_string(), json!(self.workflow_id));
            map.insert("timestamp".to_string(), json!(self.timestamp.to_rfc3339()));
        }
        payload
    }
}

/// Fan-out of [`ExecutionEvent`]s to subscribers.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<ExecutionEvent>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Dropped silently when nobody is subscribed.
    pub fn publish(&self, event: ExecutionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

//! Agent trait and registry
//!
//! The engine is an orchestration layer, not an LLM client: providers are
//! integrated by implementing [`Agent`] and registering the implementation
//! under the id workflow nodes refer to. The registry is read-mostly and safe
//! for concurrent lookups from branch tasks.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::state::Context;

/// Errors an agent call can produce.
///
/// `Timeout` and `Network` are transient and eligible for retry by the
/// standard executor; the rest are terminal for the call.
#[derive(Debug, Error, Clone)]
pub enum AgentError {
    #[error("Agent call timed out")]
    Timeout,
    #[error("Agent refused: {0}")]
    Refused(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Agent error: {0}")]
    Other(String),
}

impl AgentError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::Timeout | AgentError::Network(_))
    }
}

/// Response from an agent call.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// The agent's text output.
    pub text: String,
    /// Provider metadata (token counts, model id, ...).
    pub metadata: HashMap<String, Value>,
}

impl AgentResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: HashMap::new(),
        }
    }
}

/// A remote LLM-backed responder.
///
/// Implementations must be `Send + Sync`; they are shared across concurrent
/// executions and branch tasks as `Arc<dyn Agent>`.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Produce a response for `prompt` given the execution context.
    async fn execute(&self, prompt: &str, context: &Context) -> Result<AgentResponse, AgentError>;
}

/// Lookup table from agent id to executor.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: impl Into<String>, agent: Arc<dyn Agent>) {
        self.agents.write().insert(id.into(), agent);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}

/// Deterministic agent for tests: replies with a fixed script, one entry per
/// call, repeating the last entry when exhausted.
pub struct ScriptedAgent {
    responses: RwLock<Vec<Result<String, AgentError>>>,
    cursor: RwLock<usize>,
}

impl ScriptedAgent {
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            responses: RwLock::new(vec![Ok(text.into())]),
            cursor: RwLock::new(0),
        }
    }

    pub fn with_script(responses: Vec<Result<String, AgentError>>) -> Self {
        Self {
            responses: RwLock::new(responses),
            cursor: RwLock::new(0),
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn execute(&self, _prompt: &str, _context: &Context) -> Result<AgentResponse, AgentError> {
        let responses = self.responses.read();
        if responses.is_empty() {
            return Err(AgentError::Other("scripted agent has no responses".to_string()));
        }
        let mut cursor = self.cursor.write();
        let idx = (*cursor).min(responses.len() - 1);
        *cursor += 1;
        match &responses[idx] {
            Ok(text) => Ok(AgentResponse::text(text.clone())),
            Err(err) => Err(err.clone()),
        }
    }
}

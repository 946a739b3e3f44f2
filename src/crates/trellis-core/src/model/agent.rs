//! Agent configuration

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Configuration for one agent referenced by workflow nodes.
///
/// The executor interprets `timeout` and `max_retries`; everything else is
/// passed through to the [`Agent`](crate::agent::Agent) implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Provider model identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// System prompt prepended by the agent implementation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Per-call timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Transient-failure retries applied by the standard executor.
    #[serde(default)]
    pub max_retries: u32,
    /// Provider-specific parameters (temperature, top_p, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, Value>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            model: None,
            system_prompt: None,
            timeout: None,
            max_retries: 0,
            params: HashMap::new(),
        }
    }
}

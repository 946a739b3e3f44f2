//! Tool descriptors, registry and invocation seam
//!
//! Tools are how planned steps touch the outside world. The engine only
//! knows descriptors (for planning) and the [`ToolInvoker`] seam (for
//! execution); actual transports, local functions or MCP round-trips, live
//! behind the trait.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, Result};

/// Description of an invocable tool, surfaced to planners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema-ish description of the expected arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: None,
        }
    }
}

/// Executes a tool call by name.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, name: &str, args: &HashMap<String, Value>) -> Result<Value>;
}

/// Local tool implementation registered alongside its descriptor.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;
    async fn call(&self, args: &HashMap<String, Value>) -> Result<Value>;
}

/// Registry of local tools; also a [`ToolInvoker`] over its own entries.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name;
        self.tools.write().insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .read()
            .values()
            .map(|t| t.descriptor())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(&self, name: &str, args: &HashMap<String, Value>) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| EngineError::Internal(format!("tool '{name}' is not registered")))?;
        tool.call(args).await
    }
}

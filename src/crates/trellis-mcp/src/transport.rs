//! Tool discovery and invocation over the split pipe
//!
//! [`McpToolClient`] wraps the session manager with the two MCP methods the
//! engine uses: `tools/list` (cached per client with a coarse TTL) and
//! `tools/call`. It also adapts them onto the engine's `ToolInvoker` and
//! `ActionHandler` seams.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use trellis_core::actions::{ActionError, ActionHandler};
use trellis_core::error::EngineError;
use trellis_core::state::Context;
use trellis_core::tools::ToolInvoker;

use crate::protocol::McpError;
use crate::session::McpSessionManager;

/// How long a cached tool listing stays fresh.
pub const TOOL_CACHE_TTL: Duration = Duration::from_secs(300);

struct CachedTools {
    tools: Vec<Value>,
    fetched_at: Instant,
}

/// Engine-side client for MCP tool calls.
pub struct McpToolClient {
    sessions: Arc<McpSessionManager>,
    cache: DashMap<String, CachedTools>,
    ttl: Duration,
}

impl McpToolClient {
    pub fn new(sessions: Arc<McpSessionManager>) -> Self {
        Self {
            sessions,
            cache: DashMap::new(),
            ttl: TOOL_CACHE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// `tools/list` round trip, served from cache while fresh.
    pub async fn list_tools(&self, client_id: &str) -> Result<Vec<Value>, McpError> {
        if let Some(cached) = self.cache.get(client_id) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.tools.clone());
            }
        }

        let result = self
            .sessions
            .send_request(client_id, "tools/list", json!({}), None)
            .await?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        debug!(client = client_id, count = tools.len(), "tool listing refreshed");
        self.cache.insert(
            client_id.to_string(),
            CachedTools {
                tools: tools.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(tools)
    }

    /// Drop the cached listing for a client (called on disconnect too).
    pub fn invalidate_cache(&self, client_id: &str) {
        self.cache.remove(client_id);
    }

    /// `tools/call` round trip.
    pub async fn call_tool(
        &self,
        client_id: &str,
        name: &str,
        args: Value,
    ) -> Result<Value, McpError> {
        self.sessions
            .send_request(
                client_id,
                "tools/call",
                json!({"name": name, "arguments": args}),
                None,
            )
            .await
    }

    /// Disconnect a client, invalidating its cache.
    pub fn disconnect(&self, client_id: &str) {
        self.invalidate_cache(client_id);
        self.sessions.disconnect(client_id);
    }
}

/// [`ToolInvoker`] bound to one client, so planned steps on the server
/// execute against that tenant's connected MCP client.
pub struct McpToolInvoker {
    client: Arc<McpToolClient>,
    client_id: String,
}

impl McpToolInvoker {
    pub fn new(client: Arc<McpToolClient>, client_id: impl Into<String>) -> Self {
        Self {
            client,
            client_id: client_id.into(),
        }
    }
}

#[async_trait]
impl ToolInvoker for McpToolInvoker {
    async fn invoke(
        &self,
        name: &str,
        args: &HashMap<String, Value>,
    ) -> trellis_core::Result<Value> {
        self.client
            .call_tool(&self.client_id, name, json!(args))
            .await
            .map_err(|err| match err {
                McpError::Timeout => EngineError::Timeout("MCP tool call".to_string()),
                other => EngineError::Action(other.to_string()),
            })
    }
}

/// [`ActionHandler`] registered under the `mcp` id on server-side action
/// executors. Payload shape: `{"tool": "...", "arguments": {...}}`. The
/// target client is, in order: an explicit `clientId` in the payload, the
/// tenant recorded in the execution context, the handler's default.
pub struct McpActionHandler {
    client: Arc<McpToolClient>,
    default_client_id: Option<String>,
}

impl McpActionHandler {
    pub fn new(client: Arc<McpToolClient>) -> Self {
        Self {
            client,
            default_client_id: None,
        }
    }

    pub fn with_default_client(mut self, client_id: impl Into<String>) -> Self {
        self.default_client_id = Some(client_id.into());
        self
    }
}

#[async_trait]
impl ActionHandler for McpActionHandler {
    async fn execute(
        &self,
        payload: &HashMap<String, Value>,
        context: &Context,
    ) -> Result<Value, ActionError> {
        let tool = payload
            .get("tool")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::Handler("mcp payload requires 'tool'".to_string()))?;
        let client_id = payload
            .get("clientId")
            .and_then(Value::as_str)
            .or_else(|| {
                context
                    .get(trellis_core::state::keys::TENANT)
                    .and_then(Value::as_str)
            })
            .or(self.default_client_id.as_deref())
            .ok_or_else(|| {
                ActionError::Handler("no MCP client id in payload or context".to_string())
            })?;
        let args = payload.get("arguments").cloned().unwrap_or(json!({}));

        self.client
            .call_tool(client_id, tool, args)
            .await
            .map_err(|err| ActionError::Handler(err.to_string()))
    }
}

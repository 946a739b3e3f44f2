//! Connection pool
//!
//! Connections are keyed by endpoint string. `sse://<clientId>` endpoints
//! delegate to the split-pipe session manager; other schemes are out of
//! scope here and rejected. Closing a pooled connection drops it from the
//! pool.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::protocol::McpError;
use crate::session::McpSessionManager;
use crate::transport::McpToolClient;

/// A live MCP connection.
#[async_trait]
pub trait McpConnection: Send + Sync {
    fn endpoint(&self) -> &str;
    async fn list_tools(&self) -> Result<Vec<Value>, McpError>;
    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, McpError>;
    async fn close(&self);
}

/// Connection over the split-pipe stream for `sse://<clientId>` endpoints.
pub struct SseConnection {
    endpoint: String,
    client_id: String,
    client: Arc<McpToolClient>,
}

impl SseConnection {
    pub fn new(endpoint: &str, client_id: &str, client: Arc<McpToolClient>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            client_id: client_id.to_string(),
            client,
        }
    }
}

#[async_trait]
impl McpConnection for SseConnection {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn list_tools(&self) -> Result<Vec<Value>, McpError> {
        self.client.list_tools(&self.client_id).await
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, McpError> {
        self.client.call_tool(&self.client_id, name, args).await
    }

    async fn close(&self) {
        self.client.disconnect(&self.client_id);
    }
}

/// Pool of MCP connections keyed by endpoint.
pub struct ConnectionPool {
    connections: DashMap<String, Arc<dyn McpConnection>>,
    client: Arc<McpToolClient>,
}

impl ConnectionPool {
    pub fn new(sessions: Arc<McpSessionManager>) -> Self {
        Self {
            connections: DashMap::new(),
            client: Arc::new(McpToolClient::new(sessions)),
        }
    }

    /// Fetch or create the connection for an endpoint.
    pub fn acquire(&self, endpoint: &str) -> Result<Arc<dyn McpConnection>, McpError> {
        if let Some(existing) = self.connections.get(endpoint) {
            return Ok(existing.clone());
        }

        let Some(client_id) = endpoint.strip_prefix("sse://") else {
            return Err(McpError::UnsupportedEndpoint(endpoint.to_string()));
        };
        let connection: Arc<dyn McpConnection> =
            Arc::new(SseConnection::new(endpoint, client_id, self.client.clone()));
        self.connections
            .insert(endpoint.to_string(), connection.clone());
        Ok(connection)
    }

    /// Close an endpoint's connection and drop it from the pool.
    pub async fn close(&self, endpoint: &str) {
        if let Some((_, connection)) = self.connections.remove(endpoint) {
            connection.close().await;
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_keys_by_endpoint() {
        let sessions = McpSessionManager::new();
        let pool = ConnectionPool::new(sessions);

        let a = pool.acquire("sse://c1").unwrap();
        let b = pool.acquire("sse://c1").unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(a.endpoint(), b.endpoint());

        pool.acquire("sse://c2").unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_endpoint_rejected() {
        let sessions = McpSessionManager::new();
        let pool = ConnectionPool::new(sessions);
        let err = match pool.acquire("http://example.test/mcp") {
            Err(err) => err,
            Ok(_) => panic!("expected unsupported endpoint error"),
        };
        assert!(matches!(err, McpError::UnsupportedEndpoint(_)));
    }

    #[tokio::test]
    async fn test_close_drops_from_pool() {
        let sessions = McpSessionManager::new();
        let _stream = sessions.connect("c1");
        let pool = ConnectionPool::new(sessions.clone());

        pool.acquire("sse://c1").unwrap();
        pool.close("sse://c1").await;
        assert!(pool.is_empty());
        // Closing the connection disconnected the underlying session.
        assert!(!sessions.is_connected("c1"));
    }
}

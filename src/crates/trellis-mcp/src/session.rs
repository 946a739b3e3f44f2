//! Split-pipe session manager
//!
//! Server-to-client frames flow over one push stream per client; client
//! responses arrive on a separate inbound endpoint and are correlated back
//! to the waiting caller by request id.
//!
//! ```text
//!   engine ── send_request ──► pending[id] ──► downstream stream ──► client
//!                                  ▲                                   │
//!                                  └────── handle_response ◄── POST ───┘
//! ```
//!
//! Invariants:
//! - at most one active downstream stream per client id; a new subscription
//!   replaces and closes the prior one
//! - the first frame on a fresh stream is a `ping` notification
//! - every pending entry is resolved exactly once: with a result, with a
//!   remote error, or removed on timeout/disconnect

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::{JsonRpcRequest, JsonRpcResponse, McpError};

/// Default per-call timeout for round trips.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Downstream channel depth per client.
const STREAM_BUFFER: usize = 64;

struct ClientSession {
    tx: mpsc::Sender<JsonRpcRequest>,
    connected_at: Instant,
}

struct PendingRequest {
    client_id: String,
    tx: oneshot::Sender<Result<Value, McpError>>,
}

/// Aggregate counters for the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub connected_clients: usize,
    pub pending_requests: usize,
}

/// Per-client status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    pub client_id: String,
    pub connected: bool,
    pub connected_duration: Option<Duration>,
}

/// Owns the session map and the pending-request table.
pub struct McpSessionManager {
    sessions: DashMap<String, ClientSession>,
    pending: DashMap<String, PendingRequest>,
    default_timeout: Duration,
}

impl Default for McpSessionManager {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl McpSessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_timeout(default_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            pending: DashMap::new(),
            default_timeout,
        }
    }

    /// Open (or replace) the downstream stream for a client. The returned
    /// receiver is the push stream; dropping it is a disconnect.
    pub fn connect(&self, client_id: &str) -> mpsc::Receiver<JsonRpcRequest> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        // Confirm liveness before anything else is pushed.
        let _ = tx.try_send(JsonRpcRequest::notification("ping", None));

        let replaced = self.sessions.insert(
            client_id.to_string(),
            ClientSession {
                tx,
                connected_at: Instant::now(),
            },
        );
        if replaced.is_some() {
            debug!(client = client_id, "replaced existing downstream stream");
        }
        rx
    }

    /// Drop a client's stream and fail its outstanding requests.
    pub fn disconnect(&self, client_id: &str) {
        self.sessions.remove(client_id);

        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().client_id == client_id)
            .map(|entry| entry.key().clone())
            .collect();
        for id in stale {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending
                    .tx
                    .send(Err(McpError::Disconnected(client_id.to_string())));
            }
        }
        debug!(client = client_id, "client disconnected");
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.sessions.contains_key(client_id)
    }

    /// One round trip: push a request frame downstream and await the
    /// correlated response from the inbound endpoint.
    pub async fn send_request(
        &self,
        client_id: &str,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, McpError> {
        let session_tx = self
            .sessions
            .get(client_id)
            .map(|session| session.tx.clone())
            .ok_or_else(|| McpError::NoSession(client_id.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            PendingRequest {
                client_id: client_id.to_string(),
                tx,
            },
        );

        let frame = JsonRpcRequest::call(id.clone(), method, params);
        if session_tx.send(frame).await.is_err() {
            self.pending.remove(&id);
            self.disconnect(client_id);
            return Err(McpError::Disconnected(client_id.to_string()));
        }

        let budget = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(budget, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::Disconnected(client_id.to_string())),
            Err(_) => {
                self.pending.remove(&id);
                warn!(client = client_id, request = %id, method, "request timed out");
                Err(McpError::Timeout)
            }
        }
    }

    /// Fire-and-forget frame without an id; nothing is tracked.
    pub async fn send_notification(
        &self,
        client_id: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), McpError> {
        let session_tx = self
            .sessions
            .get(client_id)
            .map(|session| session.tx.clone())
            .ok_or_else(|| McpError::NoSession(client_id.to_string()))?;
        session_tx
            .send(JsonRpcRequest::notification(method, params))
            .await
            .map_err(|_| {
                self.disconnect(client_id);
                McpError::Disconnected(client_id.to_string())
            })
    }

    /// Dispatch an inbound response to the waiting caller. A response for an
    /// unknown id (e.g. one that already timed out) is dropped quietly.
    pub fn handle_response(&self, response: JsonRpcResponse) {
        let Some((_, pending)) = self.pending.remove(&response.id) else {
            warn!(request = %response.id, "response for unknown or expired request");
            return;
        };
        let outcome = match response.error {
            Some(error) => Err(error.into()),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = pending.tx.send(outcome);
    }

    /// Parse and dispatch a raw inbound frame.
    pub fn handle_raw(&self, raw: &str) -> Result<(), McpError> {
        let response: JsonRpcResponse =
            serde_json::from_str(raw).map_err(|e| McpError::Malformed(e.to_string()))?;
        self.handle_response(response);
        Ok(())
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            connected_clients: self.sessions.len(),
            pending_requests: self.pending.len(),
        }
    }

    pub fn client_status(&self, client_id: &str) -> ClientStatus {
        match self.sessions.get(client_id) {
            Some(session) => ClientStatus {
                client_id: client_id.to_string(),
                connected: true,
                connected_duration: Some(session.connected_at.elapsed()),
            },
            None => ClientStatus {
                client_id: client_id.to_string(),
                connected: false,
                connected_duration: None,
            },
        }
    }

    /// Number of requests currently awaiting responses; for tests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

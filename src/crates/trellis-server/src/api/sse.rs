//! Server-sent event streams
//!
//! Two push surfaces share the SSE machinery: the execution event stream
//! (lifecycle events filtered to the caller's tenant) and the MCP downstream
//! pipe (`/mcp/connect`), whose first frame is always the session manager's
//! `ping` notification.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::broadcast;
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::AppState;
use crate::api::validate::validate_identifier;

/// GET /api/v1/events: lifecycle events for the caller's tenant.
pub async fn execution_events(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let tenant = state.tenants.resolve(&headers)?;
    let mut rx = state.service.events().subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.tenant != tenant.as_str() {
                        continue;
                    }
                    yield Ok::<_, Infallible>(Event::default()
                        .event(event.name())
                        .data(event.payload().to_string()));
                }
                // Slow consumers drop old events rather than stalling the
                // engine; resume from the current position.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(tenant = %tenant, skipped, "event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
pub struct McpConnectQuery {
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
}

/// GET /mcp/connect?clientId=...: opens the downstream push stream.
pub async fn mcp_connect(
    State(state): State<AppState>,
    Query(query): Query<McpConnectQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let client_id = query
        .client_id
        .ok_or_else(|| ApiError::BadRequest("clientId query parameter is required".to_string()))?;
    validate_identifier(&client_id)?;

    let mut rx = state.mcp.connect(&client_id);
    debug!(client = %client_id, "mcp downstream stream opened");

    let stream = async_stream::stream! {
        // Ends when the session is replaced or explicitly disconnected;
        // frames that fail to serialize are unrepresentable, but guard anyway.
        while let Some(frame) = rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(data) => yield Ok::<_, Infallible>(Event::default().event("message").data(data)),
                Err(_) => continue,
            }
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

//! MCP inbound endpoint and status handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::AppState;
use crate::api::validate::validate_identifier;

/// POST /mcp/message: accepts JSON-RPC responses; 204 on accept, 400 on
/// malformed JSON.
pub async fn message(State(state): State<AppState>, body: String) -> ApiResult<impl IntoResponse> {
    state
        .mcp
        .handle_raw(&body)
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /mcp/status
pub async fn status(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let status = state.mcp.status();
    Ok(Json(json!({
        "connectedClients": status.connected_clients,
        "pendingRequests": status.pending_requests,
    })))
}

/// GET /mcp/clients/:id/status
pub async fn client_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    validate_identifier(&id)?;
    let status = state.mcp.client_status(&id);
    let mut body = json!({
        "clientId": status.client_id,
        "connected": status.connected,
    });
    if let Some(duration) = status.connected_duration {
        body["connectedDurationMs"] = json!(duration.as_millis() as u64);
    }
    Ok(Json(body))
}

/// DELETE /mcp/clients/:id: server-initiated disconnect.
pub async fn disconnect_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    validate_identifier(&id)?;
    state.mcp.disconnect(&id);
    Ok(StatusCode::NO_CONTENT)
}

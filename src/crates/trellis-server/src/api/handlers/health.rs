//! Health check

use axum::Json;
use serde_json::json;

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "trellis-server" }))
}

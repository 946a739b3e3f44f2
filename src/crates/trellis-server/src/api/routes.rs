//! API route definitions

use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use trellis_mcp::McpSessionManager;

use crate::api::handlers;
use crate::api::sse;
use crate::api::tenant::TenantResolver;
use crate::service::ExecutionService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ExecutionService>,
    pub mcp: Arc<McpSessionManager>,
    pub tenants: TenantResolver,
}

/// Build the complete API router.
pub fn create_router(
    service: Arc<ExecutionService>,
    mcp: Arc<McpSessionManager>,
    tenants: TenantResolver,
) -> Router {
    let state = AppState {
        service,
        mcp,
        tenants,
    };

    Router::new()
        .route("/health", get(handlers::health::health))
        // Workflow CRUD
        .route(
            "/api/v1/workflows",
            post(handlers::workflows::upsert).get(handlers::workflows::list),
        )
        .route(
            "/api/v1/workflows/:id",
            get(handlers::workflows::get).delete(handlers::workflows::remove),
        )
        // Executions
        .route(
            "/api/v1/executions",
            post(handlers::executions::create),
        )
        .route(
            "/api/v1/executions/paused",
            get(handlers::executions::paused),
        )
        .route(
            "/api/v1/executions/:id",
            get(handlers::executions::status),
        )
        .route(
            "/api/v1/executions/:id/resume",
            post(handlers::executions::resume),
        )
        .route(
            "/api/v1/executions/:id/plan",
            get(handlers::executions::plan),
        )
        .route(
            "/api/v1/executions/:id/result",
            get(handlers::executions::result),
        )
        .route(
            "/api/v1/executions/:id/cancel",
            post(handlers::executions::cancel),
        )
        // Event stream
        .route("/api/v1/events", get(sse::execution_events))
        // MCP split pipe
        .route("/mcp/connect", get(sse::mcp_connect))
        .route("/mcp/message", post(handlers::mcp::message))
        .route("/mcp/status", get(handlers::mcp::status))
        .route("/mcp/clients/:id/status", get(handlers::mcp::client_status))
        .route(
            "/mcp/clients/:id",
            delete(handlers::mcp::disconnect_client),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

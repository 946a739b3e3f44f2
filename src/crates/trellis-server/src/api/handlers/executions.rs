//! Execution lifecycle handlers

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use trellis_core::state::Context;

use crate::api::error::ApiResult;
use crate::api::routes::AppState;
use crate::api::validate::validate_identifier;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExecutionRequest {
    pub workflow_id: String,
    #[serde(default)]
    pub context: Option<Context>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    pub approved: bool,
    #[serde(default)]
    pub modifications: Option<HashMap<String, Value>>,
}

/// POST /api/v1/executions: 202 with the new execution id.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateExecutionRequest>,
) -> ApiResult<impl IntoResponse> {
    let tenant = state.tenants.resolve(&headers)?;
    validate_identifier(&request.workflow_id)?;

    let execution_id = state
        .service
        .start(&tenant, &request.workflow_id, request.context)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "executionId": execution_id,
            "workflowId": request.workflow_id,
        })),
    ))
}

/// GET /api/v1/executions/:id
pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let tenant = state.tenants.resolve(&headers)?;
    validate_identifier(&id)?;
    let view = state.service.status(&tenant, &id).await?;
    Ok(Json(view))
}

/// POST /api/v1/executions/:id/resume
pub async fn resume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ResumeRequest>,
) -> ApiResult<impl IntoResponse> {
    let tenant = state.tenants.resolve(&headers)?;
    validate_identifier(&id)?;
    state
        .service
        .resume(&tenant, &id, request.approved, request.modifications)
        .await?;
    Ok(Json(json!({ "status": "resumed" })))
}

/// GET /api/v1/executions/:id/plan: staged plan summary or 404.
pub async fn plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let tenant = state.tenants.resolve(&headers)?;
    validate_identifier(&id)?;
    let view = state.service.plan(&tenant, &id).await?;
    Ok(Json(view))
}

/// GET /api/v1/executions/paused: paused executions for the tenant.
pub async fn paused(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let tenant = state.tenants.resolve(&headers)?;
    Ok(Json(state.service.paused(&tenant)))
}

/// GET /api/v1/executions/:id/result: final context, internal keys removed.
pub async fn result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let tenant = state.tenants.resolve(&headers)?;
    validate_identifier(&id)?;
    let context = state.service.result(&tenant, &id).await?;
    Ok(Json(Value::Object(context)))
}

/// POST /api/v1/executions/:id/cancel
pub async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let tenant = state.tenants.resolve(&headers)?;
    validate_identifier(&id)?;
    state.service.cancel(&tenant, &id)?;
    Ok(Json(json!({ "status": "cancelling" })))
}

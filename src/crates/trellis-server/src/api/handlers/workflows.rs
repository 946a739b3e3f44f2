//! Workflow CRUD handlers

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use trellis_core::model::workflow::Workflow;

use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::AppState;
use crate::api::validate::{sanitize_log, sanitize_workflow_body, validate_identifier};

/// POST /api/v1/workflows: upsert; 201 when newly created, 200 on update.
pub async fn upsert(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let tenant = state.tenants.resolve(&headers)?;

    sanitize_workflow_body(&mut body)?;
    let workflow: Workflow = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid workflow: {e}")))?;
    validate_identifier(&workflow.id)?;
    workflow.validate().map_err(ApiError::BadRequest)?;

    let summary = json!({ "id": workflow.id, "version": workflow.version });
    let created = state.service.workflows().put(&tenant, workflow).await?;

    info!(tenant = %tenant, workflow = %sanitize_log(summary["id"].as_str().unwrap_or("")), created, "workflow upserted");
    let code = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((code, Json(summary)))
}

/// GET /api/v1/workflows: summaries.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let tenant = state.tenants.resolve(&headers)?;
    let summaries = state.service.workflows().list(&tenant).await?;
    Ok(Json(summaries))
}

/// GET /api/v1/workflows/:id
pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let tenant = state.tenants.resolve(&headers)?;
    validate_identifier(&id)?;
    let workflow = state
        .service
        .workflows()
        .get(&tenant, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("workflow '{id}' not found")))?;
    Ok(Json(workflow))
}

/// DELETE /api/v1/workflows/:id: 204 on success, 404 when absent.
pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let tenant = state.tenants.resolve(&headers)?;
    validate_identifier(&id)?;
    if state.service.workflows().delete(&tenant, &id).await? {
        info!(tenant = %tenant, workflow = %sanitize_log(&id), "workflow deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("workflow '{id}' not found")))
    }
}

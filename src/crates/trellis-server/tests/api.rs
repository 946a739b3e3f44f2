//! HTTP API tests over in-memory stores and a fallback tenant.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use trellis_core::agent::ScriptedAgent;
use trellis_core::store::{MemoryExecutionStateStore, MemoryWorkflowStore};
use trellis_mcp::McpSessionManager;
use trellis_server::api::tenant::TenantResolver;
use trellis_server::{create_router, ExecutionService};

fn test_router() -> Router {
    let mcp = McpSessionManager::new();
    let service = Arc::new(ExecutionService::new(
        Arc::new(MemoryWorkflowStore::new()),
        Arc::new(MemoryExecutionStateStore::new()),
        mcp.clone(),
    ));
    service
        .agents()
        .register("assistant", Arc::new(ScriptedAgent::replying("ok")));
    let tenants = TenantResolver::new("tenant_id", Some("dev".to_string()));
    create_router(service, mcp, tenants)
}

fn workflow_body() -> Value {
    json!({
        "id": "wf1",
        "version": "1",
        "metadata": { "name": "demo", "description": "", "author": "" },
        "agents": { "assistant": {} },
        "rubrics": {},
        "nodes": {
            "n0": {
                "type": "standard",
                "id": "n0",
                "agentId": "assistant",
                "prompt": "hello",
                "transitionRules": [ { "type": "success", "target": "n1" } ]
            },
            "n1": { "type": "end", "id": "n1", "exitStatus": "SUCCESS" }
        },
        "startNode": "n0"
    })
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn workflow_upsert_create_then_update() {
    let router = test_router();

    let (status, body) = send(&router, post("/api/v1/workflows", workflow_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], "wf1");

    let (status, _) = send(&router, post("/api/v1/workflows", workflow_body())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&router, get("/api/v1/workflows")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = send(&router, get("/api/v1/workflows/wf1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["startNode"], "n0");
}

#[tokio::test]
async fn workflow_delete_and_missing() {
    let router = test_router();
    send(&router, post("/api/v1/workflows", workflow_body())).await;

    let (status, _) = send(&router, delete("/api/v1/workflows/wf1")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&router, delete("/api/v1/workflows/wf1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);

    let (status, _) = send(&router, get("/api/v1/workflows/wf1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn workflow_with_dangling_target_rejected() {
    let router = test_router();
    let mut body = workflow_body();
    body["nodes"]["n0"]["transitionRules"][0]["target"] = json!("ghost");

    let (status, response) = send(&router, post("/api/v1/workflows", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["status"], 400);
    assert!(response["error"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn invalid_identifier_rejected() {
    let router = test_router();
    let (status, body) = send(&router, get("/api/v1/workflows/bad%20id")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn execution_lifecycle_roundtrip() {
    let router = test_router();
    send(&router, post("/api/v1/workflows", workflow_body())).await;

    let (status, body) = send(
        &router,
        post("/api/v1/executions", json!({"workflowId": "wf1"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let execution_id = body["executionId"].as_str().unwrap().to_string();
    assert_eq!(body["workflowId"], "wf1");

    // Poll until the execution settles.
    let mut settled = None;
    for _ in 0..100 {
        let (status, body) =
            send(&router, get(&format!("/api/v1/executions/{execution_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "COMPLETED" {
            settled = Some(body);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let settled = settled.expect("execution completed");
    assert_eq!(settled["hasPendingPlan"], false);

    let (status, body) = send(
        &router,
        get(&format!("/api/v1/executions/{execution_id}/result")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["n0"], "ok");
    // Reserved keys never leak.
    assert!(body.as_object().unwrap().keys().all(|k| !k.starts_with('_')));
}

#[tokio::test]
async fn execution_for_unknown_workflow_404() {
    let router = test_router();
    let (status, _) = send(
        &router,
        post("/api/v1/executions", json!({"workflowId": "ghost"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn paused_listing_empty() {
    let router = test_router();
    let (status, body) = send(&router, get("/api/v1/executions/paused")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn mcp_message_malformed_json_400() {
    let router = test_router();
    let request = Request::builder()
        .method("POST")
        .uri("/mcp/message")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn mcp_status_counts() {
    let router = test_router();
    let (status, body) = send(&router, get("/mcp/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connectedClients"], 0);
    assert_eq!(body["pendingRequests"], 0);

    let (status, body) = send(&router, get("/mcp/clients/c1/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clientId"], "c1");
    assert_eq!(body["connected"], false);
}

#[tokio::test]
async fn health_is_open() {
    let router = test_router();
    let (status, body) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

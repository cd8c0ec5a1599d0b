use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use loglens::analyzer::{NoSearch, RuleInference, StrategyTable};
use loglens::config::Config;
use loglens::engine::RunController;
use loglens::storage::{CheckpointManager, CheckpointStore, DuckDbStore};
use loglens::web::router;

async fn app() -> Router {
    let store = DuckDbStore::in_memory().unwrap();
    store.init_schema().await.unwrap();
    let strategies = StrategyTable::new(
        Arc::new(RuleInference::builtin().unwrap()),
        Arc::new(NoSearch),
    );
    let controller = RunController::new(
        Arc::new(Config::default()),
        strategies,
        CheckpointManager::new(Arc::new(store)),
    )
    .unwrap();
    router(Arc::new(controller))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = app().await;
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_run_lifecycle() {
    let app = app().await;

    let (status, body) = send(
        &app,
        post_json(
            "/api/runs",
            serde_json::json!({
                "run_id": "web-1",
                "log": "2024-03-01 12:00:01 ERROR db: Connection refused\n",
                "features": ["memory"]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["run_id"], "web-1");
    assert_eq!(body["status_url"], "/api/runs/web-1");

    let mut run = serde_json::Value::Null;
    for _ in 0..200 {
        let (status, body) = send(&app, get("/api/runs/web-1")).await;
        if status == StatusCode::OK && body["state"] == "completed" {
            run = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(run["state"], "completed");
    assert_eq!(run["category"], "application");
    assert_eq!(run["validation_status"], "valid");

    let (status, result) = send(&app, get("/api/runs/web-1/result")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["metadata"]["is_error"], true);
    let issues = result["issues"].as_array().unwrap();
    assert!(issues.iter().any(|i| i["type"] == "connection_failure"));

    let (status, list) = send(&app, get("/api/runs")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(list
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r["run_id"] == "web-1"));
}

#[tokio::test]
async fn test_empty_log_rejected() {
    let app = app().await;
    let (status, body) = send(&app, post_json("/api/runs", serde_json::json!({"log": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn test_unknown_run() {
    let app = app().await;
    let (status, body) = send(&app, get("/api/runs/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, get("/api/runs/missing/result")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

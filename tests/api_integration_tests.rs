//! Integration Tests for REST API
//!
//! These tests drive the router end-to-end with a scripted optimizer in place
//! of the generative backend.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use quantum_route_viz::api::{create_router, ApiState};
use quantum_route_viz::config::AppConfig;
use quantum_route_viz::error::OptimizeError;
use quantum_route_viz::iteration::{validate_response, ReplayLog};
use quantum_route_viz::optimizer::{
    GenerativeOptimizer, GenerativeSettings, OptimizationRequest, OptimizeFuture, Optimizer,
    Transport,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt; // for `oneshot`

/// Optimizer that returns an improving identity tour with `frames` snapshots.
struct ScriptedOptimizer {
    frames: usize,
}

impl Optimizer for ScriptedOptimizer {
    fn optimize<'a>(&'a self, request: &'a OptimizationRequest) -> OptimizeFuture<'a> {
        Box::pin(async move {
            let route: Vec<u32> = request.nodes.iter().map(|n| n.id).collect();
            let iterations: Vec<Value> = (0..self.frames)
                .map(|i| {
                    json!({
                        "step": i * 100,
                        "current_route": route,
                        "current_energy": 500.0 - i as f64,
                        "best_route": route,
                        "best_energy": 500.0 - i as f64,
                        "tunneling": i % 3 == 2,
                    })
                })
                .collect();
            let payload = json!({
                "summary": "scripted run",
                "iterations": iterations,
                "explanation": "none",
            });
            validate_response(payload, &request.nodes, request.start_node_id)
        })
    }
}

/// Transport that counts calls and always fails.
struct CountingTransport {
    calls: AtomicUsize,
}

impl Transport for CountingTransport {
    fn post_json<'a>(
        &'a self,
        _url: &'a str,
        _api_key: &'a str,
        _body: &'a Value,
    ) -> futures_util::future::BoxFuture<'a, Result<Value, OptimizeError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(OptimizeError::Transport("unreachable".to_string())) })
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        tick_interval: Duration::from_millis(5),
        ..Default::default()
    }
}

fn create_app(optimizer: Arc<dyn Optimizer>) -> Router {
    create_router(ApiState::new(test_config(), optimizer))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create_session(app: &Router, body: Value) -> String {
    let (status, snapshot) = send(app, "POST", "/api/v1/sessions", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    snapshot["session_id"].as_str().unwrap().to_string()
}

/// Poll the snapshot until `done` holds.
async fn wait_for(app: &Router, id: &str, done: impl Fn(&Value) -> bool) -> Value {
    let uri = format!("/api/v1/sessions/{}", id);
    for _ in 0..400 {
        let (_, snapshot) = send(app, "GET", &uri, None).await;
        if done(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session {} never reached the expected state", id);
}

#[tokio::test]
async fn test_index_page() {
    let app = create_app(Arc::new(ScriptedOptimizer { frames: 3 }));
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_scenario_catalog() {
    let app = create_app(Arc::new(ScriptedOptimizer { frames: 3 }));
    let (status, catalog) = send(&app, "GET", "/api/v1/scenarios", None).await;
    assert_eq!(status, StatusCode::OK);

    let ids: Vec<&str> = catalog
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        vec!["random", "logistics", "circuit", "delivery", "regional_tour"]
    );
    assert_eq!(catalog[3]["node_count"], 9);
}

#[tokio::test]
async fn test_optimize_and_play_to_finish() {
    let app = create_app(Arc::new(ScriptedOptimizer { frames: 4 }));
    let id = create_session(&app, json!({ "scenario": "logistics" })).await;

    let (status, snapshot) = send(&app, "POST", &format!("/api/v1/sessions/{}/optimize", id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(snapshot["loading"], true);

    let finished = wait_for(&app, &id, |s| s["status"] == "finished").await;
    assert_eq!(finished["cursor"], 3);
    assert_eq!(finished["frame_count"], 4);
    assert_eq!(finished["stats"]["cumulative_tunneling"], 1);
    assert_eq!(finished["final_result"]["best_energy"], 497.0);
    // The scripted log omits final_result
    assert_eq!(finished["issues"][0]["type"], "final_result_missing");

    let (status, log) = send(&app, "GET", &format!("/api/v1/sessions/{}/export", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let log: ReplayLog = serde_json::from_value(log).unwrap();
    assert_eq!(log.nodes.len(), 8);
    assert_eq!(log.response.iterations.len(), 4);
}

#[tokio::test]
async fn test_toggle_after_finish_restarts() {
    let app = create_app(Arc::new(ScriptedOptimizer { frames: 2 }));
    let id = create_session(&app, json!({ "node_count": 5, "seed": 3 })).await;
    send(&app, "POST", &format!("/api/v1/sessions/{}/optimize", id), None).await;
    wait_for(&app, &id, |s| s["status"] == "finished").await;

    let (status, snapshot) = send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/playback/toggle", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["cursor"], 0);
    assert_eq!(snapshot["status"], "playing");

    let (_, snapshot) = send(&app, "POST", &format!("/api/v1/sessions/{}/playback/skip", id), None).await;
    assert_eq!(snapshot["status"], "finished");
    assert_eq!(snapshot["cursor"], 1);
}

#[tokio::test]
async fn test_missing_credential_makes_no_transport_call() {
    let transport = Arc::new(CountingTransport {
        calls: AtomicUsize::new(0),
    });
    let optimizer = GenerativeOptimizer::new(
        GenerativeSettings {
            endpoint: "http://127.0.0.1:9".to_string(),
            model: "test-model".to_string(),
            api_key_env: "ROUTE_VIZ_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
        },
        transport.clone(),
    );
    let app = create_app(Arc::new(optimizer));
    let id = create_session(&app, json!({})).await;

    send(&app, "POST", &format!("/api/v1/sessions/{}/optimize", id), None).await;
    let snapshot = wait_for(&app, &id, |s| s["loading"] == false).await;

    assert_eq!(snapshot["error"]["kind"], "configuration");
    assert_eq!(snapshot["status"], "idle");
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);

    let (_, snapshot) = send(&app, "POST", &format!("/api/v1/sessions/{}/error/dismiss", id), None).await;
    assert!(snapshot["error"].is_null());
}

#[tokio::test]
async fn test_parameter_and_start_node_validation() {
    let app = create_app(Arc::new(ScriptedOptimizer { frames: 2 }));
    let id = create_session(&app, json!({ "node_count": 4 })).await;

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/api/v1/sessions/{}/params", id),
        Some(json!({ "steps": 500, "init_temp": 10.0, "tunneling_rate": 1.5, "algorithm": "greedy" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("tunneling"));

    let (status, snapshot) = send(
        &app,
        "PUT",
        &format!("/api/v1/sessions/{}/params", id),
        Some(json!({ "steps": 500, "init_temp": 10.0, "tunneling_rate": 0.5, "algorithm": "greedy" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["params"]["algorithm"], "greedy");

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/api/v1/sessions/{}/start-node", id),
        Some(json!({ "node_id": 9 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, snapshot) = send(
        &app,
        "PUT",
        &format!("/api/v1/sessions/{}/start-node", id),
        Some(json!({ "node_id": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["start_node_id"], 3);
}

#[tokio::test]
async fn test_scenario_change_and_reset() {
    let app = create_app(Arc::new(ScriptedOptimizer { frames: 2 }));
    let id = create_session(&app, json!({})).await;

    let (status, snapshot) = send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/scenario", id),
        Some(json!({ "scenario": "regional_tour" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["nodes"].as_array().unwrap().len(), 7);
    assert_eq!(snapshot["nodes"][0]["label"], "Osaka");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/scenario", id),
        Some(json!({ "scenario": "random", "node_count": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/scenario", id),
        Some(json!({ "scenario": "moon_base" })),
    )
    .await;
    assert!(status.is_client_error());

    let (status, snapshot) = send(&app, "POST", &format!("/api/v1/sessions/{}/reset", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["scenario"], "regional_tour");
    assert_eq!(snapshot["status"], "idle");
}

#[tokio::test]
async fn test_frame_svg() {
    let app = create_app(Arc::new(ScriptedOptimizer { frames: 2 }));
    let id = create_session(&app, json!({ "scenario": "circuit" })).await;

    let request = Request::builder()
        .uri(format!("/api/v1/sessions/{}/frame.svg", id))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/svg+xml"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let svg = String::from_utf8(bytes.to_vec()).unwrap();
    assert_eq!(svg.matches("<circle").count(), 12);
}

#[tokio::test]
async fn test_delete_session() {
    let app = create_app(Arc::new(ScriptedOptimizer { frames: 2 }));
    let id = create_session(&app, json!({})).await;

    let (status, _) = send(&app, "DELETE", &format!("/api/v1/sessions/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, "GET", &format!("/api/v1/sessions/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_optimize_rate_limited() {
    let config = AppConfig {
        optimize_per_minute: 1,
        ..test_config()
    };
    let app = create_router(ApiState::new(config, Arc::new(ScriptedOptimizer { frames: 1 })));
    let id = create_session(&app, json!({})).await;

    let uri = format!("/api/v1/sessions/{}/optimize", id);
    let (status, _) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_create_session_body_validation() {
    let app = create_app(Arc::new(ScriptedOptimizer { frames: 2 }));

    for body in [
        json!({ "scenario": "moon_base" }),
        json!({ "scenario": "delivery", "node_count": "ten" }),
        json!({ "scenario": "circuit", "node_count": 99 }),
    ] {
        let (status, error) = send(&app, "POST", "/api/v1/sessions", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error["error"].is_string());
    }

    // No body at all still means defaults
    let (status, snapshot) = send(&app, "POST", "/api/v1/sessions", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(snapshot["scenario"], "random");

    let (_, health) = send(&app, "GET", "/health", None).await;
    assert_eq!(health["sessions"], 1);
}

#[tokio::test]
async fn test_fixed_scenario_keeps_valid_node_count() {
    let app = create_app(Arc::new(ScriptedOptimizer { frames: 2 }));
    let id = create_session(&app, json!({ "node_count": 6 })).await;
    let uri = format!("/api/v1/sessions/{}/scenario", id);

    let (status, _) = send(
        &app,
        "POST",
        &uri,
        Some(json!({ "scenario": "circuit", "node_count": 99 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, snapshot) = send(&app, "POST", &uri, Some(json!({ "scenario": "circuit" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["node_count"], 6);
    assert_eq!(snapshot["nodes"].as_array().unwrap().len(), 12);

    // Back to random without a count uses the remembered one
    let (status, snapshot) = send(&app, "POST", &uri, Some(json!({ "scenario": "random" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["nodes"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn test_session_creation_rate_limited_per_client() {
    let config = AppConfig {
        sessions_per_minute: 1,
        ..test_config()
    };
    let app = create_router(ApiState::new(config, Arc::new(ScriptedOptimizer { frames: 1 })));

    let create_from = |ip: &str| {
        let addr: SocketAddr = format!("{}:40000", ip).parse().unwrap();
        Request::builder()
            .method("POST")
            .uri("/api/v1/sessions")
            .extension(ConnectInfo(addr))
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(create_from("10.0.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let response = app.clone().oneshot(create_from("10.0.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // Another client has its own budget
    let response = app.clone().oneshot(create_from("10.0.0.2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

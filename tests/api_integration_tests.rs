//! Integration Tests for the diagnostics API
//!
//! Full request/response cycles through the router, plus one test against a
//! live listener.

use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use triage_resilience::{
    cache::BoundedCache,
    config::{BreakerConfig, CacheConfig, RetryPolicy},
    create_router, AppState, CircuitBreaker, EvictionPolicy, OperationError, RetryExecutor,
};

// == Helper Functions ==

fn test_state() -> AppState {
    let breaker = std::sync::Arc::new(CircuitBreaker::new(BreakerConfig {
        failure_threshold: 2,
        recovery_timeout: Duration::from_secs(30),
    }));
    let retry = std::sync::Arc::new(
        RetryExecutor::new(RetryPolicy::immediate(1)).with_breaker(breaker.clone()),
    );
    let cache = BoundedCache::new(
        CacheConfig::default()
            .with_max_entries(3)
            .with_eviction_policy(EvictionPolicy::Lru),
    );
    AppState::new(cache, breaker, retry)
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn put(state: &AppState, key: &str, value: Value) -> StatusCode {
    let (status, _) = send(
        create_router(state.clone()),
        "PUT",
        "/cache",
        Some(json!({ "key": key, "value": value })),
    )
    .await;
    status
}

// == Cache Endpoint Tests ==

#[tokio::test]
async fn test_set_then_get() {
    let state = test_state();
    assert_eq!(put(&state, "msg:1", json!({"priority": "high"})).await, StatusCode::OK);

    let (status, json) = send(create_router(state), "GET", "/cache/msg:1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["key"], "msg:1");
    assert_eq!(json["value"]["priority"], "high");
}

#[tokio::test]
async fn test_set_with_ttl_expires() {
    let state = test_state();
    let (status, _) = send(
        create_router(state.clone()),
        "PUT",
        "/cache",
        Some(json!({"key": "brief", "value": 1, "ttl_ms": 50})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(120)).await;

    let (status, json) = send(create_router(state), "GET", "/cache/brief", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("brief"));
}

#[tokio::test]
async fn test_set_empty_key_is_bad_request() {
    let (status, json) = send(
        create_router(test_state()),
        "PUT",
        "/cache",
        Some(json!({"key": "", "value": "v"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json.get("error").is_some());
}

#[tokio::test]
async fn test_lru_eviction_through_api() {
    let state = test_state();
    for key in ["a", "b", "c"] {
        put(&state, key, json!(key)).await;
    }
    send(create_router(state.clone()), "GET", "/cache/a", None).await;
    send(create_router(state.clone()), "GET", "/cache/c", None).await;
    put(&state, "d", json!("d")).await;

    let (status, _) = send(create_router(state.clone()), "GET", "/cache/b", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    for key in ["a", "c", "d"] {
        let (status, _) = send(create_router(state.clone()), "GET", &format!("/cache/{}", key), None).await;
        assert_eq!(status, StatusCode::OK, "{} should survive eviction", key);
    }

    let (_, stats) = send(create_router(state), "GET", "/stats", None).await;
    assert_eq!(stats["cache"]["evictions"], 1);
}

#[tokio::test]
async fn test_delete_endpoint() {
    let state = test_state();
    put(&state, "gone", json!(true)).await;

    let (status, json) = send(create_router(state.clone()), "DELETE", "/cache/gone", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["message"].as_str().unwrap().contains("gone"));

    let (status, _) = send(create_router(state), "DELETE", "/cache/gone", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bulk_invalidate_endpoint() {
    let state = test_state();
    put(&state, "msg:1:summary", json!("s1")).await;
    put(&state, "msg:2:summary", json!("s2")).await;
    put(&state, "prompt:x", json!("p")).await;

    let (status, json) = send(
        create_router(state.clone()),
        "POST",
        "/cache/invalidate",
        Some(json!({"pattern": r"^msg:\d+:summary$"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["removed"], 2);

    let (status, _) = send(
        create_router(state),
        "POST",
        "/cache/invalidate",
        Some(json!({"pattern": "[unclosed"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_export_import_round_trip() {
    let source = test_state();
    put(&source, "warm:1", json!({"label": "newsletter"})).await;
    put(&source, "warm:2", json!({"label": "urgent"})).await;

    let (status, snapshot) = send(create_router(source), "GET", "/cache/export", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["version"], 1);
    assert_eq!(snapshot["entries"].as_array().unwrap().len(), 2);

    let target = test_state();
    let (status, report) = send(create_router(target.clone()), "POST", "/cache/import", Some(snapshot)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["imported"], 2);
    assert_eq!(report["skipped"], 0);

    let (_, json) = send(create_router(target), "GET", "/cache/warm:2", None).await;
    assert_eq!(json["value"]["label"], "urgent");
}

#[tokio::test]
async fn test_import_skips_tampered_entry() {
    let source = test_state();
    put(&source, "k", json!("original")).await;
    let (_, mut snapshot) = send(create_router(source), "GET", "/cache/export", None).await;
    snapshot["entries"][0]["value"] = json!("tampered");

    let target = test_state();
    let (status, report) = send(create_router(target), "POST", "/cache/import", Some(snapshot)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["imported"], 0);
    assert_eq!(report["skipped"], 1);
}

// == Resilience Endpoint Tests ==

#[tokio::test]
async fn test_stats_and_health_follow_breaker() {
    let state = test_state();

    for _ in 0..2 {
        let result: Result<(), _> = state
            .retry
            .run(|| async { Err(OperationError::retryable(anyhow::anyhow!("503 from upstream"))) })
            .await;
        assert!(result.is_err());
    }

    let (_, health) = send(create_router(state.clone()), "GET", "/health", None).await;
    assert_eq!(health["status"], "degraded");

    let (status, stats) = send(create_router(state.clone()), "GET", "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["breaker"]["state"], "OPEN");
    assert_eq!(stats["retry"]["total_executions"], 2);

    let (status, snapshot) = send(create_router(state.clone()), "POST", "/breaker/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["state"], "CLOSED");

    let (_, health) = send(create_router(state), "GET", "/health", None).await;
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_unknown_route() {
    let (status, _) = send(create_router(test_state()), "GET", "/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// == Live Server ==

#[tokio::test]
async fn test_live_server_round_trip() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, create_router(test_state())).await.unwrap();
    });

    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);

    let response = client
        .put(format!("{}/cache", base))
        .json(&json!({"key": "live", "value": [1, 2, 3]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body: Value = client
        .get(format!("{}/cache/live", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["value"], json!([1, 2, 3]));

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");

    server.abort();
}

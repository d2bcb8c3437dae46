//! API Routes
//!
//! Configures the Axum router with all diagnostics endpoints.

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    breaker_reset_handler, delete_handler, export_handler, get_handler, health_handler,
    import_handler, invalidate_handler, set_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Static segments are registered before the `:key` capture
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/cache", put(set_handler))
        .route("/cache/export", get(export_handler))
        .route("/cache/import", post(import_handler))
        .route("/cache/invalidate", post(invalidate_handler))
        .route("/cache/:key", get(get_handler).delete(delete_handler))
        .route("/breaker/reset", post(breaker_reset_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        create_router(AppState::default())
    }

    async fn status_of(app: Router, method: &str, uri: &str, body: Option<&str>) -> StatusCode {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        assert_eq!(status_of(create_test_app(), "GET", "/health", None).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        assert_eq!(status_of(create_test_app(), "GET", "/stats", None).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_set_endpoint() {
        let status = status_of(
            create_test_app(),
            "PUT",
            "/cache",
            Some(r#"{"key":"test","value":{"label":"urgent"}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let status = status_of(create_test_app(), "GET", "/cache/nonexistent", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_export_is_not_captured_as_key() {
        let status = status_of(create_test_app(), "GET", "/cache/export", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_import_rejects_bad_envelope() {
        let status = status_of(
            create_test_app(),
            "POST",
            "/cache/import",
            Some(r#"{"version": 99, "entries": []}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

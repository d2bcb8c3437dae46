//! API Handlers
//!
//! HTTP request handlers for the diagnostics endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;
use tracing::info;

use crate::cache::{BoundedCache, CacheSnapshot, ImportReport, SharedCache};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    GetResponse, HealthResponse, InvalidateRequest, InvalidateResponse, KeyResponse, SetRequest,
    StatsResponse,
};
use crate::resilience::{BreakerSnapshot, CircuitBreaker, CircuitState, RetryExecutor};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Cache of JSON values (triage results, prompt outputs)
    pub cache: SharedCache<Value>,
    /// Breaker guarding the downstream service
    pub breaker: Arc<CircuitBreaker>,
    /// Retry executor wired to `breaker`, for embedding callers
    pub retry: Arc<RetryExecutor>,
}

impl AppState {
    pub fn new(
        cache: BoundedCache<Value>,
        breaker: Arc<CircuitBreaker>,
        retry: Arc<RetryExecutor>,
    ) -> Self {
        Self {
            cache: cache.into_shared(),
            breaker,
            retry,
        }
    }

    /// Builds the cache, breaker and retry executor from configuration.
    pub fn from_config(config: &Config) -> Self {
        let breaker = Arc::new(CircuitBreaker::named("downstream", config.breaker.clone()));
        let retry = Arc::new(
            RetryExecutor::new(config.retry.clone()).with_breaker(Arc::clone(&breaker)),
        );
        Self::new(BoundedCache::new(config.cache.clone()), breaker, retry)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Handler for PUT /cache
///
/// Stores a JSON value with an optional TTL in milliseconds.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<KeyResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let ttl = req.ttl_ms.map(Duration::from_millis);
    state.cache.write().await.set(req.key.clone(), req.value, ttl)?;

    Ok(Json(KeyResponse::stored(req.key)))
}

/// Handler for GET /cache/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    // Write lock: a hit updates access bookkeeping and stats
    let value = state.cache.write().await.get(&key);

    match value {
        Some(value) => Ok(Json(GetResponse::new(key, value))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for DELETE /cache/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<KeyResponse>> {
    if state.cache.write().await.invalidate(&key) {
        Ok(Json(KeyResponse::invalidated(key)))
    } else {
        Err(CacheError::NotFound(key))
    }
}

/// Handler for POST /cache/invalidate
///
/// Removes every key matching a regular expression.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    let removed = state.cache.write().await.bulk_invalidate(&req.pattern)?;
    info!("Invalidated {} keys matching '{}'", removed, req.pattern);

    Ok(Json(InvalidateResponse {
        pattern: req.pattern,
        removed,
    }))
}

/// Handler for GET /cache/export
pub async fn export_handler(State(state): State<AppState>) -> Json<CacheSnapshot<Value>> {
    Json(state.cache.read().await.export_snapshot())
}

/// Handler for POST /cache/import
///
/// Rejects a malformed envelope with 400; bad individual entries are
/// skipped and counted.
pub async fn import_handler(
    State(state): State<AppState>,
    Json(snapshot): Json<Value>,
) -> Result<Json<ImportReport>> {
    let report = state.cache.write().await.import_snapshot(snapshot)?;
    Ok(Json(report))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let (cache, memory_pressure) = {
        let guard = state.cache.read().await;
        (guard.stats(), guard.memory_pressure())
    };

    Json(StatsResponse {
        hit_rate: cache.hit_rate(),
        cache,
        memory_pressure,
        breaker: state.breaker.snapshot(),
        retry: state.retry.stats(),
    })
}

/// Handler for POST /breaker/reset
pub async fn breaker_reset_handler(State(state): State<AppState>) -> Json<BreakerSnapshot> {
    state.breaker.reset();
    Json(state.breaker.snapshot())
}

/// Handler for GET /health
///
/// Reports "degraded" while the downstream breaker is open or probing.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    match state.breaker.state() {
        CircuitState::Closed => Json(HealthResponse::healthy()),
        CircuitState::Open | CircuitState::HalfOpen => Json(HealthResponse::degraded()),
    }
}

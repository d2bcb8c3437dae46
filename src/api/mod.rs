//! API Module
//!
//! HTTP diagnostics surface over the shared cache, breaker and retry executor.
//!
//! # Endpoints
//! - `GET /health` - Health check, "degraded" while the breaker is not closed
//! - `GET /stats` - Cache, breaker and retry statistics (retry counters
//!   reflect embedding callers of `AppState::retry`; no route retries)
//! - `PUT /cache` - Store a JSON value
//! - `GET /cache/:key` - Retrieve a value by key
//! - `DELETE /cache/:key` - Invalidate a key
//! - `POST /cache/invalidate` - Invalidate keys matching a regex
//! - `GET /cache/export` - Snapshot of live entries
//! - `POST /cache/import` - Restore a snapshot
//! - `POST /breaker/reset` - Force the breaker closed

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;

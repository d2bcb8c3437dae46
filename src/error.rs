//! Error types for the resilience core
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

/// Boxed error carried by operation failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// == Cache Error Enum ==
/// Errors raised by the bounded cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid key or request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A single entry is larger than the whole memory budget
    #[error("Entry too large: {size} bytes exceeds memory limit of {limit} bytes")]
    EntryTooLarge { size: usize, limit: usize },

    /// Bulk invalidation pattern failed to compile
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Snapshot is not a structurally valid export
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

// == Operation Error Enum ==
/// Failure reported by a caller-supplied operation.
///
/// Anything converted through `From` lands in [`OperationError::Retryable`],
/// which is the default class for errors the caller did not classify.
#[derive(Error, Debug)]
pub enum OperationError {
    /// Transient failure; the operation may be invoked again.
    #[error("{source}")]
    Retryable {
        #[source]
        source: BoxError,
        /// Force the circuit breaker open on this failure
        trip_breaker: bool,
    },

    /// Permanent failure; retrying cannot help.
    #[error("{0}")]
    NonRetryable(#[source] BoxError),
}

impl OperationError {
    /// Wraps an error as retryable.
    pub fn retryable(err: impl Into<BoxError>) -> Self {
        Self::Retryable {
            source: err.into(),
            trip_breaker: false,
        }
    }

    /// Wraps an error as retryable and asks the breaker to open immediately.
    pub fn tripping(err: impl Into<BoxError>) -> Self {
        Self::Retryable {
            source: err.into(),
            trip_breaker: true,
        }
    }

    /// Wraps an error as non-retryable.
    pub fn non_retryable(err: impl Into<BoxError>) -> Self {
        Self::NonRetryable(err.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            Self::Retryable {
                trip_breaker: true,
                ..
            }
        )
    }

    /// Returns the underlying error reported by the operation.
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        match self {
            Self::Retryable { source, .. } => source.as_ref(),
            Self::NonRetryable(source) => source.as_ref(),
        }
    }

    /// Attempts to view the underlying error as a concrete type.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.inner().downcast_ref::<E>()
    }
}

impl From<anyhow::Error> for OperationError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err)
    }
}

impl From<BoxError> for OperationError {
    fn from(err: BoxError) -> Self {
        Self::Retryable {
            source: err,
            trip_breaker: false,
        }
    }
}

// == Resilience Error Enum ==
/// Outcome error of a guarded execution.
#[derive(Error, Debug)]
pub enum ResilienceError {
    /// The circuit breaker refused the call; the operation was not invoked.
    #[error("Service temporarily unavailable: circuit open (retry after {retry_after:?})")]
    CircuitOpen { retry_after: Duration },

    /// The operation's own final error, unchanged.
    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl ResilienceError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Returns the operation error if this is not a breaker rejection.
    pub fn as_operation(&self) -> Option<&OperationError> {
        match self {
            Self::Operation(err) => Some(err),
            Self::CircuitOpen { .. } => None,
        }
    }
}

// == IntoResponse Implementations ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_)
            | CacheError::InvalidPattern(_)
            | CacheError::InvalidSnapshot(_) => StatusCode::BAD_REQUEST,
            CacheError::EntryTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

impl IntoResponse for ResilienceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ResilienceError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ResilienceError::Operation(_) => StatusCode::BAD_GATEWAY,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

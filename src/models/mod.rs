//! Request and Response models for the diagnostics API
//!
//! DTOs used for serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

pub use requests::{InvalidateRequest, SetRequest};
pub use responses::{
    ErrorResponse, GetResponse, HealthResponse, InvalidateResponse, KeyResponse, StatsResponse,
};

//! Operator control surface
//!
//! A small HTTP API over a running [`RunScheduler`](crate::scheduler::RunScheduler):
//! status, manual triggers, challenge submission, backoff reset, per-day
//! analytics and Prometheus metrics.

pub mod api;
pub mod server;

pub use api::{create_router, ApiResponse, ChallengeRequest, ErrorResponse, HealthResponse};
pub use server::{AppState, ControlServer, ServerError};

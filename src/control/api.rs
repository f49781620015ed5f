//! REST handlers for the control surface

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::server::AppState;
use crate::analytics::analytics_view;
use crate::error::Error;
use crate::metrics;
use crate::models::RunTrigger;
use crate::scheduler::SchedulerError;
use crate::utils::error::AuthError;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Challenge submission body
#[derive(Debug, Deserialize)]
pub struct ChallengeRequest {
    pub code: String,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/runs", post(trigger_run))
        .route("/api/challenge", post(submit_challenge))
        .route("/api/auth/reset", post(reset_retry_state))
        .route("/api/datasets/{date}", get(get_dataset_view))
        .route("/metrics", get(get_metrics))
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state)
}

async fn track_requests(matched: Option<MatchedPath>, request: Request, next: Next) -> Response {
    let endpoint = matched
        .as_ref()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;
    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Status Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.scheduler.status();

    Json(ApiResponse::success(HealthResponse {
        status: status.health.as_str().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.scheduler.status()))
}

// ============================================================================
// Run Handlers
// ============================================================================

/// Manual trigger; refused while a run is active
async fn trigger_run(State(state): State<AppState>) -> Response {
    match state.scheduler.trigger_run(RunTrigger::Manual) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::success("Run started")),
        )
            .into_response(),
        Err(e @ SchedulerError::RunInProgress) => {
            error_response(StatusCode::TOO_MANY_REQUESTS, e.to_string())
        }
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

async fn submit_challenge(
    State(state): State<AppState>,
    Json(request): Json<ChallengeRequest>,
) -> Response {
    match state.scheduler.submit_challenge_code(&request.code).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success("Challenge accepted")),
        )
            .into_response(),
        Err(e @ Error::Scheduler(SchedulerError::NoChallengePending)) => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
        Err(e @ Error::Auth(AuthError::ChallengeRejected)) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e @ Error::Auth(AuthError::NetworkFault(_))) => {
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "Challenge submission failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn reset_retry_state(State(state): State<AppState>) -> Response {
    match state.scheduler.reset_retry_state().await {
        Ok(()) => Json(ApiResponse::success("Retry state reset")).into_response(),
        Err(e @ Error::Scheduler(SchedulerError::RunInProgress)) => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ============================================================================
// Data Handlers
// ============================================================================

async fn get_dataset_view(
    State(state): State<AppState>,
    Path(date_str): Path<String>,
) -> Response {
    let date = match NaiveDate::parse_from_str(&date_str, "%Y-%m-%d") {
        Ok(date) => date,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid date format: {date_str}. Expected YYYY-MM-DD"),
            );
        }
    };

    match state.scheduler.datasets().load(date) {
        Ok(Some(dataset)) => Json(ApiResponse::success(analytics_view(&dataset))).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("No dataset for {date}")),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn get_metrics() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("test data");
        assert!(response.success);
        assert!(response.data.is_some());
        assert!(response.error.is_none());
    }

    #[test]
    fn test_error_response() {
        let response = ErrorResponse::new("test error");
        assert!(!response.success);
        assert_eq!(response.error, "test error");
    }

    #[test]
    fn test_challenge_request_parses() {
        let request: ChallengeRequest = serde_json::from_str(r#"{"code":"123456"}"#).unwrap();
        assert_eq!(request.code, "123456");
    }
}

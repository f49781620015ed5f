//! Control server

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::api::create_router;
use crate::config::ServerConfig;
use crate::scheduler::RunScheduler;

// ============================================================================
// App State
// ============================================================================

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<RunScheduler>,

    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(scheduler: Arc<RunScheduler>) -> Self {
        Self {
            scheduler,
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// Control Server
// ============================================================================

/// HTTP server for the control API
pub struct ControlServer {
    config: ServerConfig,
    state: AppState,
}

impl ControlServer {
    pub fn new(config: ServerConfig, scheduler: Arc<RunScheduler>) -> Self {
        Self {
            config,
            state: AppState::new(scheduler),
        }
    }

    /// Build the router with the configured layers
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve until `shutdown_signal` resolves
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;
        tracing::info!(%addr, "Control server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Control server shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Server Errors
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum ServerError {
    #[error("Failed to bind: {0}")]
    Bind(String),

    #[error("Server error: {0}")]
    Serve(String),
}

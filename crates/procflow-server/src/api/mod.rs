//! API module for the Procflow Server
//!
//! This module contains the API routes and handlers.

use axum::{
    http::HeaderMap,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod errors;
pub mod health;
pub mod instances;
pub mod processes;

use crate::server::ProcflowServer;
use errors::ApiError;
use procflow_core::{CoreError, UserId};

/// Build the router for API endpoints
pub fn build_router(server: Arc<ProcflowServer>) -> Router {
    Router::new()
        // Process definitions
        .route(
            "/v1/processes",
            post(processes::create_process).get(processes::list_processes),
        )
        .route(
            "/v1/processes/:process_id",
            get(processes::get_process).delete(processes::delete_process),
        )
        .route(
            "/v1/processes/:process_id/close",
            post(processes::close_process),
        )
        .route("/v1/processes/:process_id/steps", post(processes::add_step))
        .route(
            "/v1/processes/:process_id/steps/:step_id",
            put(processes::update_step).delete(processes::remove_step),
        )
        // Instances
        .route(
            "/v1/processes/:process_id/start",
            post(instances::start_instance),
        )
        .route(
            "/v1/instances/:instance_id/current-step",
            get(instances::current_step),
        )
        .route(
            "/v1/instances/:instance_id/current-steps",
            get(instances::current_steps),
        )
        .route(
            "/v1/instances/:instance_id/submit-step",
            post(instances::submit_step),
        )
        .route(
            "/v1/instances/:instance_id/abort",
            post(instances::abort_instance),
        )
        .route(
            "/v1/instances/:instance_id/submissions/:submission_id",
            delete(instances::delete_submission),
        )
        // Health check
        .route("/health", get(health::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// The caller's identity, taken from the `X-User-Id` header.
/// Protocol details (sessions, JWTs) live in front of this server.
pub(crate) fn identity(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| UserId(v.to_string()))
}

/// Identity required for owner-side endpoints
pub(crate) fn require_identity(headers: &HeaderMap) -> Result<UserId, ApiError> {
    identity(headers)
        .ok_or_else(|| ApiError::from(CoreError::Auth("authentication required".to_string())))
}

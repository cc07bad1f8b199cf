//! Health check endpoint for the Procflow Server

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::server::ProcflowServer;

/// GET /health
///
/// Reports the server's status and the credential cache's reachability.
pub(crate) async fn health_check(
    State(server): State<Arc<ProcflowServer>>,
) -> impl IntoResponse {
    let cache_status = match server.cache.health_check().await {
        Ok(true) => "UP",
        Ok(false) => "DEGRADED",
        Err(_) => "DOWN",
    };

    let healthy = cache_status == "UP";
    let body = Json(json!({
        "status": if healthy { "UP" } else { "DEGRADED" },
        "version": env!("CARGO_PKG_VERSION"),
        "dependencies": {
            "credentialCache": { "status": cache_status },
        },
    }));

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, body)
}

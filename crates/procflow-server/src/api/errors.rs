//! Error handling for the Procflow Server API
//!
//! Maps engine errors to HTTP responses with a stable machine-readable
//! error code and a human-readable message. Internal detail (store
//! errors, serialization failures) is logged and never surfaced.

use axum::{http::StatusCode, response::IntoResponse, Json};
use procflow_core::CoreError;
use serde_json::json;
use tracing::error;

use crate::error::ServerError;

/// API error returned by the handlers
#[derive(Debug)]
pub struct ApiError(pub ServerError);

impl From<ServerError> for ApiError {
    fn from(err: ServerError) -> Self {
        ApiError(err)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(ServerError::Core(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_code, message) = match &self.0 {
            ServerError::Core(core) => {
                let status = match core {
                    CoreError::Validation(_) => StatusCode::BAD_REQUEST,
                    CoreError::Auth(_) => StatusCode::FORBIDDEN,
                    CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
                    CoreError::Conflict(_) => StatusCode::CONFLICT,
                    CoreError::NotFound(_) => StatusCode::NOT_FOUND,
                    CoreError::StateStore(_)
                    | CoreError::Serialization(_)
                    | CoreError::Configuration(_)
                    | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!(error = %core, "Internal error while handling request");
                    "internal server error".to_string()
                } else {
                    core.to_string()
                };
                (status, format!("ERR_{}", core.kind()), message)
            }
            ServerError::ConfigurationError(msg) | ServerError::InternalError(msg) => {
                error!(error = %msg, "Internal error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ERR_INTERNAL".to_string(),
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "errorDetails": {
                "errorCode": error_code,
                "errorMessage": message,
            }
        }));
        (status, body).into_response()
    }
}

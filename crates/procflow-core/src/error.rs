use thiserror::Error;

/// Core error type for the Procflow engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Malformed input: missing required field, bad order value, unknown field id
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing/invalid/expired guest token or wrong form password
    #[error("Auth error: {0}")]
    Auth(String),

    /// Caller is authenticated but not allowed to perform the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Duplicate order, duplicate submission, wrong step, mutating a live process
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unknown process/instance/step/form/response
    #[error("{0} not found")]
    NotFound(String),

    /// Durable store failure
    #[error("State store error: {0}")]
    StateStore(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

impl CoreError {
    /// Stable machine-readable kind, surfaced to API callers
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION",
            CoreError::Auth(_) => "AUTH",
            CoreError::Forbidden(_) => "FORBIDDEN",
            CoreError::Conflict(_) => "CONFLICT",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::StateStore(_) => "STATE_STORE",
            CoreError::Serialization(_) => "SERIALIZATION",
            CoreError::Configuration(_) => "CONFIGURATION",
            CoreError::Internal(_) => "INTERNAL",
        }
    }
}

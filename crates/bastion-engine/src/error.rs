//! Engine error taxonomy.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use bastion_policy::PolicyError;

/// Errors surfaced by the engine's HTTP surface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The deploy mode does not serve this endpoint.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::Invalid(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::AlreadyExists(_) => StatusCode::CONFLICT,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::Persistence(_) | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<PolicyError> for EngineError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::NotFound(m) => EngineError::NotFound(m),
            PolicyError::AlreadyExists(m) => EngineError::AlreadyExists(m),
            PolicyError::Invalid(m) => EngineError::Invalid(m),
            PolicyError::InvalidTransition { from, to } => {
                EngineError::Invalid(format!("invalid status transition: {from} -> {to}"))
            }
            PolicyError::ReadOnly => {
                EngineError::Forbidden("this node does not accept policy mutations".to_string())
            }
            other => EngineError::Persistence(other.to_string()),
        }
    }
}

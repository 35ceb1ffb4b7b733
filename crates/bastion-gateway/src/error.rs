//! Gateway error taxonomy.
//!
//! One enum covers client, policy, and backend failures; the
//! `IntoResponse` impl maps each kind to its HTTP status and a
//! single-sentence `{"error": ...}` body.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use bastion_core::CoreError;
use bastion_mcp::McpError;
use bastion_policy::PolicyError;

/// Errors surfaced by gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Client input rejected at validation.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Addressed entity absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Authentication failed or backend rejected credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not permitted.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The policy evaluator denied the request and the policy blocks.
    #[error("denied by policy: {reason}")]
    PolicyDeny { reason: String },

    /// Backend MCP server returned an error.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Backend unreachable (DNS, refused, reset).
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Per-server timeout exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Store write failed; in-memory state untouched.
    #[error("persistence: {0}")]
    Persistence(String),

    /// Bug.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Invalid(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::AlreadyExists(_) => StatusCode::CONFLICT,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) | GatewayError::PolicyDeny { .. } => StatusCode::FORBIDDEN,
            GatewayError::Upstream(_) | GatewayError::Unreachable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Persistence(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<CoreError> for GatewayError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Invalid(m) => GatewayError::Invalid(m),
            CoreError::NotFound(m) => GatewayError::NotFound(m),
            CoreError::AlreadyExists(m) => GatewayError::AlreadyExists(m),
            CoreError::Environment(m) => GatewayError::Internal(m),
            CoreError::Persistence(m) => GatewayError::Persistence(m),
            CoreError::Yaml(e) => GatewayError::Persistence(e.to_string()),
            CoreError::Io(e) => GatewayError::Persistence(e.to_string()),
        }
    }
}

impl From<McpError> for GatewayError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Credential(m) | McpError::Unsupported(m) => GatewayError::Unauthorized(m),
            McpError::Unauthorized(m) => GatewayError::Unauthorized(m),
            McpError::Unreachable(m) => GatewayError::Unreachable(m),
            McpError::Timeout(m) => GatewayError::Timeout(m),
            McpError::Upstream(m) => GatewayError::Upstream(m),
            McpError::Protocol(m) => GatewayError::Upstream(m),
            McpError::Serialization(e) => GatewayError::Internal(e.to_string()),
        }
    }
}

impl From<PolicyError> for GatewayError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::NotFound(m) => GatewayError::NotFound(m),
            PolicyError::AlreadyExists(m) => GatewayError::AlreadyExists(m),
            PolicyError::Invalid(m) => GatewayError::Invalid(m),
            PolicyError::InvalidTransition { from, to } => {
                GatewayError::Invalid(format!("invalid status transition: {from} -> {to}"))
            }
            PolicyError::ReadOnly => GatewayError::Forbidden("policy store is read-only".to_string()),
            other => GatewayError::Persistence(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(
            GatewayError::Invalid("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::AlreadyExists("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            GatewayError::PolicyDeny { reason: "r".into() }.status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::Unreachable("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::Timeout("x".into()).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}

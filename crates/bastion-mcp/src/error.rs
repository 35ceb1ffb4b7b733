//! Error types for the MCP crate.

use thiserror::Error;

/// Errors that can occur while resolving credentials or calling a backend.
#[derive(Debug, Error)]
pub enum McpError {
    /// A credential reference could not be resolved. The message names the
    /// reference, never the value.
    #[error("credential resolution failed: {0}")]
    Credential(String),

    /// A credential reference uses an unsupported scheme.
    #[error("unsupported credential scheme: {0}")]
    Unsupported(String),

    /// The backend rejected our credentials.
    #[error("backend rejected credentials: {0}")]
    Unauthorized(String),

    /// The backend could not be reached (connect, DNS, reset).
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The per-server timeout elapsed before a response arrived.
    #[error("backend call timed out: {0}")]
    Timeout(String),

    /// The backend returned an error (HTTP or JSON-RPC level).
    #[error("backend error: {0}")]
    Upstream(String),

    /// The backend response did not follow the JSON-RPC 2.0 contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

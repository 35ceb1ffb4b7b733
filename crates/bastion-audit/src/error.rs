//! Error types for the audit crate.

use thiserror::Error;

/// Errors that can occur while draining audit records.
#[derive(Debug, Error)]
pub enum AuditError {
    /// A storage backend failed to accept a record.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

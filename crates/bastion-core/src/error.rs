//! Error types for the core crate.

use thiserror::Error;

/// Errors raised while validating or persisting configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A field failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// A named entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A required environment variable is missing or malformed.
    #[error("environment: {0}")]
    Environment(String),

    /// Reading or writing a configuration file failed.
    #[error("persistence: {0}")]
    Persistence(String),

    /// YAML (de)serialization failed.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

//! Error types for the policy crate.

use thiserror::Error;

/// Errors raised by the policy store and evaluator.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// No policy with the given id or code.
    #[error("policy not found: {0}")]
    NotFound(String),

    /// `policy_code` uniqueness violation (case-insensitive).
    #[error("policy code already exists: {0}")]
    AlreadyExists(String),

    /// The policy document failed validation.
    #[error("invalid policy: {0}")]
    Invalid(String),

    /// A lifecycle transition is not permitted.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// The store is opened read-only (evaluation-only deployment).
    #[error("policy store is read-only")]
    ReadOnly,

    /// A write failed; in-memory state was left untouched.
    #[error("persistence: {0}")]
    Persistence(String),

    /// YAML (de)serialization failed.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

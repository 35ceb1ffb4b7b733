//! Audit record type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of the audited request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Error,
    /// The caller cancelled before the backend call completed.
    Cancelled,
}

/// One immutable audit record.
///
/// `parameters` carries the tool arguments as supplied by the caller;
/// credentials never appear here (auth material is composed after the
/// record's inputs are captured and logged only by name and length).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Authenticated subject, or `anonymous`.
    pub user: String,

    /// Gateway operation, e.g. `tools/call`, `servers/delete`.
    pub method: String,

    /// Backend server addressed, when the operation targets one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,

    pub status: AuditStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    pub duration_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Start a builder for the given operation.
    pub fn builder(user: impl Into<String>, method: impl Into<String>) -> AuditRecordBuilder {
        AuditRecordBuilder {
            record: AuditRecord {
                user: user.into(),
                method: method.into(),
                server: None,
                tool: None,
                parameters: None,
                status: AuditStatus::Success,
                status_code: None,
                duration_ms: 0,
                error: None,
                timestamp: Utc::now(),
            },
        }
    }
}

/// Builder for audit records.
#[derive(Debug)]
pub struct AuditRecordBuilder {
    record: AuditRecord,
}

impl AuditRecordBuilder {
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.record.server = Some(server.into());
        self
    }

    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.record.tool = Some(tool.into());
        self
    }

    pub fn parameters(mut self, parameters: serde_json::Value) -> Self {
        self.record.parameters = Some(parameters);
        self
    }

    pub fn duration_ms(mut self, duration: u64) -> Self {
        self.record.duration_ms = duration;
        self
    }

    pub fn status_code(mut self, code: u16) -> Self {
        self.record.status_code = Some(code);
        self
    }

    /// Mark the record failed with the given error text.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.record.status = AuditStatus::Error;
        self.record.error = Some(error.into());
        self
    }

    /// Mark the record cancelled; `duration_ms` holds the elapsed time at
    /// the moment of cancellation.
    pub fn cancelled(mut self) -> Self {
        self.record.status = AuditStatus::Cancelled;
        self
    }

    pub fn build(self) -> AuditRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_captures_outcome() {
        let record = AuditRecord::builder("dev@acme.io", "tools/call")
            .server("github")
            .tool("create_issue")
            .duration_ms(42)
            .build();
        assert_eq!(record.status, AuditStatus::Success);
        assert_eq!(record.server.as_deref(), Some("github"));

        let failed = AuditRecord::builder("dev@acme.io", "tools/call")
            .failed("backend unreachable")
            .build();
        assert_eq!(failed.status, AuditStatus::Error);
        assert!(failed.error.is_some());

        let cancelled = AuditRecord::builder("dev@acme.io", "tools/call")
            .duration_ms(87)
            .cancelled()
            .build();
        assert_eq!(cancelled.status, AuditStatus::Cancelled);
        assert_eq!(cancelled.duration_ms, 87);
    }
}

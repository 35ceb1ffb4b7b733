//! # bastion-audit
//!
//! Append-only, non-blocking audit logging.
//!
//! Every proxied request produces one [`AuditRecord`]. Records are pushed
//! through a bounded in-memory buffer to a background drain; when the
//! buffer is saturated records are dropped and counted rather than
//! blocking the request path.

pub mod error;
pub mod record;
pub mod sink;
pub mod storage;

pub use error::AuditError;
pub use record::{AuditRecord, AuditRecordBuilder, AuditStatus};
pub use sink::AuditSink;
pub use storage::AuditStorage;

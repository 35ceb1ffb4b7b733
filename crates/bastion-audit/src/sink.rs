//! Non-blocking audit sink.
//!
//! The sink hands records to a background drain over a bounded channel.
//! `record` never waits: when the buffer is full the record is dropped and
//! the drop counter incremented, so a slow or broken drain cannot stall
//! the request path.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bastion_core::AuditSettings;
use tokio::sync::mpsc;

use crate::error::AuditError;
use crate::record::AuditRecord;
use crate::storage;

/// Cheap-to-clone handle for emitting audit records.
#[derive(Clone)]
pub struct AuditSink {
    tx: Option<mpsc::Sender<AuditRecord>>,
    dropped: Arc<AtomicU64>,
}

impl AuditSink {
    /// A sink that swallows every record. Used in tests and when auditing
    /// is disabled.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build the sink and spawn its drain task.
    pub async fn spawn(settings: &AuditSettings) -> Result<Self, AuditError> {
        let Some(backend) = storage::create_storage(settings).await? else {
            return Ok(Self::disabled());
        };
        Ok(Self::with_storage(backend, settings.buffer))
    }

    /// Build the sink over an explicit drain. Tests and embedders use
    /// this to observe records directly.
    pub fn with_storage(backend: Box<dyn crate::storage::AuditStorage>, buffer: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditRecord>(buffer.max(1));
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = backend.store(&record).await {
                    tracing::warn!(error = %e, "audit drain failed to store record");
                }
            }
        });

        Self {
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit one record. Never blocks.
    pub fn record(&self, record: AuditRecord) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(record) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(error = %e, "audit buffer full, record dropped");
        }
    }

    /// Number of records dropped since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

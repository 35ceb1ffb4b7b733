//! Audit storage backends.

use async_trait::async_trait;
use bastion_core::{AuditBackendKind, AuditSettings};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::AuditError;
use crate::record::AuditRecord;

/// Trait for audit drains.
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Persist one record.
    async fn store(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Create a storage backend from configuration. Returns `None` for the
/// disabled backend.
pub async fn create_storage(
    settings: &AuditSettings,
) -> Result<Option<Box<dyn AuditStorage>>, AuditError> {
    match settings.backend {
        AuditBackendKind::Disabled => Ok(None),
        AuditBackendKind::Stdout => Ok(Some(Box::new(StdoutStorage))),
        AuditBackendKind::Sqlite => {
            let storage = SqliteStorage::open(&settings.db_path).await?;
            Ok(Some(Box::new(storage)))
        }
    }
}

/// Structured stdout drain: one JSON line per record.
pub struct StdoutStorage;

#[async_trait]
impl AuditStorage for StdoutStorage {
    async fn store(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let line = serde_json::to_string(record)?;
        println!("{line}");
        Ok(())
    }
}

/// Relational drain backed by a SQLite table.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if missing) the audit database and its table.
    pub async fn open(path: &str) -> Result<Self, AuditError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS audit_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user TEXT NOT NULL,
                method TEXT NOT NULL,
                server TEXT,
                tool TEXT,
                parameters TEXT,
                status TEXT NOT NULL,
                status_code INTEGER,
                duration_ms INTEGER NOT NULL,
                error TEXT,
                timestamp TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl AuditStorage for SqliteStorage {
    async fn store(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let parameters = record
            .parameters
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let status = match record.status {
            crate::record::AuditStatus::Success => "success",
            crate::record::AuditStatus::Error => "error",
            crate::record::AuditStatus::Cancelled => "cancelled",
        };

        sqlx::query(
            "INSERT INTO audit_records
                (user, method, server, tool, parameters, status, status_code, duration_ms, error, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&record.user)
        .bind(&record.method)
        .bind(&record.server)
        .bind(&record.tool)
        .bind(parameters)
        .bind(status)
        .bind(record.status_code.map(i64::from))
        .bind(record.duration_ms as i64)
        .bind(&record.error)
        .bind(record.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

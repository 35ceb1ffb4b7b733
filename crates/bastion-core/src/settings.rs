//! Process settings resolved from the environment.
//!
//! Both services read the same [`Settings`] struct; each uses the subset it
//! needs. Unset variables fall back to defaults suitable for local
//! development. A malformed value is a fatal startup condition.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::CoreError;

/// Audit drain selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditBackendKind {
    #[default]
    Stdout,
    Sqlite,
    Disabled,
}

/// Audit sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    #[serde(default)]
    pub backend: AuditBackendKind,

    /// SQLite file for the relational drain.
    #[serde(default = "default_audit_db_path")]
    pub db_path: String,

    /// In-memory buffer capacity; records beyond it are dropped and counted.
    #[serde(default = "default_audit_buffer")]
    pub buffer: usize,
}

fn default_audit_db_path() -> String {
    "data/audit.sqlite".to_string()
}

fn default_audit_buffer() -> usize {
    1024
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            backend: AuditBackendKind::default(),
            db_path: default_audit_db_path(),
            buffer: default_audit_buffer(),
        }
    }
}

/// Settings for the gateway and policy engine processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Gateway listen port (`SERVER_PORT`).
    pub port: u16,

    /// Policy engine listen port (`ENGINE_PORT`).
    pub engine_port: u16,

    /// Public base URL of the gateway, used to derive group gateway URLs
    /// (`GATEWAY_URL`).
    pub public_url: String,

    /// Base URL the gateway uses to reach the policy engine
    /// (`POLICY_ENGINE_URL`).
    pub policy_engine_url: String,

    /// Server registry file (`SERVERS_FILE`).
    pub servers_file: PathBuf,

    /// Group registry file (`GROUPS_FILE`).
    pub groups_file: PathBuf,

    /// Policy store directory (`POLICY_DIR`).
    pub policy_dir: PathBuf,

    /// Whether the engine serves evaluation (`ENABLE_EVALUATION`).
    pub enable_evaluation: bool,

    /// Whether the engine serves policy management (`ENABLE_MANAGEMENT`).
    pub enable_management: bool,

    /// Whether gateway requests must carry an authenticated subject
    /// (`AUTH_REQUIRED`).
    pub auth_required: bool,

    /// Seconds between policy directory freshness scans on evaluation
    /// nodes (`POLICY_RELOAD_SECS`).
    pub policy_reload_secs: u64,

    pub audit: AuditSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8000,
            engine_port: 8181,
            public_url: "http://127.0.0.1:8000".to_string(),
            policy_engine_url: "http://127.0.0.1:8181".to_string(),
            servers_file: PathBuf::from("servers.yaml"),
            groups_file: PathBuf::from("groups.yaml"),
            policy_dir: PathBuf::from("policies"),
            enable_evaluation: true,
            enable_management: true,
            auth_required: false,
            policy_reload_secs: 5,
            audit: AuditSettings::default(),
        }
    }
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Result<Self, CoreError> {
        let mut s = Settings::default();

        if let Some(v) = var("SERVER_PORT") {
            s.port = parse(&v, "SERVER_PORT")?;
            s.public_url = format!("http://127.0.0.1:{}", s.port);
        }
        if let Some(v) = var("ENGINE_PORT") {
            s.engine_port = parse(&v, "ENGINE_PORT")?;
        }
        if let Some(v) = var("GATEWAY_URL") {
            s.public_url = v;
        }
        if let Some(v) = var("POLICY_ENGINE_URL") {
            s.policy_engine_url = v;
        }
        if let Some(v) = var("SERVERS_FILE") {
            s.servers_file = PathBuf::from(v);
        }
        if let Some(v) = var("GROUPS_FILE") {
            s.groups_file = PathBuf::from(v);
        }
        if let Some(v) = var("POLICY_DIR") {
            s.policy_dir = PathBuf::from(v);
        }
        if let Some(v) = var("ENABLE_EVALUATION") {
            s.enable_evaluation = parse_bool(&v, "ENABLE_EVALUATION")?;
        }
        if let Some(v) = var("ENABLE_MANAGEMENT") {
            s.enable_management = parse_bool(&v, "ENABLE_MANAGEMENT")?;
        }
        if let Some(v) = var("AUTH_REQUIRED") {
            s.auth_required = parse_bool(&v, "AUTH_REQUIRED")?;
        }
        if let Some(v) = var("POLICY_RELOAD_SECS") {
            s.policy_reload_secs = parse(&v, "POLICY_RELOAD_SECS")?;
        }
        if let Some(v) = var("AUDIT_BACKEND") {
            s.audit.backend = match v.to_ascii_lowercase().as_str() {
                "stdout" => AuditBackendKind::Stdout,
                "sqlite" => AuditBackendKind::Sqlite,
                "disabled" => AuditBackendKind::Disabled,
                other => {
                    return Err(CoreError::Environment(format!(
                        "AUDIT_BACKEND must be stdout|sqlite|disabled, got '{other}'"
                    )));
                }
            };
        }
        if let Some(v) = var("AUDIT_DB_PATH") {
            s.audit.db_path = v;
        }

        if !s.enable_evaluation && !s.enable_management {
            return Err(CoreError::Environment(
                "at least one of ENABLE_EVALUATION / ENABLE_MANAGEMENT must be true".to_string(),
            ));
        }

        Ok(s)
    }

    /// Log filter directive from `LOG_LEVEL` (fallback `RUST_LOG`,
    /// default `info`).
    pub fn log_filter() -> String {
        var("LOG_LEVEL")
            .or_else(|| var("RUST_LOG"))
            .unwrap_or_else(|| "info".to_string())
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse<T: std::str::FromStr>(v: &str, name: &str) -> Result<T, CoreError> {
    v.parse()
        .map_err(|_| CoreError::Environment(format!("{name} has invalid value '{v}'")))
}

fn parse_bool(v: &str, name: &str) -> Result<bool, CoreError> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CoreError::Environment(format!(
            "{name} must be a boolean, got '{v}'"
        ))),
    }
}

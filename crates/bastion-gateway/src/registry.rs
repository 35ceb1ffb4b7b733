//! Backend server registry.
//!
//! Authoritative set of backend MCP server configs, persisted to a single
//! YAML file (top-level `servers:` map keyed by name) and cached in memory
//! behind a read-write lock. Every mutation writes a timestamped backup of
//! the prior file, then replaces the file atomically, then updates the
//! cache before releasing the write lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use bastion_core::BackendServer;

use crate::error::GatewayError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: BTreeMap<String, BackendServer>,
}

/// Registry over the configured backend servers.
pub struct ServerRegistry {
    path: PathBuf,
    inner: RwLock<BTreeMap<String, BackendServer>>,
}

impl ServerRegistry {
    /// Open the registry, loading the file when present.
    ///
    /// A missing file starts an empty registry (created on first write); an
    /// unparsable file is a fatal startup condition, recoverable only by
    /// restoring a backup.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GatewayError> {
        let path = path.into();
        let servers = load_file(&path)?;
        tracing::info!(file = %path.display(), servers = servers.len(), "server registry loaded");
        Ok(Self {
            path,
            inner: RwLock::new(servers),
        })
    }

    /// All servers in name order.
    pub async fn list(&self) -> Vec<BackendServer> {
        self.inner.read().await.values().cloned().collect()
    }

    /// All enabled servers in name order. Registry iteration order breaks
    /// ties in tool routing.
    pub async fn list_enabled(&self) -> Vec<BackendServer> {
        self.inner
            .read()
            .await
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect()
    }

    pub async fn get(&self, name: &str) -> Result<BackendServer, GatewayError> {
        self.inner
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("server '{name}' is not registered")))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.inner.read().await.contains_key(name)
    }

    pub async fn create(&self, server: BackendServer) -> Result<BackendServer, GatewayError> {
        server.validate()?;
        let mut inner = self.inner.write().await;
        if inner.contains_key(&server.name) {
            return Err(GatewayError::AlreadyExists(format!(
                "server '{}' already exists",
                server.name
            )));
        }
        let mut next = inner.clone();
        next.insert(server.name.clone(), server.clone());
        persist(&self.path, &next)?;
        *inner = next;
        Ok(server)
    }

    /// Replace a server's config. Renames are not supported; the payload
    /// name must match the addressed name.
    pub async fn update(&self, name: &str, server: BackendServer) -> Result<BackendServer, GatewayError> {
        if server.name != name {
            return Err(GatewayError::Invalid(format!(
                "server name is immutable ('{name}' != '{}')",
                server.name
            )));
        }
        server.validate()?;
        let mut inner = self.inner.write().await;
        if !inner.contains_key(name) {
            return Err(GatewayError::NotFound(format!(
                "server '{name}' is not registered"
            )));
        }
        let mut next = inner.clone();
        next.insert(name.to_string(), server.clone());
        persist(&self.path, &next)?;
        *inner = next;
        Ok(server)
    }

    /// Remove a server, returning its final config so the caller can run
    /// the policy-delete cascade and group cleanup.
    pub async fn delete(&self, name: &str) -> Result<BackendServer, GatewayError> {
        let mut inner = self.inner.write().await;
        let mut next = inner.clone();
        let Some(removed) = next.remove(name) else {
            return Err(GatewayError::NotFound(format!(
                "server '{name}' is not registered"
            )));
        };
        persist(&self.path, &next)?;
        *inner = next;
        Ok(removed)
    }

    /// Discard the cache and re-read the file.
    pub async fn reload(&self) -> Result<usize, GatewayError> {
        let servers = load_file(&self.path)?;
        let count = servers.len();
        *self.inner.write().await = servers;
        tracing::info!(servers = count, "server registry reloaded");
        Ok(count)
    }
}

fn load_file(path: &Path) -> Result<BTreeMap<String, BackendServer>, GatewayError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| GatewayError::Persistence(format!("read {}: {e}", path.display())))?;
    let file: ServersFile = serde_yaml::from_str(&text)
        .map_err(|e| GatewayError::Persistence(format!("parse {}: {e}", path.display())))?;

    // The map key is authoritative for the name.
    let mut servers = BTreeMap::new();
    for (name, mut server) in file.servers {
        server.name = name.clone();
        servers.insert(name, server);
    }
    Ok(servers)
}

/// Back up the existing file, then write-and-rename the new content.
fn persist(path: &Path, servers: &BTreeMap<String, BackendServer>) -> Result<(), GatewayError> {
    if path.exists() {
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let backup = path.with_file_name(format!(
            "{}.backup.{stamp}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("servers.yaml")
        ));
        std::fs::copy(path, &backup)
            .map_err(|e| GatewayError::Persistence(format!("backup {}: {e}", backup.display())))?;
    } else if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GatewayError::Persistence(e.to_string()))?;
        }
    }

    let file = ServersFile {
        servers: servers.clone(),
    };
    let text = serde_yaml::to_string(&file)
        .map_err(|e| GatewayError::Persistence(e.to_string()))?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, text)
        .map_err(|e| GatewayError::Persistence(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| GatewayError::Persistence(format!("rename {}: {e}", path.display())))?;
    Ok(())
}

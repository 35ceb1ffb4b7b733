//! Server group registry.
//!
//! Groups bundle HTTP backend servers into virtual MCP endpoints. The
//! registry persists to its own YAML file (`groups:` map keyed by id plus
//! a persisted id counter) with the same backup-then-replace discipline as
//! the server registry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use bastion_core::{ServerGroup, TransportKind};

use crate::error::GatewayError;
use crate::registry::ServerRegistry;

#[derive(Debug, Default, Serialize, Deserialize)]
struct GroupsFile {
    #[serde(default = "default_next_id")]
    next_id: u64,
    #[serde(default)]
    groups: BTreeMap<String, ServerGroup>,
}

fn default_next_id() -> u64 {
    1
}

/// Payload for creating or updating a group.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub server_names: Vec<String>,
    #[serde(default)]
    pub tool_config: bastion_core::GroupToolConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Registry over server groups.
pub struct GroupRegistry {
    path: PathBuf,
    inner: RwLock<GroupsFile>,
}

impl GroupRegistry {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GatewayError> {
        let path = path.into();
        let file = load_file(&path)?;
        tracing::info!(file = %path.display(), groups = file.groups.len(), "group registry loaded");
        Ok(Self {
            path,
            inner: RwLock::new(file),
        })
    }

    pub async fn list(&self) -> Vec<ServerGroup> {
        self.inner.read().await.groups.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Result<ServerGroup, GatewayError> {
        self.inner
            .read()
            .await
            .groups
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("group '{id}' does not exist")))
    }

    pub async fn create(
        &self,
        spec: GroupSpec,
        registry: &ServerRegistry,
    ) -> Result<ServerGroup, GatewayError> {
        validate_members(&spec.server_names, registry).await?;

        let mut inner = self.inner.write().await;
        let name_taken = inner
            .groups
            .values()
            .any(|g| g.name.eq_ignore_ascii_case(&spec.name));
        if name_taken {
            return Err(GatewayError::AlreadyExists(format!(
                "group '{}' already exists",
                spec.name
            )));
        }

        let group = ServerGroup {
            id: inner.next_id.to_string(),
            name: spec.name,
            description: spec.description,
            server_names: spec.server_names,
            tool_config: spec.tool_config,
            enabled: spec.enabled,
        };
        group.validate()?;

        let mut next = clone_file(&inner);
        next.next_id += 1;
        next.groups.insert(group.id.clone(), group.clone());
        persist(&self.path, &next)?;
        *inner = next;
        Ok(group)
    }

    pub async fn update(
        &self,
        id: &str,
        spec: GroupSpec,
        registry: &ServerRegistry,
    ) -> Result<ServerGroup, GatewayError> {
        validate_members(&spec.server_names, registry).await?;

        let mut inner = self.inner.write().await;
        if !inner.groups.contains_key(id) {
            return Err(GatewayError::NotFound(format!("group '{id}' does not exist")));
        }
        let name_taken = inner
            .groups
            .values()
            .any(|g| g.id != id && g.name.eq_ignore_ascii_case(&spec.name));
        if name_taken {
            return Err(GatewayError::AlreadyExists(format!(
                "group '{}' already exists",
                spec.name
            )));
        }

        let group = ServerGroup {
            id: id.to_string(),
            name: spec.name,
            description: spec.description,
            server_names: spec.server_names,
            tool_config: spec.tool_config,
            enabled: spec.enabled,
        };
        group.validate()?;

        let mut next = clone_file(&inner);
        next.groups.insert(id.to_string(), group.clone());
        persist(&self.path, &next)?;
        *inner = next;
        Ok(group)
    }

    pub async fn delete(&self, id: &str) -> Result<(), GatewayError> {
        let mut inner = self.inner.write().await;
        let mut next = clone_file(&inner);
        if next.groups.remove(id).is_none() {
            return Err(GatewayError::NotFound(format!("group '{id}' does not exist")));
        }
        persist(&self.path, &next)?;
        *inner = next;
        Ok(())
    }

    pub async fn add_server(
        &self,
        id: &str,
        server_name: &str,
        registry: &ServerRegistry,
    ) -> Result<ServerGroup, GatewayError> {
        let names = [server_name.to_string()];
        validate_members(&names, registry).await?;

        let mut inner = self.inner.write().await;
        let Some(existing) = inner.groups.get(id) else {
            return Err(GatewayError::NotFound(format!("group '{id}' does not exist")));
        };
        let mut group = existing.clone();
        if group.server_names.iter().any(|s| s == server_name) {
            return Ok(group);
        }
        group.server_names.push(server_name.to_string());

        let mut next = clone_file(&inner);
        next.groups.insert(id.to_string(), group.clone());
        persist(&self.path, &next)?;
        *inner = next;
        Ok(group)
    }

    pub async fn remove_server(
        &self,
        id: &str,
        server_name: &str,
    ) -> Result<ServerGroup, GatewayError> {
        let mut inner = self.inner.write().await;
        let Some(existing) = inner.groups.get(id) else {
            return Err(GatewayError::NotFound(format!("group '{id}' does not exist")));
        };
        let mut group = existing.clone();
        group.server_names.retain(|s| s != server_name);
        group.tool_config.remove(server_name);

        let mut next = clone_file(&inner);
        next.groups.insert(id.to_string(), group.clone());
        persist(&self.path, &next)?;
        *inner = next;
        Ok(group)
    }

    /// Set the group-level tool filter for a member server. `None`, `[]`,
    /// and `["*"]` all mean "no group restriction".
    pub async fn configure_tools(
        &self,
        id: &str,
        server_name: &str,
        tools: Option<Vec<String>>,
    ) -> Result<ServerGroup, GatewayError> {
        let mut inner = self.inner.write().await;
        let Some(existing) = inner.groups.get(id) else {
            return Err(GatewayError::NotFound(format!("group '{id}' does not exist")));
        };
        if !existing.server_names.iter().any(|s| s == server_name) {
            return Err(GatewayError::Invalid(format!(
                "server '{server_name}' is not a member of group '{id}'"
            )));
        }
        let mut group = existing.clone();
        group.tool_config.insert(server_name.to_string(), tools);

        let mut next = clone_file(&inner);
        next.groups.insert(id.to_string(), group.clone());
        persist(&self.path, &next)?;
        *inner = next;
        Ok(group)
    }

    /// Drop a deleted server from every group referencing it. Invoked from
    /// the server-delete path.
    pub async fn remove_server_everywhere(&self, server_name: &str) -> Result<usize, GatewayError> {
        let mut inner = self.inner.write().await;
        let mut next = clone_file(&inner);
        let mut touched = 0;
        for group in next.groups.values_mut() {
            let before = group.server_names.len();
            group.server_names.retain(|s| s != server_name);
            group.tool_config.remove(server_name);
            if group.server_names.len() != before {
                touched += 1;
            }
        }
        if touched > 0 {
            persist(&self.path, &next)?;
            *inner = next;
        }
        Ok(touched)
    }
}

async fn validate_members(
    names: &[String],
    registry: &ServerRegistry,
) -> Result<(), GatewayError> {
    for name in names {
        let server = registry.get(name).await.map_err(|_| {
            GatewayError::Invalid(format!("server '{name}' does not exist"))
        })?;
        if server.transport != TransportKind::Http {
            return Err(GatewayError::Invalid(format!(
                "server '{name}' is {} transport; groups accept only http servers",
                server.transport
            )));
        }
    }
    Ok(())
}

fn clone_file(file: &GroupsFile) -> GroupsFile {
    GroupsFile {
        next_id: file.next_id,
        groups: file.groups.clone(),
    }
}

fn load_file(path: &Path) -> Result<GroupsFile, GatewayError> {
    if !path.exists() {
        return Ok(GroupsFile {
            next_id: 1,
            groups: BTreeMap::new(),
        });
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| GatewayError::Persistence(format!("read {}: {e}", path.display())))?;
    serde_yaml::from_str(&text)
        .map_err(|e| GatewayError::Persistence(format!("parse {}: {e}", path.display())))
}

fn persist(path: &Path, file: &GroupsFile) -> Result<(), GatewayError> {
    if path.exists() {
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let backup = path.with_file_name(format!(
            "{}.backup.{stamp}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("groups.yaml")
        ));
        std::fs::copy(path, &backup)
            .map_err(|e| GatewayError::Persistence(format!("backup {}: {e}", backup.display())))?;
    } else if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GatewayError::Persistence(e.to_string()))?;
        }
    }
    let text = serde_yaml::to_string(file)
        .map_err(|e| GatewayError::Persistence(e.to_string()))?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, text)
        .map_err(|e| GatewayError::Persistence(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| GatewayError::Persistence(format!("rename {}: {e}", path.display())))?;
    Ok(())
}

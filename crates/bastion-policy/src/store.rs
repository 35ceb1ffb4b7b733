//! File-backed policy store.
//!
//! One YAML file per policy, named `{policy_id}.yaml` (`.yml` accepted on
//! load). The whole document is serialized atomically (write to a `.tmp`
//! sibling, then rename) so readers never see a torn file. All files are
//! loaded at startup; individual parse failures are logged and skipped.
//!
//! An in-memory `resource_key -> [policy_id]` multimap serves indexed
//! lookups. Every mutation writes the file first and only then updates the
//! in-memory state, so a failed write leaves the previous state intact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::PolicyError;
use crate::model::{Policy, PolicyDraft, PolicyStatus, ResourceBinding, ResourceType};

/// Filter for [`PolicyStore::list`].
#[derive(Debug, Clone, Default)]
pub struct PolicyFilter {
    pub status: Option<PolicyStatus>,
    pub resource_type: Option<ResourceType>,
    pub resource_id: Option<String>,
    pub owner_id: Option<String>,
    /// Case-insensitive substring match on name or code.
    pub search: Option<String>,
}

#[derive(Debug, Default)]
struct StoreInner {
    policies: HashMap<Uuid, Policy>,
    /// `{resource_type}:{resource_id}` -> policy ids.
    by_resource: HashMap<String, Vec<Uuid>>,
    /// Lowercased policy_code -> policy id.
    by_code: HashMap<String, Uuid>,
    /// Directory fingerprint at load time: file count and newest mtime.
    scan_stamp: (usize, Option<SystemTime>),
}

impl StoreInner {
    fn index(&mut self, policy: &Policy) {
        self.by_code
            .insert(policy.policy_code.to_lowercase(), policy.policy_id);
        for binding in &policy.resources {
            self.by_resource
                .entry(binding.key())
                .or_default()
                .push(policy.policy_id);
        }
    }

    fn unindex(&mut self, policy: &Policy) {
        self.by_code.remove(&policy.policy_code.to_lowercase());
        for binding in &policy.resources {
            if let Some(ids) = self.by_resource.get_mut(&binding.key()) {
                ids.retain(|id| *id != policy.policy_id);
                if ids.is_empty() {
                    self.by_resource.remove(&binding.key());
                }
            }
        }
    }
}

/// The policy store. Cheap to share behind an `Arc`.
pub struct PolicyStore {
    dir: PathBuf,
    read_only: bool,
    inner: RwLock<StoreInner>,
}

impl PolicyStore {
    /// Open a store over `dir`, loading every policy file.
    ///
    /// With `read_only` the directory must already exist and no mutation is
    /// accepted; evaluation-only deployments use this mode. Otherwise the
    /// directory is created when missing.
    pub async fn open(dir: impl Into<PathBuf>, read_only: bool) -> Result<Self, PolicyError> {
        let dir = dir.into();
        if !dir.exists() {
            if read_only {
                return Err(PolicyError::Persistence(format!(
                    "policy directory '{}' does not exist",
                    dir.display()
                )));
            }
            std::fs::create_dir_all(&dir)?;
        }

        let inner = load_dir(&dir)?;
        tracing::info!(
            dir = %dir.display(),
            policies = inner.policies.len(),
            read_only,
            "policy store opened"
        );
        Ok(Self {
            dir,
            read_only,
            inner: RwLock::new(inner),
        })
    }

    /// Re-read the whole directory, replacing the in-memory state.
    /// Returns the number of policies loaded.
    pub async fn reload(&self) -> Result<usize, PolicyError> {
        let fresh = load_dir(&self.dir)?;
        let count = fresh.policies.len();
        *self.inner.write().await = fresh;
        tracing::info!(policies = count, "policy store reloaded");
        Ok(count)
    }

    /// Whether the directory changed on disk since the last load. Used by
    /// evaluation nodes in split deployments to detect external writes.
    pub async fn modified_since_load(&self) -> bool {
        let current = scan_stamp(&self.dir);
        let inner = self.inner.read().await;
        current != inner.scan_stamp
    }

    pub async fn list(&self, filter: &PolicyFilter) -> Vec<Policy> {
        let inner = self.inner.read().await;
        let mut out: Vec<Policy> = inner
            .policies
            .values()
            .filter(|p| matches_filter(p, filter))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        out
    }

    pub async fn get(&self, id: Uuid) -> Option<Policy> {
        self.inner.read().await.policies.get(&id).cloned()
    }

    pub async fn get_by_code(&self, code: &str) -> Option<Policy> {
        let inner = self.inner.read().await;
        let id = inner.by_code.get(&code.to_lowercase())?;
        inner.policies.get(id).cloned()
    }

    /// Policies bound to `(resource_type, resource_id)`.
    ///
    /// A `tool` binding `server:tool` scopes its server too: querying for
    /// `mcp_server:S` also returns policies bound only to `tool:S:*`, which
    /// is what the gateway's tool filter consumes.
    pub async fn get_by_resource(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        active_only: bool,
    ) -> Vec<Policy> {
        let inner = self.inner.read().await;
        let mut ids: Vec<Uuid> = inner
            .by_resource
            .get(&format!("{resource_type}:{resource_id}"))
            .cloned()
            .unwrap_or_default();

        if resource_type == ResourceType::McpServer {
            let tool_prefix = format!("tool:{resource_id}:");
            for (key, more) in &inner.by_resource {
                if key.starts_with(&tool_prefix) {
                    ids.extend(more.iter().copied());
                }
            }
        }

        ids.sort();
        ids.dedup();

        let now = Utc::now();
        ids.iter()
            .filter_map(|id| inner.policies.get(id))
            .filter(|p| !active_only || p.is_active_at(now))
            .cloned()
            .collect()
    }

    /// Active candidate set for an evaluation: policies indexed under any
    /// of `keys`, plus all global policies.
    pub async fn candidates(&self, keys: &[String]) -> Vec<Policy> {
        let inner = self.inner.read().await;
        let now = Utc::now();
        let mut ids: Vec<Uuid> = keys
            .iter()
            .filter_map(|k| inner.by_resource.get(k))
            .flatten()
            .copied()
            .collect();
        ids.sort();
        ids.dedup();

        let mut out: Vec<Policy> = ids
            .iter()
            .filter_map(|id| inner.policies.get(id))
            .filter(|p| p.is_active_at(now))
            .cloned()
            .collect();
        out.extend(
            inner
                .policies
                .values()
                .filter(|p| p.is_global() && p.is_active_at(now))
                .cloned(),
        );
        out
    }

    pub async fn create(&self, draft: PolicyDraft) -> Result<Policy, PolicyError> {
        self.ensure_writable()?;
        draft.validate()?;

        let mut inner = self.inner.write().await;

        if inner.by_code.contains_key(&draft.policy_code.to_lowercase()) {
            return Err(PolicyError::AlreadyExists(draft.policy_code));
        }
        let id = draft.policy_id.unwrap_or_else(Uuid::new_v4);
        if inner.policies.contains_key(&id) {
            return Err(PolicyError::AlreadyExists(id.to_string()));
        }

        let now = Utc::now();
        let policy = Policy {
            policy_id: id,
            policy_code: draft.policy_code,
            name: draft.name,
            description: draft.description,
            status: draft.status.unwrap_or(PolicyStatus::Draft),
            priority: draft.priority,
            effective_from: draft.effective_from,
            effective_to: draft.effective_to,
            version: 1,
            created_at: now,
            updated_at: now,
            owner_id: draft.owner_id,
            org_id: draft.org_id,
            resources: draft.resources,
            scopes: draft.scopes,
            policy_rules: draft.policy_rules,
            enforcement: draft.enforcement,
        };

        self.write_file(&policy)?;
        inner.index(&policy);
        inner.policies.insert(id, policy.clone());
        Ok(policy)
    }

    pub async fn update(&self, id: Uuid, draft: PolicyDraft) -> Result<Policy, PolicyError> {
        self.ensure_writable()?;
        draft.validate()?;

        let mut inner = self.inner.write().await;
        let existing = inner
            .policies
            .get(&id)
            .cloned()
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))?;

        let code_key = draft.policy_code.to_lowercase();
        if let Some(holder) = inner.by_code.get(&code_key) {
            if *holder != id {
                return Err(PolicyError::AlreadyExists(draft.policy_code));
            }
        }

        let updated = Policy {
            policy_id: id,
            policy_code: draft.policy_code,
            name: draft.name,
            description: draft.description,
            status: draft.status.unwrap_or(existing.status),
            priority: draft.priority,
            effective_from: draft.effective_from,
            effective_to: draft.effective_to,
            version: existing.version + 1,
            created_at: existing.created_at,
            updated_at: Utc::now(),
            owner_id: draft.owner_id,
            org_id: draft.org_id,
            resources: draft.resources,
            scopes: draft.scopes,
            policy_rules: draft.policy_rules,
            enforcement: draft.enforcement,
        };

        self.write_file(&updated)?;
        inner.unindex(&existing);
        inner.index(&updated);
        inner.policies.insert(id, updated.clone());
        Ok(updated)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), PolicyError> {
        self.ensure_writable()?;
        let mut inner = self.inner.write().await;
        let existing = inner
            .policies
            .get(&id)
            .cloned()
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))?;

        for ext in ["yaml", "yml"] {
            let path = self.dir.join(format!("{id}.{ext}"));
            if path.exists() {
                std::fs::remove_file(&path)
                    .map_err(|e| PolicyError::Persistence(format!("delete {}: {e}", path.display())))?;
            }
        }

        inner.unindex(&existing);
        inner.policies.remove(&id);
        Ok(())
    }

    /// Lifecycle transition (`activate`, `suspend`, `retire`). Counts as a
    /// mutation: bumps version and `updated_at`.
    pub async fn set_status(&self, id: Uuid, to: PolicyStatus) -> Result<Policy, PolicyError> {
        self.ensure_writable()?;
        let mut inner = self.inner.write().await;
        let mut policy = inner
            .policies
            .get(&id)
            .cloned()
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))?;

        if policy.status != to && !policy.status.can_transition(to) {
            return Err(PolicyError::InvalidTransition {
                from: policy.status.to_string(),
                to: to.to_string(),
            });
        }

        policy.status = to;
        policy.version += 1;
        policy.updated_at = Utc::now();

        self.write_file(&policy)?;
        inner.policies.insert(id, policy.clone());
        Ok(policy)
    }

    pub async fn add_resource(
        &self,
        id: Uuid,
        binding: ResourceBinding,
    ) -> Result<Policy, PolicyError> {
        self.ensure_writable()?;
        let mut inner = self.inner.write().await;
        let mut policy = inner
            .policies
            .get(&id)
            .cloned()
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))?;

        if policy.resources.contains(&binding) {
            return Ok(policy);
        }
        policy.resources.push(binding.clone());
        policy.version += 1;
        policy.updated_at = Utc::now();

        self.write_file(&policy)?;
        inner
            .by_resource
            .entry(binding.key())
            .or_default()
            .push(id);
        inner.policies.insert(id, policy.clone());
        Ok(policy)
    }

    pub async fn remove_resource(
        &self,
        id: Uuid,
        binding: &ResourceBinding,
    ) -> Result<Policy, PolicyError> {
        self.ensure_writable()?;
        let mut inner = self.inner.write().await;
        let mut policy = inner
            .policies
            .get(&id)
            .cloned()
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))?;

        let before = policy.resources.len();
        policy.resources.retain(|b| b != binding);
        if policy.resources.len() == before {
            return Ok(policy);
        }
        policy.version += 1;
        policy.updated_at = Utc::now();

        self.write_file(&policy)?;
        if let Some(ids) = inner.by_resource.get_mut(&binding.key()) {
            ids.retain(|pid| *pid != id);
            if ids.is_empty() {
                inner.by_resource.remove(&binding.key());
            }
        }
        inner.policies.insert(id, policy.clone());
        Ok(policy)
    }

    fn ensure_writable(&self) -> Result<(), PolicyError> {
        if self.read_only {
            Err(PolicyError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Serialize atomically: write a `.tmp` sibling, then rename over the
    /// final path.
    fn write_file(&self, policy: &Policy) -> Result<(), PolicyError> {
        let path = self.dir.join(format!("{}.yaml", policy.policy_id));
        let tmp = self.dir.join(format!("{}.yaml.tmp", policy.policy_id));
        let text = serde_yaml::to_string(policy)?;
        std::fs::write(&tmp, text)
            .map_err(|e| PolicyError::Persistence(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| PolicyError::Persistence(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }
}

fn matches_filter(policy: &Policy, filter: &PolicyFilter) -> bool {
    if let Some(status) = filter.status {
        if policy.status != status {
            return false;
        }
    }
    if let Some(rt) = filter.resource_type {
        let id_matches = |b: &ResourceBinding| {
            b.resource_type == rt
                && filter
                    .resource_id
                    .as_deref()
                    .is_none_or(|id| b.resource_id == id)
        };
        if !policy.resources.iter().any(id_matches) {
            return false;
        }
    }
    if let Some(owner) = filter.owner_id.as_deref() {
        if policy.owner_id != owner {
            return false;
        }
    }
    if let Some(search) = filter.search.as_deref() {
        let needle = search.to_lowercase();
        if !policy.name.to_lowercase().contains(&needle)
            && !policy.policy_code.to_lowercase().contains(&needle)
        {
            return false;
        }
    }
    true
}

fn is_policy_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn load_dir(dir: &Path) -> Result<StoreInner, PolicyError> {
    let mut inner = StoreInner {
        scan_stamp: scan_stamp(dir),
        ..StoreInner::default()
    };

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !is_policy_file(&path) {
            continue;
        }
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "skipping unreadable policy file");
                continue;
            }
        };
        match serde_yaml::from_str::<Policy>(&text) {
            Ok(policy) => {
                inner.index(&policy);
                inner.policies.insert(policy.policy_id, policy);
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "skipping unparsable policy file");
            }
        }
    }
    Ok(inner)
}

fn scan_stamp(dir: &Path) -> (usize, Option<SystemTime>) {
    let mut count = 0;
    let mut newest: Option<SystemTime> = None;
    let Ok(entries) = std::fs::read_dir(dir) else {
        return (0, None);
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !is_policy_file(&path) {
            continue;
        }
        count += 1;
        if let Ok(mtime) = entry.metadata().and_then(|m| m.modified()) {
            newest = Some(newest.map_or(mtime, |n| n.max(mtime)));
        }
    }
    (count, newest)
}

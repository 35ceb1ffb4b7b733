//! Server groups.
//!
//! A group bundles HTTP backend servers into a single virtual MCP endpoint
//! (`/mcp/group/{id}/mcp`) with per-server tool visibility.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CoreError;

/// Per-server tool visibility inside a group.
///
/// `None` and `[]` mean no group restriction (policy filtering still
/// applies); `["*"]` is an explicit "all" with the same semantics; an
/// explicit list exposes only those tool names.
pub type GroupToolConfig = HashMap<String, Option<Vec<String>>>;

/// A named collection of HTTP backend servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerGroup {
    /// Assigned identifier, stable for the lifetime of the group.
    pub id: String,

    /// Unique name (case-insensitive).
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Member servers, in insertion order. All must be HTTP transport.
    #[serde(default)]
    pub server_names: Vec<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tool_config: GroupToolConfig,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ServerGroup {
    /// The derived MCP endpoint for this group.
    pub fn gateway_url(&self, public_base: &str) -> String {
        format!("{}/mcp/group/{}/mcp", public_base.trim_end_matches('/'), self.id)
    }

    /// Whether the group config leaves a server unrestricted.
    pub fn is_unrestricted(tools: Option<&Vec<String>>) -> bool {
        match tools {
            None => true,
            Some(list) => list.is_empty() || (list.len() == 1 && list[0] == "*"),
        }
    }

    /// Group-level tool filter for a member server. `None` means no
    /// restriction.
    pub fn tools_for(&self, server: &str) -> Option<&Vec<String>> {
        match self.tool_config.get(server) {
            Some(Some(list)) if !Self::is_unrestricted(Some(list)) => Some(list),
            _ => None,
        }
    }

    /// Validate structural invariants that do not need the registry:
    /// tool_config keys must be members.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Invalid("group name must not be empty".to_string()));
        }
        for key in self.tool_config.keys() {
            if !self.server_names.iter().any(|s| s == key) {
                return Err(CoreError::Invalid(format!(
                    "tool_config references '{key}' which is not a group member"
                )));
            }
        }
        Ok(())
    }
}

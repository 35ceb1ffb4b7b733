//! Evaluation context and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The subject on whose behalf a request is made.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectContext {
    #[serde(default)]
    pub email: String,
    #[serde(rename = "type", default)]
    pub subject_type: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Transport-level request metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMeta {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// OAuth claims forwarded by the fronting authenticator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OauthContext {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub verified: bool,
}

/// The backend server addressed by the request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerContext {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub auth_type: String,
    #[serde(default)]
    pub mode: String,
}

/// The tool invoked, if any.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolContext {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Everything the evaluator can test conditions against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationContext {
    #[serde(default)]
    pub subject: SubjectContext,
    #[serde(default)]
    pub request: RequestMeta,
    #[serde(default)]
    pub oauth: OauthContext,
    #[serde(default)]
    pub server: ServerContext,
    #[serde(default)]
    pub tool: ToolContext,
}

impl EvaluationContext {
    /// Resource index keys this context matches, used to collect candidate
    /// policies.
    pub fn resource_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if !self.server.name.is_empty() {
            keys.push(format!("mcp_server:{}", self.server.name));
            if !self.tool.name.is_empty() {
                keys.push(format!("tool:{}:{}", self.server.name, self.tool.name));
            }
        }
        if !self.subject.email.is_empty() {
            keys.push(format!("user:{}", self.subject.email));
        }
        for group in &self.subject.groups {
            keys.push(format!("group:{group}"));
        }
        for role in &self.subject.roles {
            keys.push(format!("role:{role}"));
        }
        keys
    }

    /// Resolve a dotted field selector against this context.
    ///
    /// Selectors address the serialized form (`subject.email`,
    /// `request.ip`, `tool.arguments.table`). Two aliases are accepted for
    /// compatibility with older policy documents: a leading `meta.` is
    /// stripped, and `payload.` maps to `tool.arguments.`.
    pub fn lookup(&self, field: &str) -> Option<Value> {
        let field = field.strip_prefix("meta.").unwrap_or(field);
        let normalized = match field.strip_prefix("payload.") {
            Some(rest) => format!("tool.arguments.{rest}"),
            None => field.to_string(),
        };

        let root = serde_json::to_value(self).ok()?;
        let mut cursor = &root;
        for segment in normalized.split('.') {
            cursor = cursor.get(segment)?;
        }
        if cursor.is_null() {
            None
        } else {
            Some(cursor.clone())
        }
    }
}

/// Outcome category of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
    AuditOnly,
}

/// Result of evaluating a context against the active policy set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub decision: Decision,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_policy_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_params: Option<Value>,

    pub reason: String,

    pub timestamp: DateTime<Utc>,

    /// `decision == deny` and the matched policy enforces blocking.
    /// A deny with no matched policy (default deny) blocks.
    pub should_block: bool,
}

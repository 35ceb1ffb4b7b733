//! Policy document model.
//!
//! Policies are rules-based and priority-ordered. Conditions and actions
//! are tagged variants; unknown variants fail deserialization rather than
//! being silently ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::PolicyError;

/// Lifecycle state of a policy.
///
/// Transitions: `draft -> active -> (suspended <-> active) -> retired`.
/// Retired is terminal for evaluation but the record remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    Draft,
    Active,
    Suspended,
    Retired,
}

impl PolicyStatus {
    /// Whether `self -> to` is a permitted lifecycle transition.
    pub fn can_transition(self, to: PolicyStatus) -> bool {
        use PolicyStatus::*;
        matches!(
            (self, to),
            (Draft, Active)
                | (Active, Suspended)
                | (Active, Retired)
                | (Suspended, Active)
                | (Suspended, Retired)
                | (Draft, Retired)
        )
    }
}

impl std::fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PolicyStatus::Draft => "draft",
            PolicyStatus::Active => "active",
            PolicyStatus::Suspended => "suspended",
            PolicyStatus::Retired => "retired",
        };
        f.write_str(s)
    }
}

/// Kind of resource a policy can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    McpServer,
    Tool,
    User,
    Group,
    Role,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceType::McpServer => "mcp_server",
            ResourceType::Tool => "tool",
            ResourceType::User => "user",
            ResourceType::Group => "group",
            ResourceType::Role => "role",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ResourceType {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mcp_server" => Ok(ResourceType::McpServer),
            "tool" => Ok(ResourceType::Tool),
            "user" => Ok(ResourceType::User),
            "group" => Ok(ResourceType::Group),
            "role" => Ok(ResourceType::Role),
            other => Err(PolicyError::Invalid(format!(
                "unknown resource type '{other}'"
            ))),
        }
    }
}

/// A `(resource_type, resource_id)` binding that indexes a policy.
///
/// For `tool` resources, `resource_id` is `"server_name:tool_name"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBinding {
    pub resource_type: ResourceType,
    pub resource_id: String,
}

impl ResourceBinding {
    pub fn new(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.into(),
        }
    }

    /// Index key: `{type}:{id}`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.resource_type, self.resource_id)
    }
}

/// Additional subject narrowing on a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyScope {
    pub principal_type: String,
    pub principal_id: String,
}

/// Category of a rule condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionType {
    User,
    Time,
    Resource,
    Tool,
    Data,
    Rate,
}

/// Comparison operator of a rule condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Neq,
    In,
    NotIn,
    Gt,
    Lt,
    Gte,
    Lte,
    Matches,
    Contains,
    BeginsWith,
    EndsWith,
    InIpRange,
    NotInIpRange,
}

impl ConditionOperator {
    /// Operators for which a missing context field counts as a match
    /// (absence is treated as not-present).
    pub fn matches_on_absence(self) -> bool {
        matches!(
            self,
            ConditionOperator::Neq | ConditionOperator::NotIn | ConditionOperator::NotInIpRange
        )
    }
}

/// One test against the evaluation context. Conditions in a rule combine
/// with AND.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub operator: ConditionOperator,
    /// Dotted selector over the evaluation context, e.g. `subject.email`,
    /// `request.ip`, `tool.arguments.table`.
    pub field: String,
    pub value: Value,
}

/// Kind of action a matched rule takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Allow,
    Deny,
    RequireApproval,
    Redact,
    RateLimit,
    LogOnly,
    Modify,
}

/// An action with its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// One rule inside a policy. Rules are evaluated in priority order
/// (descending); the first rule whose conditions all hold decides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub rule_id: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub actions: Vec<RuleAction>,
}

/// Whether a matched deny actually blocks, or is only recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    #[default]
    Blocking,
    AuditOnly,
}

/// A unified policy document. One YAML file per policy on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: Uuid,

    /// Unique human-readable code (case-insensitive uniqueness).
    pub policy_code: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    pub status: PolicyStatus,

    /// Higher wins.
    #[serde(default)]
    pub priority: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_from: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,

    /// Monotonic; incremented on every mutation.
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub owner_id: String,

    #[serde(default)]
    pub org_id: String,

    /// Empty resources means the policy is global.
    #[serde(default)]
    pub resources: Vec<ResourceBinding>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<PolicyScope>,

    #[serde(default)]
    pub policy_rules: Vec<PolicyRule>,

    #[serde(default)]
    pub enforcement: EnforcementMode,
}

impl Policy {
    /// Whether the policy participates in evaluation at `now`:
    /// status is active and the effective window contains `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PolicyStatus::Active
            && self.effective_from.is_none_or(|from| from <= now)
            && self.effective_to.is_none_or(|to| to >= now)
    }

    /// A policy with no resource bindings applies to every evaluation.
    pub fn is_global(&self) -> bool {
        self.resources.is_empty()
    }

    /// Whether any rule's first action is a deny. Used for conflict
    /// ordering: deny policies are considered before allow policies at
    /// equal priority.
    pub fn is_deny_flavored(&self) -> bool {
        self.policy_rules
            .iter()
            .any(|r| matches!(r.actions.first().map(|a| a.action_type), Some(ActionType::Deny)))
    }
}

/// Client-supplied policy document for create/update. The store assigns
/// `policy_id` (when absent), `version`, and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<Uuid>,

    pub policy_code: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Defaults to `draft` on create; preserved on update when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PolicyStatus>,

    #[serde(default)]
    pub priority: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_from: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,

    #[serde(default)]
    pub owner_id: String,

    #[serde(default)]
    pub org_id: String,

    #[serde(default)]
    pub resources: Vec<ResourceBinding>,

    #[serde(default)]
    pub scopes: Vec<PolicyScope>,

    #[serde(default)]
    pub policy_rules: Vec<PolicyRule>,

    #[serde(default)]
    pub enforcement: EnforcementMode,
}

impl PolicyDraft {
    /// Basic document validation shared by create and update.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.policy_code.trim().is_empty() {
            return Err(PolicyError::Invalid(
                "policy_code must not be empty".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(PolicyError::Invalid("name must not be empty".to_string()));
        }
        for rule in &self.policy_rules {
            if rule.rule_id.trim().is_empty() {
                return Err(PolicyError::Invalid(
                    "every rule needs a rule_id".to_string(),
                ));
            }
            if rule.actions.is_empty() {
                return Err(PolicyError::Invalid(format!(
                    "rule '{}' has no actions",
                    rule.rule_id
                )));
            }
        }
        if let (Some(from), Some(to)) = (self.effective_from, self.effective_to) {
            if from > to {
                return Err(PolicyError::Invalid(
                    "effective_from is after effective_to".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_transitions() {
        use PolicyStatus::*;
        assert!(Draft.can_transition(Active));
        assert!(Active.can_transition(Suspended));
        assert!(Suspended.can_transition(Active));
        assert!(Active.can_transition(Retired));
        assert!(!Retired.can_transition(Active));
        assert!(!Draft.can_transition(Suspended));
    }

    #[test]
    fn resource_key_format() {
        let b = ResourceBinding::new(ResourceType::Tool, "github:create_issue");
        assert_eq!(b.key(), "tool:github:create_issue");
    }

    #[test]
    fn effective_window() {
        let now = Utc::now();
        let mut p = sample_policy();
        assert!(p.is_active_at(now));

        p.effective_from = Some(now + chrono::Duration::hours(1));
        assert!(!p.is_active_at(now));

        p.effective_from = None;
        p.effective_to = Some(now - chrono::Duration::hours(1));
        assert!(!p.is_active_at(now));
    }

    #[test]
    fn draft_validation_rejects_empty_actions() {
        let mut d = sample_draft();
        d.policy_rules[0].actions.clear();
        assert!(d.validate().is_err());
    }

    #[test]
    fn policy_round_trips_through_yaml() {
        let p = sample_policy();
        let text = serde_yaml::to_string(&p).unwrap();
        let back: Policy = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.policy_id, p.policy_id);
        assert_eq!(back.policy_code, p.policy_code);
        assert_eq!(back.version, p.version);
        assert_eq!(back.resources, p.resources);
        assert_eq!(back.policy_rules.len(), p.policy_rules.len());
    }

    fn sample_draft() -> PolicyDraft {
        PolicyDraft {
            policy_id: None,
            policy_code: "ALLOW-GITHUB".to_string(),
            name: "Allow GitHub tools".to_string(),
            description: String::new(),
            status: Some(PolicyStatus::Active),
            priority: 10,
            effective_from: None,
            effective_to: None,
            owner_id: "ops".to_string(),
            org_id: "acme".to_string(),
            resources: vec![ResourceBinding::new(ResourceType::McpServer, "github")],
            scopes: vec![],
            policy_rules: vec![PolicyRule {
                rule_id: "r1".to_string(),
                priority: 0,
                description: String::new(),
                conditions: vec![],
                actions: vec![RuleAction {
                    action_type: ActionType::Allow,
                    params: json!(null),
                }],
            }],
            enforcement: EnforcementMode::Blocking,
        }
    }

    fn sample_policy() -> Policy {
        let now = Utc::now();
        Policy {
            policy_id: Uuid::new_v4(),
            policy_code: "ALLOW-GITHUB".to_string(),
            name: "Allow GitHub tools".to_string(),
            description: String::new(),
            status: PolicyStatus::Active,
            priority: 10,
            effective_from: None,
            effective_to: None,
            version: 1,
            created_at: now,
            updated_at: now,
            owner_id: "ops".to_string(),
            org_id: "acme".to_string(),
            resources: vec![ResourceBinding::new(ResourceType::Tool, "github:create_issue")],
            scopes: vec![],
            policy_rules: vec![PolicyRule {
                rule_id: "r1".to_string(),
                priority: 0,
                description: String::new(),
                conditions: vec![],
                actions: vec![RuleAction {
                    action_type: ActionType::Allow,
                    params: json!(null),
                }],
            }],
            enforcement: EnforcementMode::Blocking,
        }
    }
}

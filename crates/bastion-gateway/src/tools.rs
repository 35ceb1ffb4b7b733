//! Policy-aware tool filtering.
//!
//! Effective tool visibility is the intersection of three sets: what the
//! backend advertises, what policy allows, and what the group config
//! exposes. Policy is authoritative and fail-closed: when the engine is
//! unreachable the allowed set is empty and invocations are refused.

use std::sync::Arc;

use bastion_mcp::ToolDefinition;
use bastion_policy::{EvaluationContext, EvaluationResult, ResourceType};

use crate::engine_client::PolicyEngineClient;
use crate::error::GatewayError;
use crate::proxy::McpProxy;

/// Outcome of asking the engine which tools policy allows on a server.
#[derive(Debug, Clone)]
pub struct PolicyToolFilter {
    pub tools: Vec<String>,
    /// False when the engine could not be reached; the tools list is then
    /// the denied (empty) set.
    pub available: bool,
}

/// Computes policy/group tool intersections and gates invocations.
pub struct ToolFilterService {
    engine: Arc<PolicyEngineClient>,
}

impl ToolFilterService {
    pub fn new(engine: Arc<PolicyEngineClient>) -> Self {
        Self { engine }
    }

    /// Tool names policy allows on `server`: the right-hand sides of
    /// `tool:{server}:{tool}` bindings on policies bound to the server.
    pub async fn policy_allowed_tools(&self, server: &str, user: &str) -> PolicyToolFilter {
        match self
            .engine
            .policies_for_resource("mcp_server", server, true)
            .await
        {
            Ok(policies) => {
                let prefix = format!("{server}:");
                let mut tools: Vec<String> = policies
                    .iter()
                    .flat_map(|p| p.resources.iter())
                    .filter(|b| b.resource_type == ResourceType::Tool)
                    .filter_map(|b| b.resource_id.strip_prefix(&prefix))
                    .map(str::to_string)
                    .collect();
                tools.sort();
                tools.dedup();
                PolicyToolFilter {
                    tools,
                    available: true,
                }
            }
            Err(e) => {
                tracing::warn!(
                    server,
                    user,
                    error = %e,
                    "policy engine unavailable; denying all tools"
                );
                PolicyToolFilter {
                    tools: Vec::new(),
                    available: false,
                }
            }
        }
    }

    /// The effective tool set for `(server, user, group config)`.
    ///
    /// `group_tools` is the group's filter for this server; `None` means no
    /// group restriction. Policy filtering is authoritative: a tool absent
    /// from the policy-allowed set is never exposed.
    pub async fn available_tools(
        &self,
        proxy: &McpProxy,
        server: &str,
        user: &str,
        group_tools: Option<&[String]>,
    ) -> Result<Vec<ToolDefinition>, GatewayError> {
        let all = proxy.list_tools(server, user).await?;
        let policy = self.policy_allowed_tools(server, user).await;

        let effective: Vec<ToolDefinition> = all
            .iter()
            .filter(|t| policy.tools.iter().any(|p| p == &t.name))
            .filter(|t| group_tools.is_none_or(|g| g.iter().any(|name| name == &t.name)))
            .cloned()
            .collect();

        if effective.is_empty() && (!policy.tools.is_empty() || group_tools.is_some()) {
            tracing::warn!(
                server,
                user,
                policy_allowed = ?policy.tools,
                group_allowed = ?group_tools,
                "POLICY-GROUP MISMATCH: intersection of policy and group tool sets is empty"
            );
        }
        Ok(effective)
    }

    /// Gate a tool invocation through the policy engine.
    ///
    /// Returns the evaluation result so callers can audit `audit_only`
    /// decisions; a blocking deny or an unreachable engine refuses the
    /// call.
    pub async fn authorize_invoke(
        &self,
        context: &EvaluationContext,
    ) -> Result<EvaluationResult, GatewayError> {
        let result = self.engine.evaluate(context).await.map_err(|e| {
            GatewayError::Forbidden(format!(
                "policy filtering unavailable, refusing tool call: {e}"
            ))
        })?;

        if result.should_block {
            return Err(GatewayError::PolicyDeny {
                reason: result.reason,
            });
        }
        if matches!(result.decision, bastion_policy::Decision::Deny) {
            tracing::info!(
                reason = %result.reason,
                "deny decision under audit_only enforcement; proceeding"
            );
        }
        Ok(result)
    }
}

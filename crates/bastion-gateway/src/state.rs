//! Shared application state.

use std::sync::Arc;

use bastion_audit::AuditSink;
use bastion_core::Settings;

use crate::engine_client::PolicyEngineClient;
use crate::error::GatewayError;
use crate::groups::GroupRegistry;
use crate::proxy::McpProxy;
use crate::registry::ServerRegistry;
use crate::tools::ToolFilterService;

/// Process-wide singletons, initialized once at startup. Each component
/// owns its own lock; there is no composite lock across components.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ServerRegistry>,
    pub groups: Arc<GroupRegistry>,
    pub proxy: Arc<McpProxy>,
    pub filter: Arc<ToolFilterService>,
    pub engine: Arc<PolicyEngineClient>,
    pub audit: AuditSink,
}

impl AppState {
    /// Record a deny decision that did not block (audit_only enforcement).
    /// The proxied call itself is audited separately with its outcome.
    pub fn record_unblocked_deny(
        &self,
        user: &str,
        server: &str,
        tool: &str,
        result: &bastion_policy::EvaluationResult,
    ) {
        if !matches!(result.decision, bastion_policy::Decision::Deny) {
            return;
        }
        self.audit.record(
            bastion_audit::AuditRecord::builder(user, "policy/decision")
                .server(server)
                .tool(tool)
                .parameters(serde_json::json!({
                    "decision": result.decision,
                    "enforcement": "audit_only",
                    "matched_policy_id": result.matched_policy_id,
                    "matched_rule_id": result.matched_rule_id,
                    "reason": result.reason,
                }))
                .build(),
        );
    }

    pub async fn init(settings: Settings) -> Result<Self, GatewayError> {
        let audit = AuditSink::spawn(&settings.audit)
            .await
            .map_err(|e| GatewayError::Internal(format!("audit sink: {e}")))?;
        let registry = Arc::new(ServerRegistry::open(&settings.servers_file)?);
        let groups = Arc::new(GroupRegistry::open(&settings.groups_file)?);
        let engine = Arc::new(PolicyEngineClient::new(settings.policy_engine_url.clone()));
        let proxy = Arc::new(McpProxy::new(registry.clone(), audit.clone()));
        let filter = Arc::new(ToolFilterService::new(engine.clone()));

        Ok(Self {
            settings: Arc::new(settings),
            registry,
            groups,
            proxy,
            filter,
            engine,
            audit,
        })
    }
}

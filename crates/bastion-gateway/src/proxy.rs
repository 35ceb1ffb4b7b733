//! Proxy and aggregator over backend MCP servers.
//!
//! Every per-server operation follows the same pipeline: registry lookup,
//! auth composition, backend call with the server's timeout, audit record,
//! error mapping. Aggregation fans out concurrently to every enabled
//! server; a failing backend lands in the per-server error channel and
//! never drops sibling results.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use bastion_audit::{AuditRecord, AuditRecordBuilder, AuditSink};
use bastion_core::BackendServer;
use bastion_mcp::{
    BackendEndpoint, CallToolResponse, McpClient, PromptDescriptor, ResourceDescriptor,
    ToolDefinition, apply_auth,
};

use crate::error::GatewayError;
use crate::registry::ServerRegistry;

/// A tool tagged with its originating server.
#[derive(Debug, Clone, Serialize)]
pub struct TaggedTool {
    pub mcp_server: String,
    #[serde(flatten)]
    pub tool: ToolDefinition,
}

/// A resource tagged with its originating server.
#[derive(Debug, Clone, Serialize)]
pub struct TaggedResource {
    pub mcp_server: String,
    #[serde(flatten)]
    pub resource: ResourceDescriptor,
}

/// A prompt tagged with its originating server.
#[derive(Debug, Clone, Serialize)]
pub struct TaggedPrompt {
    pub mcp_server: String,
    #[serde(flatten)]
    pub prompt: PromptDescriptor,
}

/// Aggregated tool listing. Per-server order is the backend's order;
/// cross-server order follows registry iteration.
#[derive(Debug, Default, Serialize)]
pub struct AggregatedTools {
    pub tools: Vec<TaggedTool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize)]
pub struct AggregatedResources {
    pub resources: Vec<TaggedResource>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize)]
pub struct AggregatedPrompts {
    pub prompts: Vec<TaggedPrompt>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

/// Broadcast invocation request.
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastRequest {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub mcp_servers: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Broadcast outcome: `successful + failed == total` and every target
/// appears in exactly one of `results` / `errors`.
#[derive(Debug, Serialize)]
pub struct BroadcastReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: BTreeMap<String, Value>,
    pub errors: BTreeMap<String, String>,
    pub duration_ms: u64,
}

/// Audit guard for one proxied operation.
///
/// `finish` records the outcome. If the request future is dropped before
/// that (the client went away), the in-flight backend call is aborted
/// along with it and the drop handler records the elapsed time with
/// cancelled status.
struct OpAudit {
    audit: AuditSink,
    user: String,
    method: &'static str,
    server: String,
    tool: Option<String>,
    parameters: Option<Value>,
    started: Instant,
    armed: bool,
}

impl OpAudit {
    fn new(audit: &AuditSink, user: &str, method: &'static str, server: &str) -> Self {
        Self {
            audit: audit.clone(),
            user: user.to_string(),
            method,
            server: server.to_string(),
            tool: None,
            parameters: None,
            started: Instant::now(),
            armed: true,
        }
    }

    fn tool(mut self, tool: &str) -> Self {
        self.tool = Some(tool.to_string());
        self
    }

    fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    fn builder(&mut self) -> AuditRecordBuilder {
        let mut builder = AuditRecord::builder(&self.user, self.method)
            .server(&self.server)
            .duration_ms(self.started.elapsed().as_millis() as u64);
        if let Some(tool) = &self.tool {
            builder = builder.tool(tool);
        }
        if let Some(parameters) = self.parameters.take() {
            builder = builder.parameters(parameters);
        }
        builder
    }

    fn finish<T>(mut self, result: &Result<T, GatewayError>) {
        self.armed = false;
        let mut builder = self.builder();
        if let Err(e) = result {
            builder = builder.failed(e.to_string()).status_code(e.status().as_u16());
        }
        self.audit.record(builder.build());
    }
}

impl Drop for OpAudit {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let builder = self.builder().cancelled();
        self.audit.record(builder.build());
    }
}

/// The proxy: per-server operations plus aggregation and broadcast.
pub struct McpProxy {
    registry: Arc<ServerRegistry>,
    client: McpClient,
    audit: AuditSink,
}

impl McpProxy {
    pub fn new(registry: Arc<ServerRegistry>, audit: AuditSink) -> Self {
        Self {
            registry,
            client: McpClient::new(),
            audit,
        }
    }

    /// Lookup, enabled check, auth composition, endpoint construction.
    /// Credential failures happen here, before any outbound request.
    async fn prepare(&self, name: &str) -> Result<(BackendServer, BackendEndpoint), GatewayError> {
        let server = self.registry.get(name).await?;
        if !server.enabled {
            return Err(GatewayError::Invalid(format!("server '{name}' is disabled")));
        }
        let url = server
            .http_endpoint()
            .ok_or_else(|| {
                GatewayError::Invalid(format!(
                    "server '{name}' has no reachable HTTP endpoint (stdio servers must be converted)"
                ))
            })?
            .to_string();
        let auth = apply_auth(&server.name, &server.auth)?;
        let endpoint = BackendEndpoint::new(url, auth, Duration::from_secs(server.timeout_seconds));
        Ok((server, endpoint))
    }

    /// Run the MCP handshake against one server and return its
    /// `initialize` result. Backends answering the initialized
    /// notification with `202 Accepted` pass.
    pub async fn initialize_backend(
        &self,
        server: &str,
        user: &str,
    ) -> Result<Value, GatewayError> {
        let audit = OpAudit::new(&self.audit, user, "initialize", server);
        let result = async {
            let (_, endpoint) = self.prepare(server).await?;
            let client_info = serde_json::json!({
                "name": "secure-mcp-gateway",
                "version": env!("CARGO_PKG_VERSION"),
            });
            Ok(self.client.initialize(&endpoint, client_info).await?)
        }
        .await;
        audit.finish(&result);
        result
    }

    /// Tools advertised by one server, filtered by its own allowlist.
    pub async fn list_tools(
        &self,
        server: &str,
        user: &str,
    ) -> Result<Vec<ToolDefinition>, GatewayError> {
        let audit = OpAudit::new(&self.audit, user, "tools/list", server);
        let result = async {
            let (cfg, endpoint) = self.prepare(server).await?;
            let tools = self.client.list_tools(&endpoint).await?;
            Ok(tools
                .into_iter()
                .filter(|t| cfg.tool_allowed(&t.name))
                .collect())
        }
        .await;
        audit.finish(&result);
        result
    }

    /// Invoke a tool on one server. Policy decisions happen in the caller;
    /// this enforces only the server's own allowlist.
    pub async fn invoke_tool(
        &self,
        server: &str,
        user: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<CallToolResponse, GatewayError> {
        let audit = OpAudit::new(&self.audit, user, "tools/call", server)
            .tool(tool)
            .parameters(arguments.clone());
        let result = async {
            let (cfg, endpoint) = self.prepare(server).await?;
            if !cfg.tool_allowed(tool) {
                return Err(GatewayError::Forbidden(format!(
                    "tool '{tool}' is not in the allowlist of server '{server}'"
                )));
            }
            Ok(self.client.call_tool(&endpoint, tool, arguments).await?)
        }
        .await;
        audit.finish(&result);
        result
    }

    pub async fn list_resources(
        &self,
        server: &str,
        user: &str,
    ) -> Result<Vec<ResourceDescriptor>, GatewayError> {
        let audit = OpAudit::new(&self.audit, user, "resources/list", server);
        let result = async {
            let (_, endpoint) = self.prepare(server).await?;
            Ok(self.client.list_resources(&endpoint).await?)
        }
        .await;
        audit.finish(&result);
        result
    }

    /// Read a resource by its backend-native URI.
    pub async fn read_resource(
        &self,
        server: &str,
        user: &str,
        uri: &str,
    ) -> Result<Value, GatewayError> {
        let audit = OpAudit::new(&self.audit, user, "resources/read", server)
            .parameters(serde_json::json!({ "uri": uri }));
        let result = async {
            let (_, endpoint) = self.prepare(server).await?;
            Ok(self.client.read_resource(&endpoint, uri).await?)
        }
        .await;
        audit.finish(&result);
        result
    }

    pub async fn list_prompts(
        &self,
        server: &str,
        user: &str,
    ) -> Result<Vec<PromptDescriptor>, GatewayError> {
        let audit = OpAudit::new(&self.audit, user, "prompts/list", server);
        let result = async {
            let (_, endpoint) = self.prepare(server).await?;
            Ok(self.client.list_prompts(&endpoint).await?)
        }
        .await;
        audit.finish(&result);
        result
    }

    pub async fn get_prompt(
        &self,
        server: &str,
        user: &str,
        name: &str,
        arguments: Value,
    ) -> Result<Value, GatewayError> {
        let audit = OpAudit::new(&self.audit, user, "prompts/get", server)
            .tool(name)
            .parameters(arguments.clone());
        let result = async {
            let (_, endpoint) = self.prepare(server).await?;
            Ok(self.client.get_prompt(&endpoint, name, arguments).await?)
        }
        .await;
        audit.finish(&result);
        result
    }

    /// Aggregate `tools/list` across every enabled server. Per-server
    /// failures are isolated into the error channel.
    pub async fn list_all_tools(&self, user: &str) -> AggregatedTools {
        let servers = self.registry.list_enabled().await;
        let calls = servers.iter().map(|s| {
            let name = s.name.clone();
            async move { (name.clone(), self.list_tools(&name, user).await) }
        });

        let mut aggregate = AggregatedTools::default();
        for (name, outcome) in join_all(calls).await {
            match outcome {
                Ok(tools) => aggregate.tools.extend(tools.into_iter().map(|tool| TaggedTool {
                    mcp_server: name.clone(),
                    tool,
                })),
                Err(e) => {
                    aggregate.errors.insert(name, e.to_string());
                }
            }
        }
        aggregate
    }

    pub async fn list_all_resources(&self, user: &str) -> AggregatedResources {
        let servers = self.registry.list_enabled().await;
        let calls = servers.iter().map(|s| {
            let name = s.name.clone();
            async move { (name.clone(), self.list_resources(&name, user).await) }
        });

        let mut aggregate = AggregatedResources::default();
        for (name, outcome) in join_all(calls).await {
            match outcome {
                Ok(resources) => {
                    aggregate
                        .resources
                        .extend(resources.into_iter().map(|resource| TaggedResource {
                            mcp_server: name.clone(),
                            resource,
                        }))
                }
                Err(e) => {
                    aggregate.errors.insert(name, e.to_string());
                }
            }
        }
        aggregate
    }

    pub async fn list_all_prompts(&self, user: &str) -> AggregatedPrompts {
        let servers = self.registry.list_enabled().await;
        let calls = servers.iter().map(|s| {
            let name = s.name.clone();
            async move { (name.clone(), self.list_prompts(&name, user).await) }
        });

        let mut aggregate = AggregatedPrompts::default();
        for (name, outcome) in join_all(calls).await {
            match outcome {
                Ok(prompts) => {
                    aggregate
                        .prompts
                        .extend(prompts.into_iter().map(|prompt| TaggedPrompt {
                            mcp_server: name.clone(),
                            prompt,
                        }))
                }
                Err(e) => {
                    aggregate.errors.insert(name, e.to_string());
                }
            }
        }
        aggregate
    }

    /// First enabled server advertising `tool`, in registry iteration
    /// order. Unreachable servers are skipped.
    pub async fn find_tool_server(&self, tool: &str, user: &str) -> Option<String> {
        for server in self.registry.list_enabled().await {
            match self.list_tools(&server.name, user).await {
                Ok(tools) if tools.iter().any(|t| t.name == tool) => return Some(server.name),
                _ => {}
            }
        }
        None
    }

    /// First enabled server advertising the prompt.
    pub async fn find_prompt_server(&self, prompt: &str, user: &str) -> Option<String> {
        for server in self.registry.list_enabled().await {
            match self.list_prompts(&server.name, user).await {
                Ok(prompts) if prompts.iter().any(|p| p.name == prompt) => {
                    return Some(server.name);
                }
                _ => {}
            }
        }
        None
    }

    /// Invoke one tool on the given targets concurrently. Per-target
    /// failures land in `errors` and never short-circuit the rest;
    /// `successful + failed == targets.len()`.
    pub async fn invoke_on_targets(
        &self,
        user: &str,
        targets: &[String],
        tool: &str,
        parameters: &Value,
    ) -> BroadcastReport {
        let started = Instant::now();
        let calls = targets.iter().map(|name| {
            let name = name.clone();
            async move {
                let outcome = self.invoke_tool(&name, user, tool, parameters.clone()).await;
                (name, outcome)
            }
        });

        let mut results = BTreeMap::new();
        let mut errors = BTreeMap::new();
        for (name, outcome) in join_all(calls).await {
            match outcome {
                Ok(response) => {
                    results.insert(
                        name,
                        serde_json::to_value(response).unwrap_or(Value::Null),
                    );
                }
                Err(e) => {
                    errors.insert(name, e.to_string());
                }
            }
        }

        BroadcastReport {
            total: targets.len(),
            successful: results.len(),
            failed: errors.len(),
            results,
            errors,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Resolve a broadcast's target set: the union of explicitly named
    /// servers and enabled servers carrying any of the requested tags;
    /// when both inputs are empty, every enabled server advertising the
    /// tool.
    pub async fn broadcast_targets(&self, request: &BroadcastRequest, user: &str) -> Vec<String> {
        let explicit = request.mcp_servers.clone().unwrap_or_default();
        let tags = request.tags.clone().unwrap_or_default();

        let mut targets = explicit;
        if !tags.is_empty() {
            for server in self.registry.list_enabled().await {
                if server.tags.iter().any(|t| tags.contains(t))
                    && !targets.contains(&server.name)
                {
                    targets.push(server.name.clone());
                }
            }
        }
        if !targets.is_empty() {
            return targets;
        }

        // Neither servers nor tags given: every enabled server that
        // advertises the tool.
        let servers = self.registry.list_enabled().await;
        let listings = servers.iter().map(|s| {
            let name = s.name.clone();
            async move { (name.clone(), self.list_tools(&name, user).await) }
        });
        join_all(listings)
            .await
            .into_iter()
            .filter_map(|(name, outcome)| match outcome {
                Ok(tools) if tools.iter().any(|t| t.name == request.tool_name) => Some(name),
                _ => None,
            })
            .collect()
    }
}

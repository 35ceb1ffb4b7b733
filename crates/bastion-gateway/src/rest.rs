//! REST endpoint handlers.
//!
//! The REST facade mirrors the MCP surface for programmatic callers plus
//! management of servers and groups. Error bodies are
//! `{"error": "<sentence>"}` with the status codes of the gateway
//! taxonomy.

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use bastion_core::{BackendServer, HTTP_ENDPOINT_KEY, ServerGroup, TransportKind};

use crate::auth::RequestSubject;
use crate::error::GatewayError;
use crate::proxy::BroadcastRequest;
use crate::rpc::decode_resource_uri;
use crate::state::AppState;

pub async fn healthz(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "secure-mcp-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "audit_dropped": state.audit.dropped(),
    }))
}

// ---------------------------------------------------------------------------
// Server management
// ---------------------------------------------------------------------------

pub async fn list_servers(State(state): State<AppState>) -> Json<Value> {
    let servers: Vec<Value> = state
        .registry
        .list()
        .await
        .iter()
        .map(|s| {
            json!({
                "name": s.name,
                "transport": s.transport,
                "url": s.url,
                "enabled": s.enabled,
                "description": s.description,
                "tags": s.tags,
            })
        })
        .collect();
    Json(json!({ "count": servers.len(), "servers": servers }))
}

pub async fn create_server(
    State(state): State<AppState>,
    Json(server): Json<BackendServer>,
) -> Result<Json<Value>, GatewayError> {
    let created = state.registry.create(server).await?;
    Ok(Json(json!({ "status": "created", "name": created.name })))
}

pub async fn get_server_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<BackendServer>, GatewayError> {
    Ok(Json(state.registry.get(&name).await?))
}

pub async fn update_server_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(server): Json<BackendServer>,
) -> Result<Json<Value>, GatewayError> {
    let updated = state.registry.update(&name, server).await?;
    Ok(Json(json!({ "status": "updated", "name": updated.name })))
}

/// Delete a server, prune it from groups, and fire the policy-delete
/// cascade. The cascade is fire-and-forget: its failures are logged and
/// never mask the successful delete.
pub async fn delete_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let removed = state.registry.delete(&name).await?;

    if let Err(e) = state.groups.remove_server_everywhere(&removed.name).await {
        tracing::warn!(server = %removed.name, error = %e, "group cleanup after server delete failed");
    }

    let engine = state.engine.clone();
    let server_name = removed.name.clone();
    tokio::spawn(async move {
        match engine
            .delete_policies_for_resource("mcp_server", &server_name)
            .await
        {
            Ok(deleted) => {
                tracing::info!(server = %server_name, deleted, "cascaded policy delete");
            }
            Err(e) => {
                tracing::warn!(server = %server_name, error = %e, "policy delete cascade failed; reconcile with a list+delete pass");
            }
        }
    });

    Ok(Json(json!({ "status": "deleted", "name": name })))
}

pub async fn reload_servers(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    let count = state.registry.reload().await?;
    Ok(Json(json!({ "status": "reloaded", "servers": count })))
}

#[derive(Debug, Deserialize)]
pub struct ConvertToHttpRequest {
    pub http_endpoint: String,
}

/// Rewrite a stdio server to http transport addressing its converter
/// service endpoint. The original launch command is preserved in metadata.
pub async fn convert_to_http(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ConvertToHttpRequest>,
) -> Result<Json<Value>, GatewayError> {
    let mut server = state.registry.get(&name).await?;
    if server.transport != TransportKind::Stdio {
        return Err(GatewayError::Invalid(format!(
            "server '{name}' is {} transport; only stdio servers can be converted",
            server.transport
        )));
    }

    if let Some(command) = server.command.take() {
        server
            .metadata
            .insert("stdio_command".to_string(), json!(command));
    }
    if !server.args.is_empty() {
        let args = std::mem::take(&mut server.args);
        server.metadata.insert("stdio_args".to_string(), json!(args));
    }
    server
        .metadata
        .insert(HTTP_ENDPOINT_KEY.to_string(), json!(body.http_endpoint));
    server.transport = TransportKind::Http;
    server.url = Some(body.http_endpoint);

    let updated = state.registry.update(&name, server).await?;
    Ok(Json(json!({
        "status": "converted",
        "name": updated.name,
        "url": updated.url,
    })))
}

/// Handshake with a backend to verify it is reachable and speaks MCP.
pub async fn ping_server(
    State(state): State<AppState>,
    Extension(subject): Extension<RequestSubject>,
    Path(name): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let result = state.proxy.initialize_backend(&name, &subject.email).await?;
    Ok(Json(json!({
        "status": "ok",
        "mcp_server": name,
        "server_info": result.get("serverInfo"),
    })))
}

// ---------------------------------------------------------------------------
// MCP proxying
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ServerQuery {
    pub mcp_server: Option<String>,
}

pub async fn list_tools(
    State(state): State<AppState>,
    Extension(subject): Extension<RequestSubject>,
    Query(query): Query<ServerQuery>,
) -> Result<Json<Value>, GatewayError> {
    match query.mcp_server {
        Some(server) => {
            let tools = state.proxy.list_tools(&server, &subject.email).await?;
            Ok(Json(json!({ "mcp_server": server, "tools": tools })))
        }
        None => {
            let aggregate = state.proxy.list_all_tools(&subject.email).await;
            Ok(Json(serde_json::to_value(aggregate).unwrap_or(Value::Null)))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Value,
}

pub async fn invoke(
    State(state): State<AppState>,
    Extension(subject): Extension<RequestSubject>,
    Query(query): Query<ServerQuery>,
    Json(body): Json<InvokeRequest>,
) -> Result<Json<Value>, GatewayError> {
    let server_name = query
        .mcp_server
        .ok_or_else(|| GatewayError::Invalid("query parameter 'mcp_server' is required".to_string()))?;
    let server = state.registry.get(&server_name).await?;

    let context = subject.evaluation_context(&server, &body.tool_name, &body.parameters);
    let decision = state.filter.authorize_invoke(&context).await?;
    state.record_unblocked_deny(&subject.email, &server_name, &body.tool_name, &decision);

    let result = state
        .proxy
        .invoke_tool(&server_name, &subject.email, &body.tool_name, body.parameters)
        .await?;
    Ok(Json(json!({
        "mcp_server": server_name,
        "decision": decision.decision,
        "result": result,
    })))
}

/// Broadcast a tool call. Each target is gated through the policy engine
/// individually; denied or unknown targets land in the error channel with
/// the rest of the per-target failures, never as a top-level error.
pub async fn invoke_broadcast(
    State(state): State<AppState>,
    Extension(subject): Extension<RequestSubject>,
    Json(body): Json<BroadcastRequest>,
) -> Result<Json<Value>, GatewayError> {
    if body.tool_name.trim().is_empty() {
        return Err(GatewayError::Invalid("tool_name is required".to_string()));
    }

    let targets = state.proxy.broadcast_targets(&body, &subject.email).await;
    let mut refused = std::collections::BTreeMap::new();
    let mut cleared = Vec::new();
    for target in targets {
        let outcome = async {
            let server = state.registry.get(&target).await?;
            let context = subject.evaluation_context(&server, &body.tool_name, &body.parameters);
            let decision = state.filter.authorize_invoke(&context).await?;
            state.record_unblocked_deny(&subject.email, &target, &body.tool_name, &decision);
            Ok::<(), GatewayError>(())
        }
        .await;
        match outcome {
            Ok(()) => cleared.push(target),
            Err(e) => {
                refused.insert(target, e.to_string());
            }
        }
    }

    let mut report = state
        .proxy
        .invoke_on_targets(&subject.email, &cleared, &body.tool_name, &body.parameters)
        .await;
    report.total += refused.len();
    report.failed += refused.len();
    report.errors.extend(refused);
    Ok(Json(serde_json::to_value(report).unwrap_or(Value::Null)))
}

pub async fn list_resources(
    State(state): State<AppState>,
    Extension(subject): Extension<RequestSubject>,
    Query(query): Query<ServerQuery>,
) -> Result<Json<Value>, GatewayError> {
    match query.mcp_server {
        Some(server) => {
            let resources = state.proxy.list_resources(&server, &subject.email).await?;
            Ok(Json(json!({ "mcp_server": server, "resources": resources })))
        }
        None => {
            let aggregate = state.proxy.list_all_resources(&subject.email).await;
            Ok(Json(serde_json::to_value(aggregate).unwrap_or(Value::Null)))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReadResourceRequest {
    #[serde(default)]
    pub mcp_server: Option<String>,
    pub uri: String,
}

pub async fn read_resource(
    State(state): State<AppState>,
    Extension(subject): Extension<RequestSubject>,
    Json(body): Json<ReadResourceRequest>,
) -> Result<Json<Value>, GatewayError> {
    let (server, native_uri) = match decode_resource_uri(&body.uri) {
        Some((server, uri)) => (server, uri),
        None => {
            let server = body.mcp_server.ok_or_else(|| {
                GatewayError::Invalid(
                    "either an mcp:// uri or an mcp_server field is required".to_string(),
                )
            })?;
            (server, body.uri)
        }
    };
    let contents = state
        .proxy
        .read_resource(&server, &subject.email, &native_uri)
        .await?;
    Ok(Json(json!({ "mcp_server": server, "result": contents })))
}

pub async fn list_prompts(
    State(state): State<AppState>,
    Extension(subject): Extension<RequestSubject>,
    Query(query): Query<ServerQuery>,
) -> Result<Json<Value>, GatewayError> {
    match query.mcp_server {
        Some(server) => {
            let prompts = state.proxy.list_prompts(&server, &subject.email).await?;
            Ok(Json(json!({ "mcp_server": server, "prompts": prompts })))
        }
        None => {
            let aggregate = state.proxy.list_all_prompts(&subject.email).await;
            Ok(Json(serde_json::to_value(aggregate).unwrap_or(Value::Null)))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GetPromptRequest {
    #[serde(default)]
    pub mcp_server: Option<String>,
    pub prompt_name: String,
    #[serde(default)]
    pub arguments: Value,
}

pub async fn get_prompt(
    State(state): State<AppState>,
    Extension(subject): Extension<RequestSubject>,
    Json(body): Json<GetPromptRequest>,
) -> Result<Json<Value>, GatewayError> {
    let server = match body.mcp_server {
        Some(server) => server,
        None => state
            .proxy
            .find_prompt_server(&body.prompt_name, &subject.email)
            .await
            .ok_or_else(|| {
                GatewayError::NotFound(format!(
                    "no enabled server advertises prompt '{}'",
                    body.prompt_name
                ))
            })?,
    };
    let result = state
        .proxy
        .get_prompt(&server, &subject.email, &body.prompt_name, body.arguments)
        .await?;
    Ok(Json(json!({ "mcp_server": server, "result": result })))
}

// ---------------------------------------------------------------------------
// Policy-aware tool visibility
// ---------------------------------------------------------------------------

pub async fn policy_allowed_tools(
    State(state): State<AppState>,
    Extension(subject): Extension<RequestSubject>,
    Path(name): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    // 404 for unknown servers, not an empty allow set.
    state.registry.get(&name).await?;
    let filter = state.filter.policy_allowed_tools(&name, &subject.email).await;
    Ok(Json(json!({
        "mcp_server": name,
        "tools": filter.tools,
        "policy_filtering": if filter.available { "active" } else { "unavailable" },
    })))
}

/// Debug view of the three tool sets and their intersection.
pub async fn tool_availability_debug(
    State(state): State<AppState>,
    Extension(subject): Extension<RequestSubject>,
    Path(name): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    state.registry.get(&name).await?;

    let server_tools: Vec<String> = match state.proxy.list_tools(&name, &subject.email).await {
        Ok(tools) => tools.into_iter().map(|t| t.name).collect(),
        Err(e) => {
            return Ok(Json(json!({
                "mcp_server": name,
                "error": format!("backend listing failed: {e}"),
            })));
        }
    };
    let policy = state.filter.policy_allowed_tools(&name, &subject.email).await;

    let mut group_configs = serde_json::Map::new();
    for group in state.groups.list().await {
        if group.server_names.iter().any(|s| s == &name) {
            group_configs.insert(
                group.id.clone(),
                json!({
                    "name": group.name,
                    "tools": group.tool_config.get(&name),
                }),
            );
        }
    }

    let effective: Vec<&String> = server_tools
        .iter()
        .filter(|t| policy.tools.contains(t))
        .collect();

    Ok(Json(json!({
        "mcp_server": name,
        "server_tools": server_tools,
        "policy_allowed": policy.tools,
        "policy_filtering": if policy.available { "active" } else { "unavailable" },
        "group_configs": group_configs,
        "effective_tools": effective,
    })))
}

// ---------------------------------------------------------------------------
// Group management
// ---------------------------------------------------------------------------

fn group_view(state: &AppState, group: ServerGroup) -> Value {
    let gateway_url = group.gateway_url(&state.settings.public_url);
    let mut value = serde_json::to_value(&group).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("gateway_url".to_string(), json!(gateway_url));
    }
    value
}

pub async fn list_groups(State(state): State<AppState>) -> Json<Value> {
    let groups: Vec<Value> = state
        .groups
        .list()
        .await
        .into_iter()
        .map(|g| group_view(&state, g))
        .collect();
    Json(json!({ "count": groups.len(), "groups": groups }))
}

pub async fn create_group(
    State(state): State<AppState>,
    Json(spec): Json<crate::groups::GroupSpec>,
) -> Result<Json<Value>, GatewayError> {
    let group = state.groups.create(spec, &state.registry).await?;
    Ok(Json(group_view(&state, group)))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let group = state.groups.get(&id).await?;
    Ok(Json(group_view(&state, group)))
}

pub async fn update_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(spec): Json<crate::groups::GroupSpec>,
) -> Result<Json<Value>, GatewayError> {
    let group = state.groups.update(&id, spec, &state.registry).await?;
    Ok(Json(group_view(&state, group)))
}

pub async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    state.groups.delete(&id).await?;
    Ok(Json(json!({ "status": "deleted", "id": id })))
}

pub async fn group_add_server(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<Value>, GatewayError> {
    let group = state.groups.add_server(&id, &name, &state.registry).await?;
    Ok(Json(group_view(&state, group)))
}

pub async fn group_remove_server(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<Value>, GatewayError> {
    let group = state.groups.remove_server(&id, &name).await?;
    Ok(Json(group_view(&state, group)))
}

#[derive(Debug, Deserialize)]
pub struct ConfigureToolsRequest {
    pub tools: Option<Vec<String>>,
}

pub async fn group_configure_tools(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    Json(body): Json<ConfigureToolsRequest>,
) -> Result<Json<Value>, GatewayError> {
    let group = state.groups.configure_tools(&id, &name, body.tools).await?;
    Ok(Json(group_view(&state, group)))
}

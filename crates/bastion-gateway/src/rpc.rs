//! MCP JSON-RPC surface.
//!
//! `POST /mcp` serves the aggregated gateway; `POST /mcp/group/{id}/mcp`
//! serves one group's member servers filtered through policy and group
//! tool config. `GET` on either returns the static discovery document.
//!
//! Resource URIs cross the gateway as `mcp://{server}/{native-uri}`; the
//! scheme names the member server and the remainder is forwarded to the
//! backend unchanged.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use bastion_core::ServerGroup;
use bastion_mcp::protocol::{JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, codes};

use crate::auth::RequestSubject;
use crate::error::GatewayError;
use crate::state::AppState;

/// Gateway identity presented to MCP clients.
const SERVER_NAME: &str = "secure-mcp-gateway";

fn discovery_document() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
        "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
    })
}

/// Rewrite a backend-native URI into the gateway's addressing scheme.
pub(crate) fn encode_resource_uri(server: &str, uri: &str) -> String {
    format!("mcp://{server}/{uri}")
}

/// Split a gateway URI into `(server, native_uri)`.
pub(crate) fn decode_resource_uri(uri: &str) -> Option<(String, String)> {
    let rest = uri.strip_prefix("mcp://")?;
    let (server, native) = rest.split_once('/')?;
    if server.is_empty() || native.is_empty() {
        return None;
    }
    Some((server.to_string(), native.to_string()))
}

pub async fn handle_mcp_get() -> Json<Value> {
    Json(discovery_document())
}

pub async fn handle_group_mcp_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let group = state.groups.get(&id).await?;
    let mut doc = discovery_document();
    if let Value::Object(map) = &mut doc {
        map.insert("group".to_string(), json!(group.id));
    }
    Ok(Json(doc))
}

pub async fn handle_mcp_post(
    State(state): State<AppState>,
    Extension(subject): Extension<RequestSubject>,
    body: Bytes,
) -> Response {
    serve(state, subject, None, body).await
}

pub async fn handle_group_mcp_post(
    State(state): State<AppState>,
    Extension(subject): Extension<RequestSubject>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let group = match state.groups.get(&id).await {
        Ok(group) if group.enabled => group,
        Ok(_) => {
            return GatewayError::NotFound(format!("group '{id}' is disabled")).into_response();
        }
        Err(e) => return e.into_response(),
    };
    serve(state, subject, Some(group), body).await
}

async fn serve(
    state: AppState,
    subject: RequestSubject,
    group: Option<ServerGroup>,
    body: Bytes,
) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let response =
                JsonRpcResponse::error(None, codes::PARSE_ERROR, format!("parse error: {e}"));
            return Json(response).into_response();
        }
    };
    if request.jsonrpc != "2.0" {
        let response = JsonRpcResponse::error(
            request.id,
            codes::INVALID_REQUEST,
            "jsonrpc must be \"2.0\"",
        );
        return Json(response).into_response();
    }

    // Notifications get an empty accepted reply.
    if request.is_notification() {
        return StatusCode::ACCEPTED.into_response();
    }

    let response = dispatch(&state, &subject, group.as_ref(), request).await;
    Json(response).into_response()
}

async fn dispatch(
    state: &AppState,
    subject: &RequestSubject,
    group: Option<&ServerGroup>,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    let id = request.id.clone();
    let params = request.params.unwrap_or_else(|| json!({}));

    let outcome = match request.method.as_str() {
        "initialize" => Ok(discovery_document()),
        method if method.starts_with("notifications/") => Ok(json!({})),
        "tools/list" => list_tools(state, subject, group).await,
        "tools/call" => call_tool(state, subject, group, &params).await,
        "resources/list" => list_resources(state, subject, group).await,
        "resources/read" => read_resource(state, subject, group, &params).await,
        "prompts/list" => list_prompts(state, subject, group).await,
        "prompts/get" => get_prompt(state, subject, group, &params).await,
        other => {
            return JsonRpcResponse::error(
                id,
                codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            );
        }
    };

    match outcome {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(RpcFailure::Code(code, message)) => JsonRpcResponse::error(id, code, message),
        Err(RpcFailure::Gateway(e)) => {
            let code = match e {
                GatewayError::Invalid(_) | GatewayError::NotFound(_) => codes::INVALID_PARAMS,
                _ => codes::INTERNAL_ERROR,
            };
            JsonRpcResponse::error(id, code, e.to_string())
        }
    }
}

enum RpcFailure {
    Code(i32, String),
    Gateway(GatewayError),
}

impl From<GatewayError> for RpcFailure {
    fn from(e: GatewayError) -> Self {
        RpcFailure::Gateway(e)
    }
}

fn invalid_params(message: impl Into<String>) -> RpcFailure {
    RpcFailure::Code(codes::INVALID_PARAMS, message.into())
}

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

async fn list_tools(
    state: &AppState,
    subject: &RequestSubject,
    group: Option<&ServerGroup>,
) -> Result<Value, RpcFailure> {
    match group {
        None => {
            let aggregate = state.proxy.list_all_tools(&subject.email).await;
            for (server, error) in &aggregate.errors {
                tracing::warn!(server = %server, error = %error, "backend excluded from aggregated tools/list");
            }
            Ok(json!({ "tools": aggregate.tools }))
        }
        Some(group) => {
            let mut tools = Vec::new();
            for server in &group.server_names {
                let group_filter = group.tools_for(server).map(|v| v.as_slice());
                match state
                    .filter
                    .available_tools(&state.proxy, server, &subject.email, group_filter)
                    .await
                {
                    Ok(effective) => {
                        tools.extend(effective.into_iter().map(|tool| {
                            let mut value = serde_json::to_value(&tool).unwrap_or(Value::Null);
                            if let Value::Object(map) = &mut value {
                                map.insert("mcp_server".to_string(), json!(server));
                            }
                            value
                        }));
                    }
                    Err(e) => {
                        tracing::warn!(server = %server, error = %e, "member excluded from group tools/list");
                    }
                }
            }
            Ok(json!({ "tools": tools }))
        }
    }
}

async fn call_tool(
    state: &AppState,
    subject: &RequestSubject,
    group: Option<&ServerGroup>,
    params: &Value,
) -> Result<Value, RpcFailure> {
    let tool = str_param(params, "name")
        .ok_or_else(|| invalid_params("params.name is required"))?
        .to_string();
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let server_name = match group {
        None => state
            .proxy
            .find_tool_server(&tool, &subject.email)
            .await
            .ok_or_else(|| invalid_params(format!("no enabled server advertises tool '{tool}'")))?,
        Some(group) => {
            // The tool must be visible through the group's filtered view,
            // not merely advertised by a member.
            let mut found = None;
            for server in &group.server_names {
                let group_filter = group.tools_for(server).map(|v| v.as_slice());
                if let Ok(effective) = state
                    .filter
                    .available_tools(&state.proxy, server, &subject.email, group_filter)
                    .await
                {
                    if effective.iter().any(|t| t.name == tool) {
                        found = Some(server.clone());
                        break;
                    }
                }
            }
            found.ok_or_else(|| {
                invalid_params(format!("tool '{tool}' is not available in group '{}'", group.id))
            })?
        }
    };

    let server = state.registry.get(&server_name).await.map_err(RpcFailure::from)?;
    let context = subject.evaluation_context(&server, &tool, &arguments);
    let decision = state.filter.authorize_invoke(&context).await?;
    state.record_unblocked_deny(&subject.email, &server_name, &tool, &decision);

    let result = state
        .proxy
        .invoke_tool(&server_name, &subject.email, &tool, arguments)
        .await?;
    Ok(serde_json::to_value(result).unwrap_or(Value::Null))
}

async fn list_resources(
    state: &AppState,
    subject: &RequestSubject,
    group: Option<&ServerGroup>,
) -> Result<Value, RpcFailure> {
    let mut resources = Vec::new();
    match group {
        None => {
            let aggregate = state.proxy.list_all_resources(&subject.email).await;
            for tagged in aggregate.resources {
                resources.push(rewrite_resource(&tagged.mcp_server, tagged.resource));
            }
        }
        Some(group) => {
            for server in &group.server_names {
                match state.proxy.list_resources(server, &subject.email).await {
                    Ok(list) => {
                        resources.extend(list.into_iter().map(|r| rewrite_resource(server, r)));
                    }
                    Err(e) => {
                        tracing::warn!(server = %server, error = %e, "member excluded from group resources/list");
                    }
                }
            }
        }
    }
    Ok(json!({ "resources": resources }))
}

fn rewrite_resource(server: &str, mut resource: bastion_mcp::ResourceDescriptor) -> Value {
    resource.uri = encode_resource_uri(server, &resource.uri);
    serde_json::to_value(resource).unwrap_or(Value::Null)
}

async fn read_resource(
    state: &AppState,
    subject: &RequestSubject,
    group: Option<&ServerGroup>,
    params: &Value,
) -> Result<Value, RpcFailure> {
    let uri = str_param(params, "uri").ok_or_else(|| invalid_params("params.uri is required"))?;
    let (server, native_uri) = decode_resource_uri(uri)
        .ok_or_else(|| invalid_params("resource uris must use the mcp://{server}/{uri} form"))?;

    if let Some(group) = group {
        if !group.server_names.iter().any(|s| s == &server) {
            return Err(invalid_params(format!(
                "server '{server}' is not a member of group '{}'",
                group.id
            )));
        }
    }

    let contents = state
        .proxy
        .read_resource(&server, &subject.email, &native_uri)
        .await?;
    Ok(contents)
}

async fn list_prompts(
    state: &AppState,
    subject: &RequestSubject,
    group: Option<&ServerGroup>,
) -> Result<Value, RpcFailure> {
    match group {
        None => {
            let aggregate = state.proxy.list_all_prompts(&subject.email).await;
            Ok(json!({ "prompts": aggregate.prompts }))
        }
        Some(group) => {
            let mut prompts = Vec::new();
            for server in &group.server_names {
                match state.proxy.list_prompts(server, &subject.email).await {
                    Ok(list) => {
                        for prompt in list {
                            let mut value = serde_json::to_value(&prompt).unwrap_or(Value::Null);
                            if let Value::Object(map) = &mut value {
                                map.insert("mcp_server".to_string(), json!(server));
                            }
                            prompts.push(value);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(server = %server, error = %e, "member excluded from group prompts/list");
                    }
                }
            }
            Ok(json!({ "prompts": prompts }))
        }
    }
}

async fn get_prompt(
    state: &AppState,
    subject: &RequestSubject,
    group: Option<&ServerGroup>,
    params: &Value,
) -> Result<Value, RpcFailure> {
    let name = str_param(params, "name")
        .ok_or_else(|| invalid_params("params.name is required"))?
        .to_string();
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let server = match group {
        None => state
            .proxy
            .find_prompt_server(&name, &subject.email)
            .await
            .ok_or_else(|| invalid_params(format!("no enabled server advertises prompt '{name}'")))?,
        Some(group) => {
            let mut found = None;
            for server in &group.server_names {
                if let Ok(prompts) = state.proxy.list_prompts(server, &subject.email).await {
                    if prompts.iter().any(|p| p.name == name) {
                        found = Some(server.clone());
                        break;
                    }
                }
            }
            found.ok_or_else(|| {
                invalid_params(format!("prompt '{name}' is not available in group '{}'", group.id))
            })?
        }
    };

    let result = state
        .proxy
        .get_prompt(&server, &subject.email, &name, arguments)
        .await?;
    Ok(result)
}

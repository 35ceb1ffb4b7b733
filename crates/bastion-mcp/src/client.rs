//! HTTP client for backend MCP servers.
//!
//! All operations are JSON-RPC 2.0 over HTTP POST against the backend's
//! endpoint. One [`McpClient`] is shared process-wide; per-call state is the
//! [`BackendEndpoint`] (URL, composed auth, timeout) built by the proxy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Value, json};

use crate::credentials::ResolvedAuth;
use crate::error::McpError;
use crate::protocol::{
    CallToolResponse, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, PromptDescriptor,
    ResourceDescriptor, ToolDefinition,
};

/// Where and how to reach one backend for one call.
#[derive(Debug, Clone)]
pub struct BackendEndpoint {
    pub url: String,
    pub auth: ResolvedAuth,
    pub timeout: Duration,
}

impl BackendEndpoint {
    pub fn new(url: impl Into<String>, auth: ResolvedAuth, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            auth,
            timeout,
        }
    }
}

/// JSON-RPC client for backend MCP servers.
pub struct McpClient {
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl Default for McpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl McpClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Perform the MCP handshake: `initialize` followed by the
    /// `notifications/initialized` notification.
    pub async fn initialize(
        &self,
        endpoint: &BackendEndpoint,
        client_info: Value,
    ) -> Result<Value, McpError> {
        let result = self
            .rpc(
                endpoint,
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": client_info,
                }),
            )
            .await?;
        self.notify(endpoint, "notifications/initialized", json!({}))
            .await?;
        Ok(result)
    }

    pub async fn list_tools(
        &self,
        endpoint: &BackendEndpoint,
    ) -> Result<Vec<ToolDefinition>, McpError> {
        let result = self.rpc(endpoint, "tools/list", json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or(json!([]));
        Ok(serde_json::from_value(tools)?)
    }

    pub async fn call_tool(
        &self,
        endpoint: &BackendEndpoint,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResponse, McpError> {
        let result = self
            .rpc(
                endpoint,
                "tools/call",
                json!({ "name": name, "arguments": arguments }),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_resources(
        &self,
        endpoint: &BackendEndpoint,
    ) -> Result<Vec<ResourceDescriptor>, McpError> {
        let result = self.rpc(endpoint, "resources/list", json!({})).await?;
        let resources = result.get("resources").cloned().unwrap_or(json!([]));
        Ok(serde_json::from_value(resources)?)
    }

    /// Read a resource by its backend-native URI. Returns the raw
    /// `contents` payload.
    pub async fn read_resource(
        &self,
        endpoint: &BackendEndpoint,
        uri: &str,
    ) -> Result<Value, McpError> {
        self.rpc(endpoint, "resources/read", json!({ "uri": uri }))
            .await
    }

    pub async fn list_prompts(
        &self,
        endpoint: &BackendEndpoint,
    ) -> Result<Vec<PromptDescriptor>, McpError> {
        let result = self.rpc(endpoint, "prompts/list", json!({})).await?;
        let prompts = result.get("prompts").cloned().unwrap_or(json!([]));
        Ok(serde_json::from_value(prompts)?)
    }

    pub async fn get_prompt(
        &self,
        endpoint: &BackendEndpoint,
        name: &str,
        arguments: Value,
    ) -> Result<Value, McpError> {
        self.rpc(
            endpoint,
            "prompts/get",
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }

    /// Issue one JSON-RPC request and unwrap its result.
    pub async fn rpc(
        &self,
        endpoint: &BackendEndpoint,
        method: &str,
        params: Value,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let params = merge_body_auth(params, &endpoint.auth);
        let request = JsonRpcRequest::new(id, method, params);

        let response = self
            .post(endpoint, &request)
            .await
            .map_err(|e| map_transport_error(&endpoint.url, e))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(McpError::Unauthorized(format!(
                "backend at {} returned 401",
                endpoint.url
            )));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Upstream(format!(
                "backend returned HTTP {status}: {}",
                truncate(&body, 200)
            )));
        }

        let envelope: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| McpError::Protocol(format!("malformed JSON-RPC response: {e}")))?;

        if let Some(err) = envelope.error {
            return Err(McpError::Upstream(format!(
                "{} (code {})",
                err.message, err.code
            )));
        }
        envelope
            .result
            .ok_or_else(|| McpError::Protocol("response carries neither result nor error".to_string()))
    }

    /// Send a notification. Any 2xx reply is success; some backends answer
    /// `202 Accepted` with a `text/plain` body, which is not an error.
    pub async fn notify(
        &self,
        endpoint: &BackendEndpoint,
        method: &str,
        params: Value,
    ) -> Result<(), McpError> {
        let request = JsonRpcRequest::notification(method, params);
        let response = self
            .post(endpoint, &request)
            .await
            .map_err(|e| map_transport_error(&endpoint.url, e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(McpError::Upstream(format!(
                "notification '{method}' rejected with HTTP {}",
                response.status()
            )))
        }
    }

    async fn post(
        &self,
        endpoint: &BackendEndpoint,
        request: &JsonRpcRequest,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut builder = self
            .http
            .post(&endpoint.url)
            .timeout(endpoint.timeout)
            .query(&endpoint.auth.query)
            .json(request);
        for (name, value) in &endpoint.auth.headers {
            builder = builder.header(name, value);
        }
        builder.send().await
    }
}

/// Merge body-located auth fields into the outgoing params object.
fn merge_body_auth(params: Value, auth: &ResolvedAuth) -> Value {
    if auth.body.is_empty() {
        return params;
    }
    match params {
        Value::Object(mut map) => {
            for (k, v) in &auth.body {
                map.entry(k.clone()).or_insert_with(|| v.clone());
            }
            Value::Object(map)
        }
        other => other,
    }
}

fn map_transport_error(url: &str, err: reqwest::Error) -> McpError {
    if err.is_timeout() {
        McpError::Timeout(format!("no response from {url} within the configured timeout"))
    } else if err.is_connect() {
        McpError::Unreachable(format!("cannot connect to {url}: {err}"))
    } else {
        McpError::Upstream(err.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

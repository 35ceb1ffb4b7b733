//! End-to-end scenarios: gateway + live policy engine + mock MCP backend.
//!
//! The engine and a fake backend MCP server listen on ephemeral ports; the
//! gateway router is driven directly. This exercises the full pipeline:
//! credential composition, policy-group tool intersection, invocation
//! gating, and broadcast partial failure.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower::ServiceExt;

use bastion_core::{AuditBackendKind, Settings};
use bastion_gateway::{AppState, router};

/// Headers seen by the mock backend, for credential assertions.
type SeenHeaders = Arc<Mutex<Vec<HeaderMap>>>;

/// A minimal backend MCP server advertising three GitHub-ish tools.
fn mock_backend(seen: SeenHeaders) -> Router {
    async fn handle(
        axum::extract::State(seen): axum::extract::State<SeenHeaders>,
        headers: HeaderMap,
        Json(request): Json<Value>,
    ) -> axum::response::Response {
        seen.lock().unwrap().push(headers);
        let id = request.get("id").cloned();
        let method = request["method"].as_str().unwrap_or_default();

        // Notifications get the 202/text-plain treatment some real
        // backends exhibit.
        if id.is_none() {
            return axum::response::IntoResponse::into_response((
                StatusCode::ACCEPTED,
                [("content-type", "text/plain")],
                "Accepted",
            ));
        }

        let result = match method {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "mock-github", "version": "0.0.1"},
            }),
            "tools/list" => json!({
                "tools": [
                    {"name": "create_issue", "inputSchema": {"type": "object"}},
                    {"name": "list_repos", "inputSchema": {"type": "object"}},
                    {"name": "delete_repo", "inputSchema": {"type": "object"}},
                ],
            }),
            "tools/call" => json!({
                "content": [{"type": "text", "text": "done"}],
            }),
            "resources/list" => json!({
                "resources": [{"uri": "repo://acme/readme", "name": "readme"}],
            }),
            "resources/read" => json!({
                "contents": [{"uri": "repo://acme/readme", "text": "hello"}],
            }),
            "prompts/list" => json!({"prompts": []}),
            other => {
                let body = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": format!("unknown {other}")},
                });
                return axum::response::IntoResponse::into_response(Json(body));
            }
        };
        let body = json!({"jsonrpc": "2.0", "id": id, "result": result});
        axum::response::IntoResponse::into_response(Json(body))
    }

    Router::new().route("/mcp", post(handle)).with_state(seen)
}

async fn spawn_app(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_engine(dir: &std::path::Path) -> SocketAddr {
    let settings = Settings {
        policy_dir: dir.to_path_buf(),
        ..Settings::default()
    };
    let state = bastion_engine::EngineState::init(&settings).await.unwrap();
    spawn_app(bastion_engine::router(state)).await
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-user-email", "dev@acme.io")
        .body(match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn rpc(app: &Router, uri: &str, method: &str, params: Value) -> Value {
    let (status, body) = call(
        app,
        "POST",
        uri,
        Some(json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "rpc {method} failed: {body}");
    body
}

struct Stack {
    gateway: Router,
    seen: SeenHeaders,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
}

/// Backend + engine + gateway, with one policy granting two github tools
/// and one group exposing `create_issue` and `delete_repo`.
async fn full_stack() -> Stack {
    let policy_dir = tempfile::tempdir().unwrap();
    let engine_addr = spawn_engine(policy_dir.path()).await;

    let seen: SeenHeaders = Arc::new(Mutex::new(Vec::new()));
    let backend_addr = spawn_app(mock_backend(seen.clone())).await;

    let gw_dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        servers_file: gw_dir.path().join("servers.yaml"),
        groups_file: gw_dir.path().join("groups.yaml"),
        policy_dir: gw_dir.path().join("unused-policies"),
        policy_engine_url: format!("http://{engine_addr}"),
        audit: bastion_core::AuditSettings {
            backend: AuditBackendKind::Disabled,
            ..Default::default()
        },
        ..Settings::default()
    };
    let gateway = router(AppState::init(settings).await.unwrap());

    // SAFETY: the test owns its process environment.
    unsafe { std::env::set_var("E2E_GITHUB_TOKEN", "mcp_abc123") };
    let server = json!({
        "name": "github",
        "transport": "http",
        "url": format!("http://{backend_addr}/mcp"),
        "timeout_seconds": 5,
        "auth": {
            "method": "bearer",
            "location": "header",
            "name": "Authorization",
            "format": "prefix",
            "prefix": "Bearer ",
            "credential_ref": "env://E2E_GITHUB_TOKEN",
        },
    });
    let (status, _) = call(&gateway, "POST", "/mcp/servers", Some(server)).await;
    assert_eq!(status, StatusCode::OK);

    // Policy grants create_issue and list_repos on github.
    let engine_client = reqwest::Client::new();
    let policy = json!({
        "policy_code": "GH-TOOLS",
        "name": "GitHub tool grants",
        "status": "active",
        "priority": 10,
        "resources": [
            {"resource_type": "mcp_server", "resource_id": "github"},
            {"resource_type": "tool", "resource_id": "github:create_issue"},
            {"resource_type": "tool", "resource_id": "github:list_repos"},
        ],
        "policy_rules": [{
            "rule_id": "allow",
            "priority": 0,
            "conditions": [{
                "type": "tool",
                "operator": "in",
                "field": "tool.name",
                "value": ["create_issue", "list_repos"],
            }],
            "actions": [{"type": "allow"}],
        }],
    });
    let response = engine_client
        .post(format!("http://{engine_addr}/api/v1/unified/policies"))
        .json(&policy)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    // Group 1 exposes create_issue and delete_repo.
    let (status, _) = call(
        &gateway,
        "POST",
        "/mcp/groups",
        Some(json!({
            "name": "dev",
            "server_names": ["github"],
            "tool_config": {"github": ["create_issue", "delete_repo"]},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    Stack {
        gateway,
        seen,
        _dirs: (policy_dir, gw_dir),
    }
}

#[tokio::test]
async fn group_tools_list_is_the_policy_group_intersection() {
    let stack = full_stack().await;

    let body = rpc(&stack.gateway, "/mcp/group/1/mcp", "tools/list", json!({})).await;
    let tools = body["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1, "expected exactly create_issue: {body}");
    assert_eq!(tools[0]["name"], "create_issue");
}

#[tokio::test]
async fn group_call_outside_intersection_is_rejected() {
    let stack = full_stack().await;

    let body = rpc(
        &stack.gateway,
        "/mcp/group/1/mcp",
        "tools/call",
        json!({"name": "delete_repo", "arguments": {}}),
    )
    .await;
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("delete_repo"));

    // list_repos is policy-allowed but not group-exposed.
    let body = rpc(
        &stack.gateway,
        "/mcp/group/1/mcp",
        "tools/call",
        json!({"name": "list_repos", "arguments": {}}),
    )
    .await;
    assert!(body["error"].is_object());
}

#[tokio::test]
async fn group_call_inside_intersection_succeeds_with_credentials() {
    let stack = full_stack().await;

    let body = rpc(
        &stack.gateway,
        "/mcp/group/1/mcp",
        "tools/call",
        json!({"name": "create_issue", "arguments": {"title": "hi"}}),
    )
    .await;
    assert!(body["error"].is_null(), "unexpected error: {body}");
    assert_eq!(body["result"]["content"][0]["text"], "done");

    // The backend saw the composed bearer header; "Bearer mcp_abc123" is
    // 16 bytes and never logged.
    let seen = stack.seen.lock().unwrap();
    let authorized = seen.iter().filter_map(|h| h.get("authorization")).last();
    assert_eq!(
        authorized.and_then(|v| v.to_str().ok()),
        Some("Bearer mcp_abc123")
    );
}

#[tokio::test]
async fn global_endpoint_lists_and_routes_tools() {
    let stack = full_stack().await;

    let body = rpc(&stack.gateway, "/mcp", "tools/list", json!({})).await;
    let tools = body["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 3);
    assert!(tools.iter().all(|t| t["mcp_server"] == "github"));

    let body = rpc(
        &stack.gateway,
        "/mcp",
        "tools/call",
        json!({"name": "create_issue", "arguments": {}}),
    )
    .await;
    assert_eq!(body["result"]["content"][0]["text"], "done");

    // Policy default-denies tools without a matching rule.
    let body = rpc(
        &stack.gateway,
        "/mcp",
        "tools/call",
        json!({"name": "delete_repo", "arguments": {}}),
    )
    .await;
    assert!(body["error"].is_object());
}

#[tokio::test]
async fn resources_cross_the_gateway_with_rewritten_uris() {
    let stack = full_stack().await;

    let body = rpc(&stack.gateway, "/mcp", "resources/list", json!({})).await;
    let resources = body["result"]["resources"].as_array().unwrap();
    assert_eq!(resources[0]["uri"], "mcp://github/repo://acme/readme");

    let body = rpc(
        &stack.gateway,
        "/mcp",
        "resources/read",
        json!({"uri": "mcp://github/repo://acme/readme"}),
    )
    .await;
    assert_eq!(body["result"]["contents"][0]["text"], "hello");
}

#[tokio::test]
async fn ping_performs_handshake_despite_202_notification_reply() {
    let stack = full_stack().await;

    // The mock backend answers notifications/initialized with
    // 202/text-plain; the handshake must still succeed.
    let (status, body) = call(&stack.gateway, "GET", "/mcp/servers/github/ping", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["server_info"]["name"], "mock-github");
}

#[tokio::test]
async fn policy_allowed_tools_endpoint_reports_grants() {
    let stack = full_stack().await;

    let (status, body) = call(
        &stack.gateway,
        "GET",
        "/mcp/servers/github/policy-allowed-tools",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["policy_filtering"], "active");
    assert_eq!(body["tools"], json!(["create_issue", "list_repos"]));
}

#[tokio::test]
async fn broadcast_partial_failure() {
    let stack = full_stack().await;

    // Second server points at a dead address.
    let (status, _) = call(
        &stack.gateway,
        "POST",
        "/mcp/servers",
        Some(json!({
            "name": "dead",
            "transport": "http",
            "url": "http://127.0.0.1:9/mcp",
            "timeout_seconds": 2,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, report) = call(
        &stack.gateway,
        "POST",
        "/mcp/invoke-broadcast",
        Some(json!({
            "tool_name": "create_issue",
            "parameters": {},
            "mcp_servers": ["github", "dead"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["total"], 2);
    assert_eq!(report["successful"], 1);
    assert_eq!(report["failed"], 1);
    assert!(report["results"]["github"].is_object());
    assert!(report["errors"]["dead"].is_string());
}

#[tokio::test]
async fn tool_availability_debug_reports_all_sets() {
    let stack = full_stack().await;

    let (status, body) = call(
        &stack.gateway,
        "GET",
        "/mcp/servers/github/tool-availability-debug",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["server_tools"].as_array().unwrap().len(), 3);
    assert_eq!(body["policy_allowed"], json!(["create_issue", "list_repos"]));
    assert_eq!(
        body["effective_tools"],
        json!(["create_issue", "list_repos"])
    );
    assert!(body["group_configs"]["1"]["tools"].is_array());
}

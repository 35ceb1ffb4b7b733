//! HTTP-level tests for the gateway surfaces.
//!
//! Backend MCP servers are not spun up here; backend-dependent paths are
//! exercised against unreachable addresses to pin the error taxonomy and
//! the partial-failure semantics.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use bastion_core::{AuditBackendKind, Settings};
use bastion_gateway::{AppState, router};

async fn gateway(dir: &std::path::Path, auth_required: bool) -> Router {
    let settings = Settings {
        servers_file: dir.join("servers.yaml"),
        groups_file: dir.join("groups.yaml"),
        policy_dir: dir.join("policies"),
        // Nothing listens here; engine-dependent paths must fail closed.
        policy_engine_url: "http://127.0.0.1:9".to_string(),
        auth_required,
        audit: bastion_core::AuditSettings {
            backend: AuditBackendKind::Disabled,
            ..Default::default()
        },
        ..Settings::default()
    };
    let state = AppState::init(settings).await.unwrap();
    router(state)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-user-email", "dev@acme.io");
    let request = match body {
        Some(value) => builder.body(Body::from(value.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
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

fn http_server(name: &str) -> Value {
    json!({
        "name": name,
        "transport": "http",
        "url": format!("http://127.0.0.1:9/{name}/mcp"),
        "timeout_seconds": 5,
    })
}

#[tokio::test]
async fn healthz_reports_identity() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path(), false).await;
    let (status, body) = call(&app, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "secure-mcp-gateway");
    assert_eq!(body["audit_dropped"], 0);
}

#[tokio::test]
async fn server_crud_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path(), false).await;

    let (status, created) = call(&app, "POST", "/mcp/servers", Some(http_server("github"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["name"], "github");

    let (status, _) = call(&app, "POST", "/mcp/servers", Some(http_server("github"))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, config) = call(&app, "GET", "/mcp/servers/github/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(config["timeout_seconds"], 5);

    // Timeout change is visible on the next read without a restart.
    let mut updated = http_server("github");
    updated["timeout_seconds"] = json!(120);
    let (status, _) = call(&app, "PUT", "/mcp/servers/github/config", Some(updated)).await;
    assert_eq!(status, StatusCode::OK);
    let (_, config) = call(&app, "GET", "/mcp/servers/github/config", None).await;
    assert_eq!(config["timeout_seconds"], 120);

    let (status, listed) = call(&app, "GET", "/mcp/servers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["count"], 1);

    let (status, _) = call(&app, "DELETE", "/mcp/servers/github", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "GET", "/mcp/servers/github/config", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_server_configs_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path(), false).await;

    let mut bad_timeout = http_server("svc");
    bad_timeout["timeout_seconds"] = json!(0);
    let (status, error) = call(&app, "POST", "/mcp/servers", Some(bad_timeout)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["error"].as_str().unwrap().contains("timeout"));

    let bad_name = json!({
        "name": "bad name!",
        "transport": "http",
        "url": "http://x.local/mcp",
    });
    let (status, _) = call(&app, "POST", "/mcp/servers", Some(bad_name)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let stdio_with_url = json!({
        "name": "svc",
        "transport": "stdio",
        "url": "http://x.local/mcp",
    });
    let (status, _) = call(&app, "POST", "/mcp/servers", Some(stdio_with_url)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn convert_stdio_server_to_http() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path(), false).await;

    let stdio = json!({
        "name": "local-fs",
        "transport": "stdio",
        "command": "npx",
        "args": ["-y", "server-filesystem"],
    });
    call(&app, "POST", "/mcp/servers", Some(stdio)).await;

    let (status, converted) = call(
        &app,
        "POST",
        "/mcp/servers/local-fs/convert-to-http",
        Some(json!({"http_endpoint": "http://converter:7000/local-fs"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(converted["url"], "http://converter:7000/local-fs");

    let (_, config) = call(&app, "GET", "/mcp/servers/local-fs/config", None).await;
    assert_eq!(config["transport"], "http");
    assert_eq!(config["metadata"]["stdio_command"], "npx");

    // A second conversion is rejected: the server is http now.
    let (status, _) = call(
        &app,
        "POST",
        "/mcp/servers/local-fs/convert-to-http",
        Some(json!({"http_endpoint": "http://converter:7000/other"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn group_crud_and_validation() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path(), false).await;

    call(&app, "POST", "/mcp/servers", Some(http_server("a"))).await;
    call(&app, "POST", "/mcp/servers", Some(http_server("b"))).await;
    let stdio = json!({"name": "local", "transport": "stdio", "command": "npx"});
    call(&app, "POST", "/mcp/servers", Some(stdio)).await;

    let (status, group) = call(
        &app,
        "POST",
        "/mcp/groups",
        Some(json!({"name": "dev", "server_names": ["a"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = group["id"].as_str().unwrap().to_string();
    assert!(
        group["gateway_url"]
            .as_str()
            .unwrap()
            .ends_with(&format!("/mcp/group/{id}/mcp"))
    );

    // Duplicate name, unknown member, non-http member.
    let (status, _) = call(
        &app,
        "POST",
        "/mcp/groups",
        Some(json!({"name": "DEV", "server_names": ["b"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = call(
        &app,
        "POST",
        "/mcp/groups",
        Some(json!({"name": "x", "server_names": ["ghost"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(
        &app,
        "POST",
        "/mcp/groups",
        Some(json!({"name": "x", "server_names": ["local"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Membership management.
    let (status, with_b) = call(&app, "POST", &format!("/mcp/groups/{id}/servers/b"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(with_b["server_names"], json!(["a", "b"]));
    let (status, _) = call(
        &app,
        "POST",
        &format!("/mcp/groups/{id}/servers/local"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, configured) = call(
        &app,
        "PUT",
        &format!("/mcp/groups/{id}/servers/a/tools"),
        Some(json!({"tools": ["create_issue"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(configured["tool_config"]["a"], json!(["create_issue"]));

    let (status, without_b) =
        call(&app, "DELETE", &format!("/mcp/groups/{id}/servers/b"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(without_b["server_names"], json!(["a"]));

    // Deleting a member server prunes it from the group.
    call(&app, "DELETE", "/mcp/servers/a", None).await;
    let (_, after) = call(&app, "GET", &format!("/mcp/groups/{id}"), None).await;
    assert_eq!(after["server_names"], json!([]));

    let (status, _) = call(&app, "DELETE", &format!("/mcp/groups/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "GET", &format!("/mcp/groups/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn proxy_errors_follow_taxonomy() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path(), false).await;
    call(&app, "POST", "/mcp/servers", Some(http_server("dark"))).await;

    let (status, _) = call(&app, "GET", "/mcp/list-tools?mcp_server=ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Backend refuses connections: 502 with the URL named.
    let (status, error) = call(&app, "GET", "/mcp/list-tools?mcp_server=dark", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(error["error"].as_str().unwrap().contains("127.0.0.1:9"));

    // Disabled server fails fast.
    let mut disabled = http_server("dark");
    disabled["enabled"] = json!(false);
    call(&app, "PUT", "/mcp/servers/dark/config", Some(disabled)).await;
    let (status, error) = call(&app, "GET", "/mcp/list-tools?mcp_server=dark", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["error"].as_str().unwrap().contains("disabled"));
}

#[tokio::test]
async fn invoke_refuses_when_policy_engine_unreachable() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path(), false).await;
    call(&app, "POST", "/mcp/servers", Some(http_server("github"))).await;

    let (status, error) = call(
        &app,
        "POST",
        "/mcp/invoke?mcp_server=github",
        Some(json!({"tool_name": "create_issue", "parameters": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(
        error["error"]
            .as_str()
            .unwrap()
            .contains("policy filtering unavailable")
    );
}

#[tokio::test]
async fn policy_allowed_tools_fails_closed() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path(), false).await;

    let (status, _) = call(
        &app,
        "GET",
        "/mcp/servers/ghost/policy-allowed-tools",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    call(&app, "POST", "/mcp/servers", Some(http_server("github"))).await;
    let (status, body) = call(
        &app,
        "GET",
        "/mcp/servers/github/policy-allowed-tools",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["policy_filtering"], "unavailable");
    assert_eq!(body["tools"], json!([]));
}

#[tokio::test]
async fn broadcast_reports_partial_failures_with_http_200() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path(), false).await;
    call(&app, "POST", "/mcp/servers", Some(http_server("a"))).await;
    call(&app, "POST", "/mcp/servers", Some(http_server("b"))).await;

    let (status, report) = call(
        &app,
        "POST",
        "/mcp/invoke-broadcast",
        Some(json!({
            "tool_name": "health",
            "parameters": {},
            "mcp_servers": ["a", "b"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["total"], 2);
    assert_eq!(report["successful"], 0);
    assert_eq!(report["failed"], 2);
    assert!(report["errors"]["a"].is_string());
    assert!(report["errors"]["b"].is_string());
}

#[tokio::test]
async fn read_resource_requires_addressable_uri() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path(), false).await;

    let (status, error) = call(
        &app,
        "POST",
        "/mcp/read-resource",
        Some(json!({"uri": "file:///etc/hosts"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["error"].as_str().unwrap().contains("mcp_server"));
}

#[tokio::test]
async fn mcp_discovery_and_protocol_errors() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path(), false).await;

    let (status, doc) = call(&app, "GET", "/mcp", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["protocolVersion"], "2024-11-05");
    assert_eq!(doc["serverInfo"]["name"], "secure-mcp-gateway");

    // Parse error.
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], -32700);

    // Invalid request version.
    let (_, body) = call(
        &app,
        "POST",
        "/mcp",
        Some(json!({"jsonrpc": "1.0", "id": 1, "method": "initialize"})),
    )
    .await;
    assert_eq!(body["error"]["code"], -32600);

    // Unknown method.
    let (_, body) = call(
        &app,
        "POST",
        "/mcp",
        Some(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/destroy"})),
    )
    .await;
    assert_eq!(body["error"]["code"], -32601);

    // Initialize answers the discovery document.
    let (_, body) = call(
        &app,
        "POST",
        "/mcp",
        Some(json!({"jsonrpc": "2.0", "id": 3, "method": "initialize", "params": {}})),
    )
    .await;
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");

    // Notifications are accepted with an empty reply.
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn group_mcp_endpoint_resolves_group() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path(), false).await;

    let (status, _) = call(
        &app,
        "POST",
        "/mcp/group/99/mcp",
        Some(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    call(&app, "POST", "/mcp/servers", Some(http_server("a"))).await;
    call(
        &app,
        "POST",
        "/mcp/groups",
        Some(json!({"name": "dev", "server_names": ["a"]})),
    )
    .await;

    let (status, doc) = call(&app, "GET", "/mcp/group/1/mcp", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["group"], "1");

    let (status, body) = call(
        &app,
        "POST",
        "/mcp/group/1/mcp",
        Some(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["serverInfo"]["name"], "secure-mcp-gateway");
}

#[tokio::test]
async fn auth_required_rejects_anonymous_requests() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path(), true).await;

    let request = Request::builder()
        .method("GET")
        .uri("/mcp/servers")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // With an identity header the same request passes.
    let (status, _) = call(&app, "GET", "/mcp/servers", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn healthz_needs_no_identity_even_when_auth_required() {
    let dir = tempfile::tempdir().unwrap();
    let app = gateway(dir.path(), true).await;

    // Probes carry no identity headers.
    let request = Request::builder()
        .method("GET")
        .uri("/healthz")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
}

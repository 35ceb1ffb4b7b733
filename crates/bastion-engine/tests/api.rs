//! HTTP-level tests for the policy engine API.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use bastion_core::Settings;
use bastion_engine::{EngineState, router};

async fn engine(dir: &std::path::Path, evaluation: bool, management: bool) -> Router {
    let settings = Settings {
        policy_dir: dir.to_path_buf(),
        enable_evaluation: evaluation,
        enable_management: management,
        ..Settings::default()
    };
    let state = EngineState::init(&settings).await.unwrap();
    router(state)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => {
            builder = builder.header("content-type", "application/json");
            builder.body(Body::empty()).unwrap()
        }
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

fn sample_policy(code: &str, server: &str, tools: &[&str]) -> Value {
    let mut resources = vec![json!({"resource_type": "mcp_server", "resource_id": server})];
    for tool in tools {
        resources.push(json!({
            "resource_type": "tool",
            "resource_id": format!("{server}:{tool}"),
        }));
    }
    json!({
        "policy_code": code,
        "name": format!("policy {code}"),
        "status": "active",
        "priority": 10,
        "resources": resources,
        "policy_rules": [{
            "rule_id": "allow-all",
            "priority": 0,
            "conditions": [],
            "actions": [{"type": "allow"}],
        }],
    })
}

#[tokio::test]
async fn create_get_and_list() {
    let dir = tempfile::tempdir().unwrap();
    let app = engine(dir.path(), true, true).await;

    let (status, created) = call(
        &app,
        "POST",
        "/api/v1/unified/policies",
        Some(sample_policy("GH-ALLOW", "github", &["create_issue"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["version"], 1);
    let id = created["policy_id"].as_str().unwrap().to_string();

    // Fetch by id and by code.
    let (status, by_id) = call(&app, "GET", &format!("/api/v1/unified/policies/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_id["policy_code"], "GH-ALLOW");
    let (status, by_code) = call(&app, "GET", "/api/v1/unified/policies/gh-allow", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_code["policy_id"], created["policy_id"]);

    let (status, listed) = call(&app, "GET", "/api/v1/unified/policies?status=active", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["count"], 1);
}

#[tokio::test]
async fn duplicate_code_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let app = engine(dir.path(), true, true).await;

    let body = sample_policy("DUP", "a", &[]);
    let (status, _) = call(&app, "POST", "/api/v1/unified/policies", Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, error) = call(&app, "POST", "/api/v1/unified/policies", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(error["error"].as_str().unwrap().contains("DUP"));
}

#[tokio::test]
async fn update_bumps_version() {
    let dir = tempfile::tempdir().unwrap();
    let app = engine(dir.path(), true, true).await;

    let (_, created) = call(
        &app,
        "POST",
        "/api/v1/unified/policies",
        Some(sample_policy("VER", "a", &[])),
    )
    .await;
    let id = created["policy_id"].as_str().unwrap().to_string();

    let mut next = sample_policy("VER", "a", &["t"]);
    next["priority"] = json!(20);
    let (status, updated) = call(
        &app,
        "PUT",
        &format!("/api/v1/unified/policies/{id}"),
        Some(next),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["version"], 2);
    assert_eq!(updated["priority"], 20);
}

#[tokio::test]
async fn lifecycle_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let app = engine(dir.path(), true, true).await;

    let mut draft = sample_policy("LIFE", "a", &[]);
    draft["status"] = json!("draft");
    let (_, created) = call(&app, "POST", "/api/v1/unified/policies", Some(draft)).await;
    let id = created["policy_id"].as_str().unwrap().to_string();

    let (status, activated) = call(
        &app,
        "POST",
        &format!("/api/v1/unified/policies/{id}/activate"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(activated["status"], "active");

    let (status, suspended) = call(
        &app,
        "POST",
        &format!("/api/v1/unified/policies/{id}/suspend"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(suspended["status"], "suspended");

    let (status, retired) = call(
        &app,
        "POST",
        &format!("/api/v1/unified/policies/{id}/retire"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retired["status"], "retired");

    // Retired is terminal.
    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/v1/unified/policies/{id}/activate"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn resource_listing_and_cascade_delete() {
    let dir = tempfile::tempdir().unwrap();
    let app = engine(dir.path(), true, true).await;

    call(
        &app,
        "POST",
        "/api/v1/unified/policies",
        Some(sample_policy("SVC-A", "svc-x", &["read"])),
    )
    .await;
    call(
        &app,
        "POST",
        "/api/v1/unified/policies",
        Some(sample_policy("SVC-B", "svc-x", &[])),
    )
    .await;
    call(
        &app,
        "POST",
        "/api/v1/unified/policies",
        Some(sample_policy("OTHER", "svc-y", &[])),
    )
    .await;

    let (status, listed) = call(
        &app,
        "GET",
        "/api/v1/unified/resources/mcp_server/svc-x/policies",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["count"], 2);

    let (status, deleted) = call(
        &app,
        "DELETE",
        "/api/v1/unified/resources/mcp_server/svc-x/policies",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["deleted"], 2);

    let (_, after) = call(
        &app,
        "GET",
        "/api/v1/unified/resources/mcp_server/svc-x/policies",
        None,
    )
    .await;
    assert_eq!(after["count"], 0);
    assert_eq!(after["policies"], json!([]));

    // The unrelated policy survives.
    let (_, other) = call(
        &app,
        "GET",
        "/api/v1/unified/resources/mcp_server/svc-y/policies",
        None,
    )
    .await;
    assert_eq!(other["count"], 1);
}

#[tokio::test]
async fn resource_bindings_can_be_added_and_removed() {
    let dir = tempfile::tempdir().unwrap();
    let app = engine(dir.path(), true, true).await;

    let (_, created) = call(
        &app,
        "POST",
        "/api/v1/unified/policies",
        Some(sample_policy("BIND", "a", &[])),
    )
    .await;
    let id = created["policy_id"].as_str().unwrap().to_string();

    let (status, bound) = call(
        &app,
        "POST",
        &format!("/api/v1/unified/policies/{id}/resources"),
        Some(json!({"resource_type": "tool", "resource_id": "a:push"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bound["version"], 2);

    let (_, listed) = call(&app, "GET", "/api/v1/unified/resources/tool/a:push/policies", None).await;
    assert_eq!(listed["count"], 1);

    let (status, unbound) = call(
        &app,
        "DELETE",
        &format!("/api/v1/unified/policies/{id}/resources/tool/a:push"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unbound["version"], 3);

    let (_, listed) = call(&app, "GET", "/api/v1/unified/resources/tool/a:push/policies", None).await;
    assert_eq!(listed["count"], 0);
}

#[tokio::test]
async fn enhanced_evaluate_allows_and_denies() {
    let dir = tempfile::tempdir().unwrap();
    let app = engine(dir.path(), true, true).await;

    call(
        &app,
        "POST",
        "/api/v1/unified/policies",
        Some(sample_policy("GH", "github", &["create_issue"])),
    )
    .await;

    let ctx = json!({
        "subject": {"email": "dev@acme.io", "type": "user", "roles": [], "groups": []},
        "server": {"name": "github"},
        "tool": {"name": "create_issue", "arguments": {}},
    });
    let (status, result) = call(&app, "POST", "/api/v1/enhanced/evaluate", Some(ctx)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["decision"], "allow");
    assert_eq!(result["should_block"], false);

    // No policy matches an unknown server: fail-closed.
    let ctx = json!({
        "subject": {"email": "dev@acme.io"},
        "server": {"name": "unknown"},
        "tool": {"name": "anything", "arguments": {}},
    });
    let (_, result) = call(&app, "POST", "/api/v1/enhanced/evaluate", Some(ctx)).await;
    assert_eq!(result["decision"], "deny");
    assert_eq!(result["should_block"], true);
    assert_eq!(result["reason"], "no policy matched");
}

#[tokio::test]
async fn legacy_evaluate_shape() {
    let dir = tempfile::tempdir().unwrap();
    let app = engine(dir.path(), true, true).await;

    call(
        &app,
        "POST",
        "/api/v1/unified/policies",
        Some(sample_policy("GH", "github", &[])),
    )
    .await;

    let (status, result) = call(
        &app,
        "POST",
        "/api/v1/evaluate",
        Some(json!({"user": "dev@acme.io", "server": "github", "tool": "t"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["allowed"], true);

    let (_, result) = call(
        &app,
        "POST",
        "/api/v1/evaluate",
        Some(json!({"user": "dev@acme.io", "server": "nowhere", "tool": "t"})),
    )
    .await;
    assert_eq!(result["allowed"], false);
}

#[tokio::test]
async fn evaluation_only_node_rejects_mutations() {
    let dir = tempfile::tempdir().unwrap();
    // Seed through a management node first; read-only open requires the
    // directory to exist.
    let manager = engine(dir.path(), true, true).await;
    call(
        &manager,
        "POST",
        "/api/v1/unified/policies",
        Some(sample_policy("SEED", "a", &[])),
    )
    .await;

    let evaluator = engine(dir.path(), true, false).await;
    let (status, error) = call(
        &evaluator,
        "POST",
        "/api/v1/unified/policies",
        Some(sample_policy("NEW", "b", &[])),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(error["error"].as_str().unwrap().contains("mutations"));

    // Evaluation still works.
    let (status, _) = call(
        &evaluator,
        "POST",
        "/api/v1/evaluate",
        Some(json!({"user": "u", "server": "a", "tool": "t"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn management_only_node_rejects_evaluation() {
    let dir = tempfile::tempdir().unwrap();
    let app = engine(dir.path(), false, true).await;

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/evaluate",
        Some(json!({"user": "u", "server": "a", "tool": "t"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/unified/policies",
        Some(sample_policy("OK", "a", &[])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn split_mode_reload_picks_up_external_writes() {
    let dir = tempfile::tempdir().unwrap();
    let manager = engine(dir.path(), false, true).await;
    call(
        &manager,
        "POST",
        "/api/v1/unified/policies",
        Some(sample_policy("FIRST", "a", &[])),
    )
    .await;

    let evaluator = engine(dir.path(), true, false).await;
    let (_, before) = call(&evaluator, "GET", "/api/v1/unified/policies", None).await;
    assert_eq!(before["count"], 1);

    // Management node writes a second policy behind the evaluator's back.
    call(
        &manager,
        "POST",
        "/api/v1/unified/policies",
        Some(sample_policy("SECOND", "b", &[])),
    )
    .await;
    let (_, stale) = call(&evaluator, "GET", "/api/v1/unified/policies", None).await;
    assert_eq!(stale["count"], 1);

    let (status, reloaded) = call(&evaluator, "POST", "/api/v1/reload", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reloaded["policies"], 2);
    let (_, fresh) = call(&evaluator, "GET", "/api/v1/unified/policies", None).await;
    assert_eq!(fresh["count"], 2);
}

#[tokio::test]
async fn audit_only_policy_reports_deny_without_blocking() {
    let dir = tempfile::tempdir().unwrap();
    let app = engine(dir.path(), true, true).await;

    let policy = json!({
        "policy_code": "AUDIT-DENY",
        "name": "observe only",
        "status": "active",
        "priority": 50,
        "enforcement": "audit_only",
        "resources": [{"resource_type": "mcp_server", "resource_id": "github"}],
        "policy_rules": [{
            "rule_id": "deny-all",
            "priority": 0,
            "conditions": [],
            "actions": [{"type": "deny"}],
        }],
    });
    call(&app, "POST", "/api/v1/unified/policies", Some(policy)).await;

    let ctx = json!({
        "subject": {"email": "dev@acme.io"},
        "server": {"name": "github"},
        "tool": {"name": "t", "arguments": {}},
    });
    let (_, result) = call(&app, "POST", "/api/v1/enhanced/evaluate", Some(ctx)).await;
    assert_eq!(result["decision"], "deny");
    assert_eq!(result["should_block"], false);

    let (_, legacy) = call(
        &app,
        "POST",
        "/api/v1/evaluate",
        Some(json!({"user": "dev@acme.io", "server": "github", "tool": "t"})),
    )
    .await;
    assert_eq!(legacy["allowed"], true);
}

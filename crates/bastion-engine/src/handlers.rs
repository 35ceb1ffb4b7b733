//! Engine endpoint handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use bastion_policy::{
    EvaluationContext, PolicyDraft, PolicyFilter, PolicyStatus, ResourceType, context,
};

use crate::error::EngineError;
use crate::state::EngineState;

pub async fn healthz(State(state): State<EngineState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "policy-engine",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": state.mode.to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Unified policy CRUD
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub owner_id: Option<String>,
    pub search: Option<String>,
}

fn parse_status(raw: &str) -> Result<PolicyStatus, EngineError> {
    match raw {
        "draft" => Ok(PolicyStatus::Draft),
        "active" => Ok(PolicyStatus::Active),
        "suspended" => Ok(PolicyStatus::Suspended),
        "retired" => Ok(PolicyStatus::Retired),
        other => Err(EngineError::Invalid(format!("unknown status '{other}'"))),
    }
}

fn parse_resource_type(raw: &str) -> Result<ResourceType, EngineError> {
    raw.parse::<ResourceType>()
        .map_err(|_| EngineError::Invalid(format!("unknown resource type '{raw}'")))
}

pub async fn list_policies(
    State(state): State<EngineState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, EngineError> {
    let mut filter = PolicyFilter {
        owner_id: query.owner_id,
        search: query.search,
        resource_id: query.resource_id,
        ..PolicyFilter::default()
    };
    if let Some(raw) = query.status.as_deref() {
        filter.status = Some(parse_status(raw)?);
    }
    if let Some(raw) = query.resource_type.as_deref() {
        filter.resource_type = Some(parse_resource_type(raw)?);
    }

    let policies = state.store.list(&filter).await;
    Ok(Json(json!({ "count": policies.len(), "policies": policies })))
}

pub async fn create_policy(
    State(state): State<EngineState>,
    Json(draft): Json<PolicyDraft>,
) -> Result<Json<Value>, EngineError> {
    state.require_management()?;
    let policy = state.store.create(draft).await?;
    Ok(Json(serde_json::to_value(policy).unwrap_or(Value::Null)))
}

/// Resolve a path segment as a policy id or, failing that, a policy code.
async fn resolve_policy_id(state: &EngineState, raw: &str) -> Result<Uuid, EngineError> {
    if let Ok(id) = raw.parse::<Uuid>() {
        return Ok(id);
    }
    state
        .store
        .get_by_code(raw)
        .await
        .map(|p| p.policy_id)
        .ok_or_else(|| EngineError::NotFound(format!("policy '{raw}' does not exist")))
}

pub async fn get_policy(
    State(state): State<EngineState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, EngineError> {
    let id = resolve_policy_id(&state, &raw).await?;
    let policy = state
        .store
        .get(id)
        .await
        .ok_or_else(|| EngineError::NotFound(format!("policy '{raw}' does not exist")))?;
    Ok(Json(serde_json::to_value(policy).unwrap_or(Value::Null)))
}

pub async fn update_policy(
    State(state): State<EngineState>,
    Path(raw): Path<String>,
    Json(draft): Json<PolicyDraft>,
) -> Result<Json<Value>, EngineError> {
    state.require_management()?;
    let id = resolve_policy_id(&state, &raw).await?;
    let policy = state.store.update(id, draft).await?;
    Ok(Json(serde_json::to_value(policy).unwrap_or(Value::Null)))
}

pub async fn delete_policy(
    State(state): State<EngineState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, EngineError> {
    state.require_management()?;
    let id = resolve_policy_id(&state, &raw).await?;
    state.store.delete(id).await?;
    Ok(Json(json!({ "status": "deleted", "policy_id": id })))
}

async fn transition(
    state: &EngineState,
    raw: &str,
    to: PolicyStatus,
) -> Result<Json<Value>, EngineError> {
    state.require_management()?;
    let id = resolve_policy_id(state, raw).await?;
    let policy = state.store.set_status(id, to).await?;
    Ok(Json(serde_json::to_value(policy).unwrap_or(Value::Null)))
}

pub async fn activate_policy(
    State(state): State<EngineState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, EngineError> {
    transition(&state, &raw, PolicyStatus::Active).await
}

pub async fn suspend_policy(
    State(state): State<EngineState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, EngineError> {
    transition(&state, &raw, PolicyStatus::Suspended).await
}

pub async fn retire_policy(
    State(state): State<EngineState>,
    Path(raw): Path<String>,
) -> Result<Json<Value>, EngineError> {
    transition(&state, &raw, PolicyStatus::Retired).await
}

// ---------------------------------------------------------------------------
// Resource bindings
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BindingRequest {
    pub resource_type: String,
    pub resource_id: String,
}

pub async fn add_resource(
    State(state): State<EngineState>,
    Path(raw): Path<String>,
    Json(body): Json<BindingRequest>,
) -> Result<Json<Value>, EngineError> {
    state.require_management()?;
    let id = resolve_policy_id(&state, &raw).await?;
    let binding = bastion_policy::ResourceBinding::new(
        parse_resource_type(&body.resource_type)?,
        body.resource_id,
    );
    let policy = state.store.add_resource(id, binding).await?;
    Ok(Json(serde_json::to_value(policy).unwrap_or(Value::Null)))
}

pub async fn remove_resource(
    State(state): State<EngineState>,
    Path((raw, raw_type, resource_id)): Path<(String, String, String)>,
) -> Result<Json<Value>, EngineError> {
    state.require_management()?;
    let id = resolve_policy_id(&state, &raw).await?;
    let binding =
        bastion_policy::ResourceBinding::new(parse_resource_type(&raw_type)?, resource_id);
    let policy = state.store.remove_resource(id, &binding).await?;
    Ok(Json(serde_json::to_value(policy).unwrap_or(Value::Null)))
}

// ---------------------------------------------------------------------------
// Resource-indexed listings and cascades
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ResourceQuery {
    #[serde(default)]
    pub active_only: Option<bool>,
}

pub async fn policies_for_resource(
    State(state): State<EngineState>,
    Path((raw_type, resource_id)): Path<(String, String)>,
    Query(query): Query<ResourceQuery>,
) -> Result<Json<Value>, EngineError> {
    let resource_type = parse_resource_type(&raw_type)?;
    let policies = state
        .store
        .get_by_resource(resource_type, &resource_id, query.active_only.unwrap_or(false))
        .await;
    Ok(Json(json!({ "count": policies.len(), "policies": policies })))
}

/// Delete every policy bound to the resource. The gateway calls this from
/// its server-delete cascade; per-policy failures are logged and skipped
/// so one stuck file cannot wedge the cascade.
pub async fn delete_policies_for_resource(
    State(state): State<EngineState>,
    Path((raw_type, resource_id)): Path<(String, String)>,
) -> Result<Json<Value>, EngineError> {
    state.require_management()?;
    let resource_type = parse_resource_type(&raw_type)?;
    let policies = state
        .store
        .get_by_resource(resource_type, &resource_id, false)
        .await;

    let mut deleted = 0usize;
    for policy in policies {
        match state.store.delete(policy.policy_id).await {
            Ok(()) => deleted += 1,
            Err(e) => {
                tracing::warn!(
                    policy = %policy.policy_code,
                    error = %e,
                    "cascade delete skipped a policy"
                );
            }
        }
    }
    Ok(Json(json!({ "deleted": deleted })))
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Flat request shape of the legacy `/api/v1/evaluate` endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct LegacyEvaluateRequest {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub ip: String,
}

pub async fn evaluate_legacy(
    State(state): State<EngineState>,
    Json(request): Json<LegacyEvaluateRequest>,
) -> Result<Json<Value>, EngineError> {
    state.require_evaluation()?;
    let ctx = EvaluationContext {
        subject: context::SubjectContext {
            email: request.user,
            subject_type: "user".to_string(),
            ..context::SubjectContext::default()
        },
        request: context::RequestMeta {
            ip: request.ip,
            ..context::RequestMeta::default()
        },
        server: context::ServerContext {
            name: request.server,
            ..context::ServerContext::default()
        },
        tool: context::ToolContext {
            name: request.tool,
            arguments: request.arguments,
        },
        ..EvaluationContext::default()
    };

    let result = state.evaluator.evaluate(&ctx).await;
    // audit_only denies record but never block, so they read as allowed.
    Ok(Json(json!({
        "allowed": !result.should_block,
        "reason": result.reason,
    })))
}

pub async fn evaluate_enhanced(
    State(state): State<EngineState>,
    Json(ctx): Json<EvaluationContext>,
) -> Result<Json<Value>, EngineError> {
    state.require_evaluation()?;
    let result = state.evaluator.evaluate(&ctx).await;
    Ok(Json(serde_json::to_value(result).unwrap_or(Value::Null)))
}

// ---------------------------------------------------------------------------
// Reload
// ---------------------------------------------------------------------------

pub async fn reload(State(state): State<EngineState>) -> Result<Json<Value>, EngineError> {
    let count = state
        .store
        .reload()
        .await
        .map_err(|e| EngineError::Persistence(e.to_string()))?;
    Ok(Json(json!({ "status": "reloaded", "policies": count })))
}

//! HTTP client for the policy engine.
//!
//! The gateway asks the engine two things: which policies bind to a
//! resource (tool filtering, delete cascades) and what the decision is for
//! a concrete request context. Failures map to the gateway taxonomy; the
//! delete cascade logs failures and never surfaces them.

use serde::Deserialize;
use std::time::Duration;

use bastion_policy::{EvaluationContext, EvaluationResult, Policy};

use crate::error::GatewayError;

/// Response shape of `/api/v1/unified/resources/{type}/{id}/policies`.
#[derive(Debug, Deserialize)]
struct PoliciesEnvelope {
    #[serde(default)]
    policies: Vec<Policy>,
    #[serde(default)]
    count: usize,
}

#[derive(Debug, Deserialize)]
struct DeletedEnvelope {
    #[serde(default)]
    deleted: usize,
}

/// Client over the policy engine's REST API.
#[derive(Clone)]
pub struct PolicyEngineClient {
    base: String,
    http: reqwest::Client,
}

impl PolicyEngineClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Policies bound to `(resource_type, resource_id)`.
    pub async fn policies_for_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
        active_only: bool,
    ) -> Result<Vec<Policy>, GatewayError> {
        let url = format!(
            "{}/api/v1/unified/resources/{resource_type}/{resource_id}/policies",
            self.base
        );
        let response = self
            .http
            .get(&url)
            .query(&[("active_only", active_only.to_string())])
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| map_transport(&url, e))?;
        let response = check_status(response).await?;
        let envelope: PoliciesEnvelope = response
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(format!("malformed engine response: {e}")))?;
        tracing::debug!(
            resource = format!("{resource_type}:{resource_id}"),
            count = envelope.count,
            "fetched policies for resource"
        );
        Ok(envelope.policies)
    }

    /// Delete every policy bound to the resource. Used by the server-delete
    /// cascade.
    pub async fn delete_policies_for_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<usize, GatewayError> {
        let url = format!(
            "{}/api/v1/unified/resources/{resource_type}/{resource_id}/policies",
            self.base
        );
        let response = self
            .http
            .delete(&url)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| map_transport(&url, e))?;
        let response = check_status(response).await?;
        let envelope: DeletedEnvelope = response
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(format!("malformed engine response: {e}")))?;
        Ok(envelope.deleted)
    }

    /// Evaluate a request context. Engine unavailability is an error here;
    /// tool-invocation callers turn that into a refusal, since policy
    /// filtering is fail-closed.
    pub async fn evaluate(
        &self,
        context: &EvaluationContext,
    ) -> Result<EvaluationResult, GatewayError> {
        let url = format!("{}/api/v1/enhanced/evaluate", self.base);
        let response = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(10))
            .json(context)
            .send()
            .await
            .map_err(|e| map_transport(&url, e))?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(format!("malformed evaluation result: {e}")))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Upstream(format!(
        "policy engine returned HTTP {status}: {}",
        body.chars().take(200).collect::<String>()
    )))
}

fn map_transport(url: &str, err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(format!("policy engine at {url} timed out"))
    } else {
        GatewayError::Unreachable(format!("policy engine at {url}: {err}"))
    }
}

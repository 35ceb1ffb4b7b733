//! Subject extraction middleware.
//!
//! The OAuth2 issuer sits in front of the gateway; by the time a request
//! arrives the authenticated identity is carried in headers
//! (`x-user-email`, `x-user-roles`, `x-user-groups`). This middleware
//! lifts those into a [`RequestSubject`] extension for handlers. With
//! `AUTH_REQUIRED` set, requests without an identity are rejected.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use bastion_core::BackendServer;
use bastion_policy::{EvaluationContext, context};

use crate::error::GatewayError;
use crate::state::AppState;

/// The authenticated (or anonymous) subject of a request.
#[derive(Debug, Clone)]
pub struct RequestSubject {
    pub email: String,
    pub roles: Vec<String>,
    pub groups: Vec<String>,
    pub ip: String,
    pub user_agent: String,
}

impl RequestSubject {
    pub fn anonymous() -> Self {
        Self {
            email: "anonymous".to_string(),
            roles: Vec::new(),
            groups: Vec::new(),
            ip: String::new(),
            user_agent: String::new(),
        }
    }

    /// Build the evaluation context for a tool call on `server`.
    pub fn evaluation_context(
        &self,
        server: &BackendServer,
        tool: &str,
        arguments: &serde_json::Value,
    ) -> EvaluationContext {
        EvaluationContext {
            subject: context::SubjectContext {
                email: self.email.clone(),
                subject_type: "user".to_string(),
                roles: self.roles.clone(),
                groups: self.groups.clone(),
            },
            request: context::RequestMeta {
                ip: self.ip.clone(),
                user_agent: self.user_agent.clone(),
                timestamp: Some(chrono::Utc::now()),
            },
            oauth: context::OauthContext::default(),
            server: context::ServerContext {
                name: server.name.clone(),
                auth_type: format!("{:?}", server.auth.method).to_lowercase(),
                mode: server.transport.to_string(),
            },
            tool: context::ToolContext {
                name: tool.to_string(),
                arguments: arguments.clone(),
            },
        }
    }
}

fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request.headers().get(name).and_then(|v| v.to_str().ok())
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Extract the subject and stash it as a request extension.
pub async fn subject_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let email = header(&request, "x-user-email").unwrap_or_default().to_string();
    if state.settings.auth_required && email.is_empty() {
        return Err(GatewayError::Unauthorized(
            "request carries no authenticated subject".to_string(),
        ));
    }

    let subject = RequestSubject {
        email: if email.is_empty() {
            "anonymous".to_string()
        } else {
            email
        },
        roles: split_list(header(&request, "x-user-roles")),
        groups: split_list(header(&request, "x-user-groups")),
        ip: header(&request, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .unwrap_or_default()
            .trim()
            .to_string(),
        user_agent: header(&request, "user-agent").unwrap_or_default().to_string(),
    };

    request.extensions_mut().insert(subject);
    Ok(next.run(request).await)
}

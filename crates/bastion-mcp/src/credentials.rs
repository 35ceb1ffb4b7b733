//! Credential resolution and auth composition.
//!
//! Credential references are resolved at request time so rotated secrets
//! take effect without a restart. The resolved secret stays inside this
//! module's callers (proxy and client); log lines carry the header or
//! parameter name and the value's length, never the value.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use bastion_core::{AuthConfig, AuthLocation, AuthMethod, CredentialFormat};

use crate::error::McpError;

/// Auth material composed for one outgoing request.
#[derive(Debug, Clone, Default)]
pub struct ResolvedAuth {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: serde_json::Map<String, serde_json::Value>,
}

/// Resolve a credential reference to its raw secret.
///
/// `env://VAR` reads the process environment on every call; `file:///path`
/// reads the file and trims trailing whitespace. Other schemes are
/// unsupported.
pub fn resolve_credential(credential_ref: &str) -> Result<String, McpError> {
    if let Some(var) = credential_ref.strip_prefix("env://") {
        return match std::env::var(var) {
            Ok(v) if !v.is_empty() => Ok(v),
            _ => Err(McpError::Credential(format!(
                "environment variable '{var}' is not set"
            ))),
        };
    }
    if let Some(path) = credential_ref.strip_prefix("file://") {
        return std::fs::read_to_string(path)
            .map(|s| s.trim_end().to_string())
            .map_err(|e| McpError::Credential(format!("cannot read '{path}': {e}")));
    }
    Err(McpError::Unsupported(credential_ref.to_string()))
}

/// Apply formatting rules to a resolved secret.
fn format_value(auth: &AuthConfig, secret: &str) -> String {
    match auth.format {
        CredentialFormat::Raw => secret.to_string(),
        // The prefix is preserved exactly, including trailing whitespace.
        CredentialFormat::Prefix => format!("{}{secret}", auth.prefix.as_deref().unwrap_or("")),
        CredentialFormat::Template => auth
            .template
            .as_deref()
            .unwrap_or("{credential}")
            .replacen("{credential}", secret, 1),
    }
}

/// Resolve and compose auth material for a server.
///
/// Returns empty material for `method: none`. Fails with an error naming the
/// reference when resolution fails; no outbound request should be issued in
/// that case.
pub fn apply_auth(server_name: &str, auth: &AuthConfig) -> Result<ResolvedAuth, McpError> {
    if auth.method == AuthMethod::None {
        return Ok(ResolvedAuth::default());
    }

    let reference = auth.credential_ref.as_deref().ok_or_else(|| {
        McpError::Credential(format!("server '{server_name}' has no credential_ref"))
    })?;
    let secret = resolve_credential(reference)?;

    let value = match auth.method {
        // Bearer composes the conventional scheme unless an explicit
        // prefix/template overrides it.
        AuthMethod::Bearer if auth.format == CredentialFormat::Raw => {
            format!("Bearer {secret}")
        }
        AuthMethod::Basic => {
            let user = auth.username.as_deref().unwrap_or_default();
            format!("Basic {}", BASE64.encode(format!("{user}:{secret}")))
        }
        _ => format_value(auth, &secret),
    };

    tracing::debug!(
        server = server_name,
        name = %auth.name,
        value_len = value.len(),
        "composed auth credential"
    );

    let mut resolved = ResolvedAuth::default();
    match auth.location {
        AuthLocation::Header => resolved.headers.push((auth.name.clone(), value)),
        AuthLocation::Query => resolved.query.push((auth.name.clone(), value)),
        AuthLocation::Body => {
            resolved
                .body
                .insert(auth.name.clone(), serde_json::Value::String(value));
        }
    }
    Ok(resolved)
}

//! Backend MCP server configuration.
//!
//! A [`BackendServer`] describes one upstream MCP server the gateway can
//! reach: transport, address, timeout, authentication, and tool allowlist.
//! Credentials are never stored inline; auth configs carry a reference
//! (`env://VAR` or `file:///path`) that is resolved at request time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CoreError;

/// Transport used to reach a backend server.
///
/// Only `http` is reachable directly. `stdio` servers must be fronted by a
/// converter service that exposes them over HTTP; `sse` and `websocket` are
/// accepted in configuration but routed the same way as `http` by the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Stdio,
    Sse,
    Websocket,
}

impl TransportKind {
    /// Whether this transport is addressed by URL.
    pub fn is_url_based(self) -> bool {
        !matches!(self, TransportKind::Stdio)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportKind::Http => "http",
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::Websocket => "websocket",
        };
        f.write_str(s)
    }
}

/// Authentication method for a backend server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Bearer,
    ApiKey,
    Basic,
    Oauth2,
    Custom,
    #[default]
    None,
}

/// Where the credential is placed on the outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLocation {
    #[default]
    Header,
    Query,
    Body,
}

/// How the resolved secret is formatted before being emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialFormat {
    #[default]
    Raw,
    Prefix,
    Template,
}

/// Authentication configuration for a backend server.
///
/// The `credential_ref` is an indirection (`env://VAR` or `file:///path`);
/// the raw secret is resolved per request and formatted according to
/// `format`. A `prefix` is preserved byte-exact, including trailing
/// whitespace, so `"Bearer "` yields `Bearer <secret>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub method: AuthMethod,

    #[serde(default)]
    pub location: AuthLocation,

    /// Header or parameter name. Defaults to `Authorization`.
    #[serde(default = "default_auth_name")]
    pub name: String,

    #[serde(default)]
    pub format: CredentialFormat,

    /// Literal prefix for `format: prefix`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Template for `format: template`; must contain `{credential}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Credential reference: `env://VAR` or `file:///path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,

    /// Username for `method: basic` (the reference resolves the password).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

fn default_auth_name() -> String {
    "Authorization".to_string()
}

impl AuthConfig {
    /// Validate internal consistency of the auth block.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.method == AuthMethod::None {
            return Ok(());
        }

        match self.format {
            CredentialFormat::Prefix if self.prefix.is_none() => {
                return Err(CoreError::Invalid(
                    "auth format 'prefix' requires a prefix".to_string(),
                ));
            }
            CredentialFormat::Template => {
                let ok = self
                    .template
                    .as_deref()
                    .is_some_and(|t| t.contains("{credential}"));
                if !ok {
                    return Err(CoreError::Invalid(
                        "auth format 'template' requires a template containing {credential}"
                            .to_string(),
                    ));
                }
            }
            _ => {}
        }

        match self.credential_ref.as_deref() {
            Some(r) if r.starts_with("env://") || r.starts_with("file://") => Ok(()),
            Some(r) => Err(CoreError::Invalid(format!(
                "unsupported credential_ref scheme: {r}"
            ))),
            None => Err(CoreError::Invalid(format!(
                "auth method '{:?}' requires a credential_ref",
                self.method
            ))),
        }
    }
}

/// Configuration for one backend MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendServer {
    /// Unique slug, `[A-Za-z0-9_-]+`.
    pub name: String,

    pub transport: TransportKind,

    /// Endpoint URL for url-based transports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Launch command for stdio transports (executed by the converter
    /// service, never by the gateway).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// End-to-end timeout per backend call, 1..=300 seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Tool names this server is allowed to expose; `["*"]` means all.
    #[serde(default = "default_tools_allowlist")]
    pub tools_allowlist: Vec<String>,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

fn default_tools_allowlist() -> Vec<String> {
    vec!["*".to_string()]
}

/// Metadata key under which a converted stdio server records the HTTP
/// endpoint of its converter service.
pub const HTTP_ENDPOINT_KEY: &str = "http_endpoint";

impl BackendServer {
    /// Validate the full server configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(CoreError::Invalid(format!(
                "server name '{}' must match [A-Za-z0-9_-]+",
                self.name
            )));
        }

        if !(1..=300).contains(&self.timeout_seconds) {
            return Err(CoreError::Invalid(format!(
                "timeout_seconds {} out of range 1..=300",
                self.timeout_seconds
            )));
        }

        match self.transport {
            t if t.is_url_based() => {
                let Some(raw) = self.url.as_deref() else {
                    return Err(CoreError::Invalid(format!(
                        "transport '{t}' requires a url"
                    )));
                };
                let parsed = url::Url::parse(raw)
                    .map_err(|e| CoreError::Invalid(format!("invalid url '{raw}': {e}")))?;
                if !matches!(parsed.scheme(), "http" | "https" | "ws" | "wss") {
                    return Err(CoreError::Invalid(format!(
                        "unsupported url scheme '{}'",
                        parsed.scheme()
                    )));
                }
                if self.command.is_some() {
                    return Err(CoreError::Invalid(
                        "url-based transports must not set a command".to_string(),
                    ));
                }
            }
            _ => {
                if self.command.as_deref().unwrap_or("").is_empty() {
                    return Err(CoreError::Invalid(
                        "transport 'stdio' requires a command".to_string(),
                    ));
                }
                if self.url.is_some() {
                    return Err(CoreError::Invalid(
                        "transport 'stdio' must not set a url".to_string(),
                    ));
                }
            }
        }

        self.auth.validate()
    }

    /// Whether the allowlist permits a tool name.
    pub fn tool_allowed(&self, tool: &str) -> bool {
        self.tools_allowlist.iter().any(|t| t == "*" || t == tool)
    }

    /// HTTP endpoint the proxy should address for this server.
    ///
    /// For url-based transports this is the configured URL; for stdio it is
    /// the converter endpoint recorded in metadata, if any.
    pub fn http_endpoint(&self) -> Option<&str> {
        match self.transport {
            TransportKind::Stdio => self
                .metadata
                .get(HTTP_ENDPOINT_KEY)
                .and_then(|v| v.as_str()),
            _ => self.url.as_deref(),
        }
    }
}

//! # bastion-mcp
//!
//! MCP plumbing for the gateway: JSON-RPC 2.0 protocol types, the HTTP
//! client used to talk to backend MCP servers, and credential resolution
//! for per-server authentication.
//!
//! The gateway never speaks stdio to a backend directly; stdio servers are
//! reached through a converter service that exposes them over HTTP, so this
//! crate only knows about HTTP endpoints.

pub mod client;
pub mod credentials;
pub mod error;
pub mod protocol;

pub use client::{BackendEndpoint, McpClient};
pub use credentials::{ResolvedAuth, apply_auth, resolve_credential};
pub use error::McpError;
pub use protocol::{
    CallToolResponse, JsonRpcError, JsonRpcRequest, JsonRpcResponse, PromptDescriptor,
    ResourceDescriptor, ServerInfo, ToolDefinition, PROTOCOL_VERSION,
};

//! # bastion-core
//!
//! Shared domain and configuration types for the Bastion MCP gateway.
//!
//! This crate defines the entities the rest of the workspace operates on:
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`server`] | Backend MCP server configuration (`BackendServer`, `AuthConfig`) |
//! | [`group`] | Server groups exposed as virtual MCP endpoints |
//! | [`settings`] | Process settings resolved from the environment |
//!
//! Configuration is YAML on disk (`servers.yaml`, `groups.yaml`) and
//! environment variables for process-level settings. All types round-trip
//! through serde without loss.

pub mod error;
pub mod group;
pub mod server;
pub mod settings;

pub use error::CoreError;
pub use group::{GroupToolConfig, ServerGroup};
pub use server::{
    AuthConfig, AuthLocation, AuthMethod, BackendServer, CredentialFormat, HTTP_ENDPOINT_KEY,
    TransportKind,
};
pub use settings::{AuditBackendKind, AuditSettings, Settings};

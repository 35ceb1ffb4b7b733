//! # bastion-gateway
//!
//! The gateway aggregates backend MCP servers behind two surfaces: a REST
//! facade for programmatic callers and a JSON-RPC endpoint compatible with
//! MCP clients. Policy decisions come from the policy engine; tool
//! visibility is the intersection of what the backend advertises, what
//! policy allows, and what the group configuration exposes.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`registry`] | Backend server registry (YAML-persisted, cached) |
//! | [`groups`] | Server group registry and tool visibility config |
//! | [`proxy`] | Per-server operations, aggregation, broadcast |
//! | [`tools`] | Policy-aware tool filtering |
//! | [`engine_client`] | HTTP client for the policy engine |
//! | [`rest`] | REST endpoint handlers |
//! | [`rpc`] | MCP JSON-RPC dispatch (`/mcp`, `/mcp/group/{id}/mcp`) |
//! | [`auth`] | Subject extraction middleware |

pub mod auth;
pub mod engine_client;
pub mod error;
pub mod groups;
pub mod proxy;
pub mod registry;
pub mod rest;
pub mod routes;
pub mod rpc;
pub mod state;
pub mod tools;

pub use error::GatewayError;
pub use routes::router;
pub use state::AppState;

//! # bastion-engine
//!
//! The policy engine HTTP service. Serves unified policy CRUD and
//! lifecycle management, resource-indexed listings, and request
//! evaluation, over the file-backed store in `bastion-policy`.
//!
//! The engine runs in one of three in-process modes derived from
//! `ENABLE_EVALUATION` / `ENABLE_MANAGEMENT`: combined, evaluation-only,
//! or management-only. Split deployments run one evaluation-only node and
//! one management-only node over the same policy directory; evaluation
//! nodes open the store read-only and pick up external writes via an
//! mtime watcher or an explicit reload call.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod watcher;

pub use error::EngineError;
pub use routes::router;
pub use state::{DeployMode, EngineState};
pub use watcher::spawn_watcher;

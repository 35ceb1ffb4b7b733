//! Route table for the policy engine.

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::EngineState;

/// Build the engine router. Mode gating happens inside the handlers so a
/// rejected mutation still gets a taxonomy-shaped error body.
pub fn router(state: EngineState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route(
            "/api/v1/unified/policies",
            get(handlers::list_policies).post(handlers::create_policy),
        )
        .route(
            "/api/v1/unified/policies/{id}",
            get(handlers::get_policy)
                .put(handlers::update_policy)
                .delete(handlers::delete_policy),
        )
        .route(
            "/api/v1/unified/policies/{id}/activate",
            post(handlers::activate_policy),
        )
        .route(
            "/api/v1/unified/policies/{id}/suspend",
            post(handlers::suspend_policy),
        )
        .route(
            "/api/v1/unified/policies/{id}/retire",
            post(handlers::retire_policy),
        )
        .route(
            "/api/v1/unified/policies/{id}/resources",
            post(handlers::add_resource),
        )
        .route(
            "/api/v1/unified/policies/{id}/resources/{type}/{resource_id}",
            axum::routing::delete(handlers::remove_resource),
        )
        .route(
            "/api/v1/unified/resources/{type}/{id}/policies",
            get(handlers::policies_for_resource).delete(handlers::delete_policies_for_resource),
        )
        .route("/api/v1/evaluate", post(handlers::evaluate_legacy))
        .route("/api/v1/enhanced/evaluate", post(handlers::evaluate_enhanced))
        .route("/api/v1/reload", post(handlers::reload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

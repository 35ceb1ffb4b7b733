//! Route table for the gateway.

use axum::Router;
use axum::routing::{delete, get, post, put};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::rest;
use crate::rpc;
use crate::state::AppState;

/// Build the gateway router with all surfaces mounted.
///
/// The subject middleware wraps only the API surfaces; `/healthz` is
/// merged in outside it so orchestrator probes need no identity headers
/// even with `AUTH_REQUIRED` set.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // MCP JSON-RPC surfaces
        .route("/mcp", get(rpc::handle_mcp_get).post(rpc::handle_mcp_post))
        .route(
            "/mcp/group/{id}/mcp",
            get(rpc::handle_group_mcp_get).post(rpc::handle_group_mcp_post),
        )
        // Server management
        .route("/mcp/servers", get(rest::list_servers).post(rest::create_server))
        .route("/mcp/servers/reload", post(rest::reload_servers))
        .route("/mcp/servers/{name}", delete(rest::delete_server))
        .route(
            "/mcp/servers/{name}/config",
            get(rest::get_server_config).put(rest::update_server_config),
        )
        .route("/mcp/servers/{name}/convert-to-http", post(rest::convert_to_http))
        .route("/mcp/servers/{name}/ping", get(rest::ping_server))
        .route(
            "/mcp/servers/{name}/policy-allowed-tools",
            get(rest::policy_allowed_tools),
        )
        .route(
            "/mcp/servers/{name}/tool-availability-debug",
            get(rest::tool_availability_debug),
        )
        // MCP proxying
        .route("/mcp/list-tools", get(rest::list_tools))
        .route("/mcp/invoke", post(rest::invoke))
        .route("/mcp/invoke-broadcast", post(rest::invoke_broadcast))
        .route("/mcp/list-resources", get(rest::list_resources))
        .route("/mcp/read-resource", post(rest::read_resource))
        .route("/mcp/list-prompts", get(rest::list_prompts))
        .route("/mcp/get-prompt", post(rest::get_prompt))
        // Group management
        .route("/mcp/groups", get(rest::list_groups).post(rest::create_group))
        .route(
            "/mcp/groups/{id}",
            get(rest::get_group).put(rest::update_group).delete(rest::delete_group),
        )
        .route(
            "/mcp/groups/{id}/servers/{name}",
            post(rest::group_add_server).delete(rest::group_remove_server),
        )
        .route(
            "/mcp/groups/{id}/servers/{name}/tools",
            put(rest::group_configure_tools),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::subject_middleware,
        ));

    Router::new()
        .route("/healthz", get(rest::healthz))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//! API route definitions.

use axum::{
    Router,
    routing::{get, patch, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::sse;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    Router::new()
        .route("/health", get(handlers::health))
        // Projects
        .route("/projects", get(handlers::list_projects).post(handlers::create_project))
        .route("/projects/browse", get(handlers::browse_projects))
        .route(
            "/projects/{project_id}",
            get(handlers::get_project).delete(handlers::delete_project),
        )
        .route("/projects/{project_id}/events", get(sse::project_events))
        // Squads
        .route(
            "/projects/{project_id}/squads",
            get(handlers::list_squads).post(handlers::create_squad),
        )
        .route(
            "/squads/{squad_id}",
            get(handlers::get_squad)
                .patch(handlers::update_squad)
                .delete(handlers::delete_squad),
        )
        .route("/squads/{squad_id}/start", post(handlers::start_squad))
        .route("/squads/{squad_id}/stop", post(handlers::stop_squad))
        .route("/squads/{squad_id}/status", get(handlers::squad_status))
        .route("/squads/{squad_id}/message", post(handlers::message_squad))
        .route(
            "/squads/{squad_id}/lanes",
            get(handlers::list_lane_assignments),
        )
        .route(
            "/squads/{squad_id}/lanes/{lane}",
            put(handlers::set_lane_assignment),
        )
        // Agents
        .route("/projects/{project_id}/agents", get(handlers::list_agents))
        .route("/squads/{squad_id}/agents", post(handlers::create_agent))
        .route("/agents/roles", get(handlers::agent_roles))
        .route(
            "/agents/{agent_id}",
            get(handlers::get_agent)
                .patch(handlers::update_agent)
                .delete(handlers::delete_agent),
        )
        .route("/agents/{agent_id}/status", post(handlers::set_agent_status))
        // Sessions
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::start_session),
        )
        .route("/sessions/{session_id}", get(handlers::get_session))
        .route("/sessions/{session_id}/prompt", post(handlers::prompt_session))
        .route("/sessions/{session_id}/command", post(handlers::command_session))
        .route("/sessions/{session_id}/shell", post(handlers::shell_session))
        .route("/sessions/{session_id}/abort", post(handlers::abort_session))
        .route("/sessions/{session_id}/stop", post(handlers::stop_session))
        .route("/sessions/{session_id}/archive", post(handlers::archive_session))
        .route("/sessions/{session_id}/messages", get(handlers::session_messages))
        .route("/sessions/{session_id}/events", get(sse::session_events))
        // Board
        .route(
            "/projects/{project_id}/cards",
            get(handlers::list_cards).post(handlers::create_card),
        )
        .route("/cards/{card_id}", get(handlers::get_card))
        .route("/cards/{card_id}/advance", post(handlers::advance_card))
        .route("/cards/{card_id}/review", post(handlers::set_human_review))
        .route("/cards/{card_id}/prd", post(handlers::set_prd_path))
        .route("/cards/{card_id}/extract", post(handlers::extract_card_artifact))
        // MCP
        .route("/mcp/catalog", get(handlers::mcp_catalog))
        .route("/mcp/cli", get(handlers::mcp_cli_status))
        .route(
            "/squads/{squad_id}/mcp",
            get(handlers::list_mcp_servers).post(handlers::create_mcp_server),
        )
        .route(
            "/squads/{squad_id}/mcp/{name}",
            patch(handlers::update_mcp_server),
        )
        .route(
            "/squads/{squad_id}/mcp/{name}/enable",
            post(handlers::enable_mcp_server),
        )
        .route(
            "/squads/{squad_id}/mcp/{name}/disable",
            post(handlers::disable_mcp_server),
        )
        // External nodes
        .route(
            "/nodes",
            get(handlers::list_nodes).delete(handlers::remove_node),
        )
        .route("/nodes/probe", post(handlers::probe_node))
        .layer(trace_layer)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

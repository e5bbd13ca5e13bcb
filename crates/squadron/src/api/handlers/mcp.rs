//! MCP server handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::mcp::{
    CatalogEntry, CatalogQuery, CreateMcpServerRequest, McpCliStatus, McpServer,
    UpdateMcpServerRequest,
};

use super::super::error::{ApiError, ApiResult};
use super::super::state::AppState;
use super::squads::require_squad;

/// `GET /squads/{id}/mcp`.
#[instrument(skip(state))]
pub async fn list_mcp_servers(
    State(state): State<AppState>,
    Path(squad_id): Path<String>,
) -> ApiResult<Json<Vec<McpServer>>> {
    require_squad(&state, &squad_id).await?;
    let servers = state.mcp_servers.list_for_squad(&squad_id).await?;
    Ok(Json(servers))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CreateMcpBody {
    /// Resolve a catalog entry by name.
    Catalog { catalog_name: String },
    /// Full custom spec.
    Custom(CreateMcpServerRequest),
}

/// `POST /squads/{id}/mcp`.
#[instrument(skip(state, body))]
pub async fn create_mcp_server(
    State(state): State<AppState>,
    Path(squad_id): Path<String>,
    Json(body): Json<CreateMcpBody>,
) -> ApiResult<(StatusCode, Json<McpServer>)> {
    let server = match body {
        CreateMcpBody::Catalog { catalog_name } => {
            state
                .supervisor
                .add_mcp_from_catalog(&squad_id, &catalog_name)
                .await?
        }
        CreateMcpBody::Custom(request) => state.supervisor.add_mcp(&squad_id, request).await?,
    };
    info!(squad_id = %squad_id, name = %server.name, "Registered MCP server");
    Ok((StatusCode::CREATED, Json(server)))
}

/// `GET /mcp/catalog`.
#[instrument(skip(state))]
pub async fn mcp_catalog(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> ApiResult<Json<Vec<CatalogEntry>>> {
    let entries = state
        .supervisor
        .catalog()
        .entries(&query)
        .await
        .map_err(|e| {
            crate::error::Error::CliUnavailable(format!("docker mcp catalog unavailable: {}", e))
        })?;
    Ok(Json(entries))
}

/// `GET /mcp/cli`.
#[instrument(skip(state))]
pub async fn mcp_cli_status(State(state): State<AppState>) -> Json<McpCliStatus> {
    Json(state.supervisor.cli().status().await)
}

/// `PATCH /squads/{id}/mcp/{name}`.
#[instrument(skip(state, request))]
pub async fn update_mcp_server(
    State(state): State<AppState>,
    Path((squad_id, name)): Path<(String, String)>,
    Json(request): Json<UpdateMcpServerRequest>,
) -> ApiResult<Json<McpServer>> {
    let server = state
        .mcp_servers
        .get_by_name(&squad_id, &name)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("mcp server '{}' not found", name)))?;

    let args = request.args.as_ref().map(|a| serde_json::json!(a));
    state
        .mcp_servers
        .update(
            &server.id,
            request.url.as_deref(),
            request.command.as_deref(),
            args.as_ref(),
            request.headers.as_ref(),
        )
        .await?;

    // An enabled server's config change must reach the child.
    if server.enabled {
        state.supervisor.reconcile_mcp(&squad_id).await?;
    }

    let server = state
        .mcp_servers
        .get(&server.id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("mcp server '{}' not found", name)))?;
    Ok(Json(server))
}

/// `POST /squads/{id}/mcp/{name}/enable`.
#[instrument(skip(state))]
pub async fn enable_mcp_server(
    State(state): State<AppState>,
    Path((squad_id, name)): Path<(String, String)>,
) -> ApiResult<Json<McpServer>> {
    let server = state.supervisor.enable_mcp(&squad_id, &name).await?;
    Ok(Json(server))
}

/// `POST /squads/{id}/mcp/{name}/disable`.
#[instrument(skip(state))]
pub async fn disable_mcp_server(
    State(state): State<AppState>,
    Path((squad_id, name)): Path<(String, String)>,
) -> ApiResult<Json<McpServer>> {
    let server = state.supervisor.disable_mcp(&squad_id, &name).await?;
    Ok(Json(server))
}

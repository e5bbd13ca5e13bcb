//! External node handlers.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::nodes::ExternalNode;

use super::super::error::ApiResult;
use super::super::state::AppState;

/// `GET /nodes`.
#[instrument(skip(state))]
pub async fn list_nodes(State(state): State<AppState>) -> ApiResult<Json<Vec<ExternalNode>>> {
    let nodes = state.registry.list().await?;
    Ok(Json(nodes))
}

#[derive(Debug, Deserialize)]
pub struct ProbeRequest {
    pub url: String,
}

/// `POST /nodes/probe`.
#[instrument(skip(state, request), fields(url = %request.url))]
pub async fn probe_node(
    State(state): State<AppState>,
    Json(request): Json<ProbeRequest>,
) -> ApiResult<Json<ExternalNode>> {
    let node = state.registry.probe(&request.url).await?;
    info!(base_url = %node.base_url, "Probed node");
    Ok(Json(node))
}

#[derive(Debug, Deserialize)]
pub struct RemoveNodeQuery {
    pub base_url: String,
}

/// `DELETE /nodes?base_url=...` (the URL is a key, not a path segment).
#[instrument(skip(state))]
pub async fn remove_node(
    State(state): State<AppState>,
    Query(query): Query<RemoveNodeQuery>,
) -> ApiResult<StatusCode> {
    state.registry.remove(&query.base_url).await?;
    Ok(StatusCode::NO_CONTENT)
}

//! Agent CRUD, status, and roles configuration.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::agent::{
    default_system_instruction, Agent, AgentStatus, CreateAgentRequest, RolesConfig,
    UpdateAgentRequest,
};
use crate::error::Error;
use crate::wordlist;

use super::super::error::{ApiError, ApiResult};
use super::super::state::AppState;
use super::squads::require_squad;

/// `GET /projects/{id}/agents`.
#[instrument(skip(state))]
pub async fn list_agents(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<Agent>>> {
    state
        .projects
        .get(&project_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("project {} not found", project_id)))?;
    let agents = state.agents.list_for_project(&project_id).await?;
    Ok(Json(agents))
}

/// `POST /squads/{id}/agents`.
#[instrument(skip(state, request), fields(role = %request.role))]
pub async fn create_agent(
    State(state): State<AppState>,
    Path(squad_id): Path<String>,
    Json(request): Json<CreateAgentRequest>,
) -> ApiResult<(StatusCode, Json<Agent>)> {
    require_squad(&state, &squad_id).await?;
    if request.role.trim().is_empty() {
        return Err(ApiError::bad_request("agent role must not be empty"));
    }

    // Name and slug: explicit values win; otherwise a readable
    // adjective+noun pair, retried on slug collision.
    let (name, slug) = match (&request.name, &request.slug) {
        (Some(name), Some(slug)) => (name.clone(), slug.clone()),
        (Some(name), None) => (name.clone(), wordlist::slugify(name)),
        (None, maybe_slug) => {
            let mut slug = maybe_slug.clone().unwrap_or_else(wordlist::readable_slug);
            let mut attempts = 0;
            while state.agents.get_by_slug(&squad_id, &slug).await?.is_some() {
                attempts += 1;
                if attempts > 16 {
                    return Err(Error::validation("could not find a free agent slug").into());
                }
                slug = wordlist::readable_slug();
            }
            (wordlist::display_name(&slug), slug)
        }
    };
    if slug.is_empty() || !slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return Err(Error::validation(format!("invalid agent slug: {}", slug)).into());
    }
    if state.agents.get_by_slug(&squad_id, &slug).await?.is_some() {
        return Err(Error::Conflict(format!(
            "agent slug '{}' already exists in squad {}",
            slug, squad_id
        ))
        .into());
    }

    let system_instruction = request
        .system_instruction
        .clone()
        .unwrap_or_else(|| default_system_instruction(&request.role, request.level));

    let agent = state
        .agents
        .create(
            &squad_id,
            &name,
            &slug,
            request.role.trim(),
            request.level,
            Some(&system_instruction),
            request.model.as_deref(),
            request.mentor_id.as_deref(),
        )
        .await?;
    info!(agent_id = %agent.id, slug = %agent.slug, "Created agent");
    Ok((StatusCode::CREATED, Json(agent)))
}

/// `GET /agents/{id}`.
#[instrument(skip(state))]
pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<Agent>> {
    let agent = require_agent(&state, &agent_id).await?;
    Ok(Json(agent))
}

/// `PATCH /agents/{id}`.
#[instrument(skip(state, request))]
pub async fn update_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<UpdateAgentRequest>,
) -> ApiResult<Json<Agent>> {
    require_agent(&state, &agent_id).await?;

    let slug = request.name.as_deref().map(wordlist::slugify);
    state
        .agents
        .update(
            &agent_id,
            request.name.as_deref(),
            slug.as_deref(),
            request.role.as_deref(),
            request.level,
            request.model.as_deref(),
            request.system_instruction.as_deref(),
            request.mentor_id.as_deref(),
        )
        .await?;
    let agent = require_agent(&state, &agent_id).await?;
    Ok(Json(agent))
}

/// `DELETE /agents/{id}`.
#[instrument(skip(state))]
pub async fn delete_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<StatusCode> {
    let agent = require_agent(&state, &agent_id).await?;
    if let Some(active) = state.sessions.find_active_for_agent(&agent.id).await? {
        let _ = state.orchestrator.stop(&active.id, Some("agent deleted")).await;
    }
    state.agents.delete(&agent_id).await?;
    info!(agent_id = %agent_id, "Deleted agent");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SetAgentStatusRequest {
    pub status: AgentStatus,
}

/// `POST /agents/{id}/status`.
#[instrument(skip(state, request))]
pub async fn set_agent_status(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<SetAgentStatusRequest>,
) -> ApiResult<Json<Agent>> {
    require_agent(&state, &agent_id).await?;
    state.agents.update_status(&agent_id, request.status).await?;
    let agent = require_agent(&state, &agent_id).await?;
    Ok(Json(agent))
}

/// `GET /agents/roles`.
#[instrument]
pub async fn agent_roles() -> Json<RolesConfig> {
    Json(RolesConfig::current())
}

async fn require_agent(state: &AppState, agent_id: &str) -> ApiResult<Agent> {
    state
        .agents
        .get(agent_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("agent {} not found", agent_id)))
}

//! Squad CRUD, backend lifecycle, mail, and lane assignments.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::board::{Lane, LaneAssignment};
use crate::events::{kind, EventRecord};
use crate::squad::{CreateSquadRequest, Squad, SquadMessage};

use super::super::error::{ApiError, ApiResult};
use super::super::state::AppState;

/// `GET /projects/{id}/squads`.
#[instrument(skip(state))]
pub async fn list_squads(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<Squad>>> {
    state
        .projects
        .get(&project_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("project {} not found", project_id)))?;
    let squads = state.squads.list_for_project(&project_id).await?;
    Ok(Json(squads))
}

/// `POST /projects/{id}/squads`.
#[instrument(skip(state, request), fields(name = %request.name))]
pub async fn create_squad(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<CreateSquadRequest>,
) -> ApiResult<(StatusCode, Json<Squad>)> {
    state
        .projects
        .get(&project_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("project {} not found", project_id)))?;
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("squad name must not be empty"));
    }

    let squad = state
        .squads
        .create(&project_id, request.name.trim(), request.description.as_deref())
        .await?;
    info!(squad_id = %squad.id, "Created squad");
    Ok((StatusCode::CREATED, Json(squad)))
}

/// `GET /squads/{id}`.
#[instrument(skip(state))]
pub async fn get_squad(
    State(state): State<AppState>,
    Path(squad_id): Path<String>,
) -> ApiResult<Json<Squad>> {
    let squad = require_squad(&state, &squad_id).await?;
    Ok(Json(squad))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSquadRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// `PATCH /squads/{id}`.
#[instrument(skip(state, request))]
pub async fn update_squad(
    State(state): State<AppState>,
    Path(squad_id): Path<String>,
    Json(request): Json<UpdateSquadRequest>,
) -> ApiResult<Json<Squad>> {
    require_squad(&state, &squad_id).await?;
    state
        .squads
        .update(&squad_id, request.name.as_deref(), request.description.as_deref())
        .await?;
    let squad = require_squad(&state, &squad_id).await?;
    Ok(Json(squad))
}

/// `DELETE /squads/{id}`.
#[instrument(skip(state))]
pub async fn delete_squad(
    State(state): State<AppState>,
    Path(squad_id): Path<String>,
) -> ApiResult<StatusCode> {
    require_squad(&state, &squad_id).await?;
    let _ = state.supervisor.stop(&squad_id).await;
    state.squads.delete(&squad_id).await?;
    info!(squad_id = %squad_id, "Deleted squad");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /squads/{id}/start`: provision the backend.
#[instrument(skip(state))]
pub async fn start_squad(
    State(state): State<AppState>,
    Path(squad_id): Path<String>,
) -> ApiResult<Json<Squad>> {
    state.supervisor.ensure_running(&squad_id).await?;
    let squad = require_squad(&state, &squad_id).await?;
    Ok(Json(squad))
}

/// `POST /squads/{id}/stop`.
#[instrument(skip(state))]
pub async fn stop_squad(
    State(state): State<AppState>,
    Path(squad_id): Path<String>,
) -> ApiResult<Json<Squad>> {
    state.supervisor.stop(&squad_id).await?;
    let squad = require_squad(&state, &squad_id).await?;
    Ok(Json(squad))
}

/// `GET /squads/{id}/status`.
#[instrument(skip(state))]
pub async fn squad_status(
    State(state): State<AppState>,
    Path(squad_id): Path<String>,
) -> ApiResult<Json<Squad>> {
    let squad = state.supervisor.status(&squad_id).await?;
    Ok(Json(squad))
}

/// `POST /squads/{id}/message`: operator mail, published as `mail:sent`.
#[instrument(skip(state, message), fields(subject = %message.subject))]
pub async fn message_squad(
    State(state): State<AppState>,
    Path(squad_id): Path<String>,
    Json(message): Json<SquadMessage>,
) -> ApiResult<StatusCode> {
    let squad = require_squad(&state, &squad_id).await?;
    let target = require_squad(&state, &message.to_squad_id).await?;

    let record = EventRecord::new(
        kind::MAIL_SENT,
        &squad.project_id,
        json!({
            "from_squad_id": squad.id,
            "to_squad_id": target.id,
            "subject": message.subject,
            "body": message.body,
            "sender_name": message.sender_name,
        }),
    );
    state.events.insert(&record).await?;
    state.bus.publish(record);
    Ok(StatusCode::ACCEPTED)
}

/// `GET /squads/{id}/lanes`.
#[instrument(skip(state))]
pub async fn list_lane_assignments(
    State(state): State<AppState>,
    Path(squad_id): Path<String>,
) -> ApiResult<Json<Vec<LaneAssignment>>> {
    let squad = require_squad(&state, &squad_id).await?;
    let assignments = state
        .lanes
        .list_for_squad(&squad.project_id, &squad_id)
        .await?;
    Ok(Json(assignments))
}

#[derive(Debug, Deserialize)]
pub struct SetLaneAssignmentRequest {
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// `PUT /squads/{id}/lanes/{lane}`.
#[instrument(skip(state, request))]
pub async fn set_lane_assignment(
    State(state): State<AppState>,
    Path((squad_id, lane)): Path<(String, Lane)>,
    Json(request): Json<SetLaneAssignmentRequest>,
) -> ApiResult<Json<LaneAssignment>> {
    let squad = require_squad(&state, &squad_id).await?;
    if !Lane::ASSIGNABLE.contains(&lane) {
        return Err(ApiError::bad_request("the done lane takes no agent"));
    }
    if let Some(ref agent_id) = request.agent_id {
        let agent = state
            .agents
            .get(agent_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("agent {} not found", agent_id)))?;
        if agent.squad_id != squad_id {
            return Err(ApiError::bad_request("agent belongs to a different squad"));
        }
    }

    state
        .lanes
        .set(&squad.project_id, &squad_id, lane, request.agent_id.as_deref())
        .await?;
    let assignment = state
        .lanes
        .get(&squad.project_id, &squad_id, lane)
        .await?
        .ok_or_else(|| ApiError::not_found("lane assignment missing after set"))?;
    Ok(Json(assignment))
}

pub(super) async fn require_squad(state: &AppState, squad_id: &str) -> ApiResult<Squad> {
    state
        .squads
        .get(squad_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("squad {} not found", squad_id)))
}

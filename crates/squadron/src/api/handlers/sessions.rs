//! Session lifecycle handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::{info, instrument};

use squadron_protocol::SessionMode;

use crate::session::{AbortOutcome, Session, SessionStatus, StartSessionRequest, TranscriptEntry};

use super::super::error::{ApiError, ApiResult};
use super::super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub status: Option<SessionStatus>,
}

/// `GET /sessions`.
#[instrument(skip(state))]
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> ApiResult<Json<Vec<Session>>> {
    let sessions = state
        .sessions
        .list(
            query.project_id.as_deref(),
            query.agent_id.as_deref(),
            query.status,
        )
        .await?;
    Ok(Json(sessions))
}

/// `POST /sessions`.
#[instrument(skip(state, request), fields(agent_id = %request.agent_id))]
pub async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = state.orchestrator.start(request).await?;
    info!(session_id = %session.id, "Started session");
    Ok((StatusCode::CREATED, Json(session)))
}

/// `GET /sessions/{id}`.
#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    let session = state
        .sessions
        .get(&session_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session {} not found", session_id)))?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct PromptRequestBody {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mode: Option<SessionMode>,
    #[serde(default)]
    pub no_reply: bool,
}

/// `POST /sessions/{id}/prompt`. Returns the session that took the turn,
/// which differs from the addressed one after a transparent resumption.
#[instrument(skip(state, request))]
pub async fn prompt_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<PromptRequestBody>,
) -> ApiResult<Json<Session>> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }
    let session = state
        .orchestrator
        .send_prompt(
            &session_id,
            &request.prompt,
            request.mode,
            request.model,
            request.no_reply,
        )
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct CommandRequestBody {
    pub command: String,
    #[serde(default)]
    pub arguments: Option<String>,
    #[serde(default)]
    pub mode: Option<SessionMode>,
    #[serde(default)]
    pub model: Option<String>,
}

/// `POST /sessions/{id}/command`.
#[instrument(skip(state, request), fields(command = %request.command))]
pub async fn command_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<CommandRequestBody>,
) -> ApiResult<Json<Session>> {
    let session = state
        .orchestrator
        .execute_command(
            &session_id,
            &request.command,
            request.arguments,
            request.mode,
            request.model,
        )
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct ShellRequestBody {
    pub command: String,
    #[serde(default)]
    pub mode: Option<SessionMode>,
}

/// `POST /sessions/{id}/shell`.
#[instrument(skip(state, request))]
pub async fn shell_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ShellRequestBody>,
) -> ApiResult<Json<Session>> {
    if request.command.trim().is_empty() {
        return Err(ApiError::bad_request("shell command must not be empty"));
    }
    let session = state
        .orchestrator
        .run_shell(&session_id, &request.command, request.mode)
        .await?;
    Ok(Json(session))
}

/// `POST /sessions/{id}/abort`.
#[instrument(skip(state))]
pub async fn abort_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let outcome = state.orchestrator.abort(&session_id).await?;
    Ok(Json(serde_json::json!({
        "outcome": outcome,
        "already_idle": outcome == AbortOutcome::AlreadyIdle,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct StopRequestBody {
    #[serde(default)]
    pub reason: Option<String>,
}

/// `POST /sessions/{id}/stop`.
#[instrument(skip(state, request))]
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    request: Option<Json<StopRequestBody>>,
) -> ApiResult<Json<Session>> {
    let reason = request.and_then(|Json(body)| body.reason);
    let session = state
        .orchestrator
        .stop(&session_id, reason.as_deref())
        .await?;
    info!(session_id = %session_id, "Stopped session");
    Ok(Json(session))
}

/// `POST /sessions/{id}/archive`.
#[instrument(skip(state))]
pub async fn archive_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    let session = state.orchestrator.archive(&session_id).await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// `GET /sessions/{id}/messages`.
#[instrument(skip(state))]
pub async fn session_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Json<Vec<TranscriptEntry>>> {
    let entries = state
        .orchestrator
        .messages(&session_id, query.limit)
        .await?;
    Ok(Json(entries))
}

//! Board handlers: cards, lane advancement, human review.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::board::{Card, CreateCardRequest, HumanReviewStatus, Lane};

use super::super::error::{ApiError, ApiResult};
use super::super::state::AppState;

/// `GET /projects/{id}/cards`.
#[instrument(skip(state))]
pub async fn list_cards(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<Card>>> {
    state
        .projects
        .get(&project_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("project {} not found", project_id)))?;
    let cards = state.engine.list(&project_id).await?;
    Ok(Json(cards))
}

/// `POST /projects/{id}/cards`.
#[instrument(skip(state, request), fields(squad_id = %request.squad_id))]
pub async fn create_card(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(request): Json<CreateCardRequest>,
) -> ApiResult<(StatusCode, Json<Card>)> {
    let card = state.engine.create_card(&project_id, request).await?;
    info!(card_id = %card.id, "Created card");
    Ok((StatusCode::CREATED, Json(card)))
}

/// `GET /cards/{id}`.
#[instrument(skip(state))]
pub async fn get_card(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
) -> ApiResult<Json<Card>> {
    let card = state.engine.get(&card_id).await?;
    Ok(Json(card))
}

#[derive(Debug, Deserialize)]
pub struct AdvanceRequest {
    pub from_lane: Lane,
    pub to_lane: Lane,
}

/// `POST /cards/{id}/advance`.
#[instrument(skip(state, request), fields(from = %request.from_lane, to = %request.to_lane))]
pub async fn advance_card(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    Json(request): Json<AdvanceRequest>,
) -> ApiResult<Json<Card>> {
    let card = state
        .engine
        .advance(&card_id, request.from_lane, request.to_lane)
        .await?;
    info!(card_id = %card_id, lane = %card.lane, "Advanced card");
    Ok(Json(card))
}

#[derive(Debug, Deserialize)]
pub struct HumanReviewRequest {
    pub status: HumanReviewStatus,
    #[serde(default)]
    pub feedback: Option<String>,
}

/// `POST /cards/{id}/review`.
#[instrument(skip(state, request))]
pub async fn set_human_review(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    Json(request): Json<HumanReviewRequest>,
) -> ApiResult<Json<Card>> {
    let card = state
        .engine
        .set_human_review(&card_id, request.status, request.feedback)
        .await?;
    Ok(Json(card))
}

#[derive(Debug, Deserialize)]
pub struct SetPrdPathRequest {
    pub prd_path: String,
}

/// `POST /cards/{id}/prd`.
#[instrument(skip(state, request))]
pub async fn set_prd_path(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    Json(request): Json<SetPrdPathRequest>,
) -> ApiResult<Json<Card>> {
    let card = state.engine.set_prd_path(&card_id, &request.prd_path).await?;
    Ok(Json(card))
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub lane: Lane,
}

/// `POST /cards/{id}/extract`: re-run artifact extraction for a stage
/// (the retry affordance after `extraction_failed`, and the confirmation
/// hook for issue plans).
#[instrument(skip(state, request))]
pub async fn extract_card_artifact(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    Json(request): Json<ExtractRequest>,
) -> ApiResult<Json<Card>> {
    let card = state.engine.extract_now(&card_id, request.lane).await?;
    Ok(Json(card))
}

//! Project CRUD and directory browsing.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::error::Error;
use crate::project::{browse_directory, CreateProjectRequest, DirectoryEntry, Project};

use super::super::error::{ApiError, ApiResult};
use super::super::state::AppState;

/// `GET /projects`.
#[instrument(skip(state))]
pub async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<Project>>> {
    let projects = state.projects.list().await?;
    Ok(Json(projects))
}

/// `POST /projects`.
#[instrument(skip(state, request), fields(path = %request.path))]
pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let expanded = shellexpand::tilde(&request.path).into_owned();
    let path = std::path::Path::new(&expanded);
    if !path.is_absolute() {
        return Err(Error::validation("project path must be absolute").into());
    }
    if !path.is_dir() {
        return Err(Error::validation(format!(
            "project path does not exist: {}",
            path.display()
        ))
        .into());
    }

    let name = request.name.clone().unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string())
    });

    let project = state
        .projects
        .create(
            &name,
            &path.display().to_string(),
            request.config.unwrap_or_else(|| json!({})),
        )
        .await?;
    info!(project_id = %project.id, "Created project");
    Ok((StatusCode::CREATED, Json(project)))
}

/// `GET /projects/{id}`.
#[instrument(skip(state))]
pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Project>> {
    let project = state
        .projects
        .get(&project_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("project {} not found", project_id)))?;
    Ok(Json(project))
}

/// `DELETE /projects/{id}`.
#[instrument(skip(state))]
pub async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .projects
        .get(&project_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("project {} not found", project_id)))?;

    // Tear down any backends this project's squads own before the rows
    // cascade away.
    for squad in state.squads.list_for_project(&project_id).await? {
        let _ = state.supervisor.stop(&squad.id).await;
    }

    state.projects.delete(&project_id).await?;
    info!(project_id = %project_id, "Deleted project");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct BrowseQuery {
    pub path: String,
}

/// `GET /projects/browse?path=...`.
#[instrument]
pub async fn browse_projects(
    Query(query): Query<BrowseQuery>,
) -> ApiResult<Json<Vec<DirectoryEntry>>> {
    let entries = browse_directory(&query.path)?;
    Ok(Json(entries))
}

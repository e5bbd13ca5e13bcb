//! Project data models.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// A project: an absolute filesystem path the squads work against.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Absolute path; validated to exist at creation time.
    pub path: String,
    #[sqlx(json)]
    pub config: Value,
    pub created_at: String,
    pub updated_at: String,
}

/// Request to create a project.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProjectRequest {
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: Option<Value>,
}

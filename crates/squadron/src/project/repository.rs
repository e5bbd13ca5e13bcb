//! Project database repository.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::models::Project;

/// All project columns for SELECT queries.
const PROJECT_COLUMNS: &str = "id, name, path, config, created_at, updated_at";

/// Repository for project persistence.
#[derive(Debug, Clone)]
pub struct ProjectRepository {
    pool: SqlitePool,
}

impl ProjectRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new project and return it.
    pub async fn create(&self, name: &str, path: &str, config: Value) -> Result<Project> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, path, config)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(path)
        .bind(config.to_string())
        .execute(&self.pool)
        .await
        .context("creating project")?;

        self.get(&id)
            .await?
            .context("project missing after insert")
    }

    /// Get a project by ID.
    pub async fn get(&self, id: &str) -> Result<Option<Project>> {
        let query = format!("SELECT {} FROM projects WHERE id = ?", PROJECT_COLUMNS);
        let project = sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching project")?;

        Ok(project)
    }

    /// List all projects, newest first.
    pub async fn list(&self) -> Result<Vec<Project>> {
        let query = format!(
            "SELECT {} FROM projects ORDER BY created_at DESC",
            PROJECT_COLUMNS
        );
        let projects = sqlx::query_as::<_, Project>(&query)
            .fetch_all(&self.pool)
            .await
            .context("listing projects")?;

        Ok(projects)
    }

    /// Update a project's config, bumping `updated_at`.
    pub async fn update_config(&self, id: &str, config: Value) -> Result<()> {
        sqlx::query(
            "UPDATE projects SET config = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(config.to_string())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("updating project config")?;

        Ok(())
    }

    /// Delete a project; squads, cards and sessions cascade.
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting project")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_get_list_delete() {
        let db = Database::in_memory().await.unwrap();
        let repo = ProjectRepository::new(db.pool().clone());

        let project = repo
            .create("acme", "/tmp/acme", json!({"default_branch": "main"}))
            .await
            .unwrap();
        assert_eq!(project.name, "acme");
        assert_eq!(project.config["default_branch"], "main");

        let fetched = repo.get(&project.id).await.unwrap().unwrap();
        assert_eq!(fetched.path, "/tmp/acme");

        assert_eq!(repo.list().await.unwrap().len(), 1);

        repo.delete(&project.id).await.unwrap();
        assert!(repo.get(&project.id).await.unwrap().is_none());
    }
}

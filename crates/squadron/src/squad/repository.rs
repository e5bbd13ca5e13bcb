//! Squad database repository.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::models::{OpencodeStatus, Squad};

/// All squad columns for SELECT queries.
const SQUAD_COLUMNS: &str = r#"
    id, project_id, name, description, opencode_status, opencode_url, opencode_pid,
    last_error, created_at, updated_at
"#;

/// Repository for squad persistence.
#[derive(Debug, Clone)]
pub struct SquadRepository {
    pool: SqlitePool,
}

impl SquadRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a squad and return it.
    pub async fn create(
        &self,
        project_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Squad> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO squads (id, project_id, name, description)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(project_id)
        .bind(name)
        .bind(description)
        .execute(&self.pool)
        .await
        .context("creating squad")?;

        self.get(&id).await?.context("squad missing after insert")
    }

    /// Get a squad by ID.
    pub async fn get(&self, id: &str) -> Result<Option<Squad>> {
        let query = format!("SELECT {} FROM squads WHERE id = ?", SQUAD_COLUMNS);
        let squad = sqlx::query_as::<_, Squad>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching squad")?;

        Ok(squad)
    }

    /// List squads in a project.
    pub async fn list_for_project(&self, project_id: &str) -> Result<Vec<Squad>> {
        let query = format!(
            "SELECT {} FROM squads WHERE project_id = ? ORDER BY created_at ASC",
            SQUAD_COLUMNS
        );
        let squads = sqlx::query_as::<_, Squad>(&query)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .context("listing squads for project")?;

        Ok(squads)
    }

    /// Update name/description, bumping `updated_at`.
    pub async fn update(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE squads SET
                name = COALESCE(?, name),
                description = COALESCE(?, description),
                updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("updating squad")?;

        Ok(())
    }

    /// Record a backend state transition.
    pub async fn update_opencode_state(
        &self,
        id: &str,
        status: OpencodeStatus,
        url: Option<&str>,
        pid: Option<i64>,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE squads SET
                opencode_status = ?,
                opencode_url = ?,
                opencode_pid = ?,
                last_error = ?,
                updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(status.to_string())
        .bind(url)
        .bind(pid)
        .bind(last_error)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("updating squad opencode state")?;

        Ok(())
    }

    /// Ports already claimed by running or provisioning backends, used when
    /// allocating a listener for a new one.
    pub async fn used_ports(&self) -> Result<Vec<u16>> {
        let urls: Vec<(Option<String>,)> = sqlx::query_as(
            "SELECT opencode_url FROM squads WHERE opencode_status IN ('provisioning', 'running')",
        )
        .fetch_all(&self.pool)
        .await
        .context("fetching used backend ports")?;

        Ok(urls
            .into_iter()
            .filter_map(|(url,)| url)
            .filter_map(|url| {
                url.rsplit(':')
                    .next()
                    .and_then(|port| port.trim_end_matches('/').parse().ok())
            })
            .collect())
    }

    /// Delete a squad; agents, cards and MCP servers cascade.
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM squads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting squad")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::project::ProjectRepository;
    use serde_json::json;

    #[tokio::test]
    async fn test_opencode_state_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let projects = ProjectRepository::new(db.pool().clone());
        let project = projects.create("p", "/tmp/p", json!({})).await.unwrap();

        let repo = SquadRepository::new(db.pool().clone());
        let squad = repo.create(&project.id, "alpha", Some("first")).await.unwrap();
        assert_eq!(squad.opencode_status, OpencodeStatus::Idle);

        repo.update_opencode_state(
            &squad.id,
            OpencodeStatus::Running,
            Some("http://127.0.0.1:41901"),
            Some(4242),
            None,
        )
        .await
        .unwrap();

        let running = repo.get(&squad.id).await.unwrap().unwrap();
        assert_eq!(running.opencode_status, OpencodeStatus::Running);
        assert_eq!(running.opencode_pid, Some(4242));
        assert_eq!(repo.used_ports().await.unwrap(), vec![41901]);
    }

    #[tokio::test]
    async fn test_delete_cascades_from_project() {
        let db = Database::in_memory().await.unwrap();
        let projects = ProjectRepository::new(db.pool().clone());
        let repo = SquadRepository::new(db.pool().clone());

        let project = projects.create("p", "/tmp/p", json!({})).await.unwrap();
        let squad = repo.create(&project.id, "alpha", None).await.unwrap();

        projects.delete(&project.id).await.unwrap();
        assert!(repo.get(&squad.id).await.unwrap().is_none());
    }
}

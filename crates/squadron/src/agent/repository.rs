//! Agent database repository.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::models::{Agent, AgentLevel, AgentStatus};

/// All agent columns for SELECT queries.
const AGENT_COLUMNS: &str = r#"
    id, squad_id, name, slug, role, level, system_instruction, model, status,
    mentor_id, created_at, updated_at
"#;

/// Repository for agent persistence.
#[derive(Debug, Clone)]
pub struct AgentRepository {
    pool: SqlitePool,
}

impl AgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an agent and return it.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        squad_id: &str,
        name: &str,
        slug: &str,
        role: &str,
        level: AgentLevel,
        system_instruction: Option<&str>,
        model: Option<&str>,
        mentor_id: Option<&str>,
    ) -> Result<Agent> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO agents (id, squad_id, name, slug, role, level, system_instruction, model, mentor_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(squad_id)
        .bind(name)
        .bind(slug)
        .bind(role)
        .bind(level.to_string())
        .bind(system_instruction)
        .bind(model)
        .bind(mentor_id)
        .execute(&self.pool)
        .await
        .context("creating agent")?;

        self.get(&id).await?.context("agent missing after insert")
    }

    /// Get an agent by ID.
    pub async fn get(&self, id: &str) -> Result<Option<Agent>> {
        let query = format!("SELECT {} FROM agents WHERE id = ?", AGENT_COLUMNS);
        let agent = sqlx::query_as::<_, Agent>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching agent")?;

        Ok(agent)
    }

    /// Get an agent by squad and slug.
    pub async fn get_by_slug(&self, squad_id: &str, slug: &str) -> Result<Option<Agent>> {
        let query = format!(
            "SELECT {} FROM agents WHERE squad_id = ? AND slug = ?",
            AGENT_COLUMNS
        );
        let agent = sqlx::query_as::<_, Agent>(&query)
            .bind(squad_id)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .context("fetching agent by slug")?;

        Ok(agent)
    }

    /// List agents in a squad.
    pub async fn list_for_squad(&self, squad_id: &str) -> Result<Vec<Agent>> {
        let query = format!(
            "SELECT {} FROM agents WHERE squad_id = ? ORDER BY created_at ASC",
            AGENT_COLUMNS
        );
        let agents = sqlx::query_as::<_, Agent>(&query)
            .bind(squad_id)
            .fetch_all(&self.pool)
            .await
            .context("listing agents for squad")?;

        Ok(agents)
    }

    /// List agents across a project, via the squad join.
    pub async fn list_for_project(&self, project_id: &str) -> Result<Vec<Agent>> {
        let agents = sqlx::query_as::<_, Agent>(
            r#"
            SELECT a.id, a.squad_id, a.name, a.slug, a.role, a.level, a.system_instruction,
                   a.model, a.status, a.mentor_id, a.created_at, a.updated_at
            FROM agents a
            JOIN squads s ON s.id = a.squad_id
            WHERE s.project_id = ?
            ORDER BY a.created_at ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .context("listing agents for project")?;

        Ok(agents)
    }

    /// Idle agents in a squad, for lane fallback allocation.
    pub async fn list_idle_for_squad(&self, squad_id: &str) -> Result<Vec<Agent>> {
        let query = format!(
            "SELECT {} FROM agents WHERE squad_id = ? AND status = 'idle' ORDER BY created_at ASC",
            AGENT_COLUMNS
        );
        let agents = sqlx::query_as::<_, Agent>(&query)
            .bind(squad_id)
            .fetch_all(&self.pool)
            .await
            .context("listing idle agents")?;

        Ok(agents)
    }

    /// Update agent status, bumping `updated_at`.
    pub async fn update_status(&self, id: &str, status: AgentStatus) -> Result<()> {
        sqlx::query("UPDATE agents SET status = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("updating agent status")?;

        Ok(())
    }

    /// Apply non-null fields of an update.
    #[allow(clippy::too_many_arguments)]
    pub async fn update(
        &self,
        id: &str,
        name: Option<&str>,
        slug: Option<&str>,
        role: Option<&str>,
        level: Option<AgentLevel>,
        model: Option<&str>,
        system_instruction: Option<&str>,
        mentor_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE agents SET
                name = COALESCE(?, name),
                slug = COALESCE(?, slug),
                role = COALESCE(?, role),
                level = COALESCE(?, level),
                model = COALESCE(?, model),
                system_instruction = COALESCE(?, system_instruction),
                mentor_id = COALESCE(?, mentor_id),
                updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(slug)
        .bind(role)
        .bind(level.map(|l| l.to_string()))
        .bind(model)
        .bind(system_instruction)
        .bind(mentor_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("updating agent")?;

        Ok(())
    }

    /// Delete an agent.
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting agent")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::project::ProjectRepository;
    use crate::squad::SquadRepository;
    use serde_json::json;

    async fn seed_squad(db: &Database) -> (String, String) {
        let projects = ProjectRepository::new(db.pool().clone());
        let squads = SquadRepository::new(db.pool().clone());
        let project = projects.create("p", "/tmp/p", json!({})).await.unwrap();
        let squad = squads
            .create(&project.id, "alpha", None)
            .await
            .unwrap();
        (project.id, squad.id)
    }

    #[tokio::test]
    async fn test_create_and_slug_lookup() {
        let db = Database::in_memory().await.unwrap();
        let (_, squad_id) = seed_squad(&db).await;
        let repo = AgentRepository::new(db.pool().clone());

        let agent = repo
            .create(
                &squad_id,
                "Brisk Otter",
                "brisk-otter",
                "engineer",
                AgentLevel::Senior,
                None,
                Some("claude-sonnet-4"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);

        let by_slug = repo
            .get_by_slug(&squad_id, "brisk-otter")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_slug.id, agent.id);
    }

    #[tokio::test]
    async fn test_duplicate_slug_rejected() {
        let db = Database::in_memory().await.unwrap();
        let (_, squad_id) = seed_squad(&db).await;
        let repo = AgentRepository::new(db.pool().clone());

        repo.create(
            &squad_id,
            "Brisk Otter",
            "brisk-otter",
            "engineer",
            AgentLevel::Senior,
            None,
            None,
            None,
        )
        .await
        .unwrap();

        let dup = repo
            .create(
                &squad_id,
                "Brisk Otter",
                "brisk-otter",
                "engineer",
                AgentLevel::Junior,
                None,
                None,
                None,
            )
            .await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn test_status_update_and_idle_listing() {
        let db = Database::in_memory().await.unwrap();
        let (_, squad_id) = seed_squad(&db).await;
        let repo = AgentRepository::new(db.pool().clone());

        let agent = repo
            .create(
                &squad_id,
                "Calm Heron",
                "calm-heron",
                "planner",
                AgentLevel::Principal,
                None,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(repo.list_idle_for_squad(&squad_id).await.unwrap().len(), 1);
        repo.update_status(&agent.id, AgentStatus::Working)
            .await
            .unwrap();
        assert!(repo.list_idle_for_squad(&squad_id).await.unwrap().is_empty());
    }
}

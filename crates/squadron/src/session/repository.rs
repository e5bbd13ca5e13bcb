//! Session database repository.
//!
//! Status transitions go through guarded UPDATEs (`WHERE status IN (...)`)
//! so concurrent writers (ingester vs. operator) resolve at the database
//! instead of clobbering each other. The `prompt_pending` column is the
//! durable half of the depth-1 turn queue.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use squadron_protocol::SessionMode;

use super::models::{Session, SessionStatus};

/// All session columns for SELECT queries.
const SESSION_COLUMNS: &str = r#"
    id, project_id, agent_id, backend_session_id, status, model, mode, ticket_key,
    worktree_path, branch, base_branch, prompt_pending, metadata, version,
    started_at, finished_at, created_at
"#;

fn status_list(statuses: &[SessionStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Repository for session persistence.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a pending session.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        project_id: &str,
        agent_id: &str,
        model: Option<&str>,
        mode: SessionMode,
        ticket_key: Option<&str>,
        worktree_path: Option<&str>,
        branch: Option<&str>,
        base_branch: Option<&str>,
        metadata: Value,
    ) -> Result<Session> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, project_id, agent_id, model, mode, ticket_key,
                worktree_path, branch, base_branch, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(project_id)
        .bind(agent_id)
        .bind(model)
        .bind(mode.to_string())
        .bind(ticket_key)
        .bind(worktree_path)
        .bind(branch)
        .bind(base_branch)
        .bind(metadata.to_string())
        .execute(&self.pool)
        .await
        .context("creating session")?;

        self.get(&id)
            .await?
            .context("session missing after insert")
    }

    /// Get a session by ID.
    pub async fn get(&self, id: &str) -> Result<Option<Session>> {
        let query = format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS);
        let session = sqlx::query_as::<_, Session>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching session")?;

        Ok(session)
    }

    /// Get a session by its backend-issued id.
    pub async fn get_by_backend_id(&self, backend_session_id: &str) -> Result<Option<Session>> {
        let query = format!(
            "SELECT {} FROM sessions WHERE backend_session_id = ?",
            SESSION_COLUMNS
        );
        let session = sqlx::query_as::<_, Session>(&query)
            .bind(backend_session_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching session by backend id")?;

        Ok(session)
    }

    /// List sessions with optional filters, newest first.
    pub async fn list(
        &self,
        project_id: Option<&str>,
        agent_id: Option<&str>,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>> {
        let query = format!(
            r#"
            SELECT {} FROM sessions
            WHERE (? IS NULL OR project_id = ?)
              AND (? IS NULL OR agent_id = ?)
              AND (? IS NULL OR status = ?)
            ORDER BY created_at DESC
            "#,
            SESSION_COLUMNS
        );
        let status = status.map(|s| s.to_string());
        let sessions = sqlx::query_as::<_, Session>(&query)
            .bind(project_id)
            .bind(project_id)
            .bind(agent_id)
            .bind(agent_id)
            .bind(&status)
            .bind(&status)
            .fetch_all(&self.pool)
            .await
            .context("listing sessions")?;

        Ok(sessions)
    }

    /// The agent's active session, if any. At most one can exist.
    pub async fn find_active_for_agent(&self, agent_id: &str) -> Result<Option<Session>> {
        let query = format!(
            "SELECT {} FROM sessions WHERE agent_id = ? AND status IN ({}) LIMIT 1",
            SESSION_COLUMNS,
            status_list(SessionStatus::ACTIVE)
        );
        let session = sqlx::query_as::<_, Session>(&query)
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await
            .context("finding active session for agent")?;

        Ok(session)
    }

    /// The most recent session carrying a ticket key, for resumption.
    pub async fn find_latest_for_ticket(
        &self,
        project_id: &str,
        ticket_key: &str,
    ) -> Result<Option<Session>> {
        let query = format!(
            "SELECT {} FROM sessions WHERE project_id = ? AND ticket_key = ? ORDER BY created_at DESC LIMIT 1",
            SESSION_COLUMNS
        );
        let session = sqlx::query_as::<_, Session>(&query)
            .bind(project_id)
            .bind(ticket_key)
            .fetch_optional(&self.pool)
            .await
            .context("finding session for ticket")?;

        Ok(session)
    }

    /// Assign the backend session id. Assignable exactly once; a second
    /// call is a no-op returning false.
    pub async fn assign_backend_session_id(
        &self,
        id: &str,
        backend_session_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET backend_session_id = ?, version = version + 1 WHERE id = ? AND backend_session_id IS NULL",
        )
        .bind(backend_session_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("assigning backend session id")?;

        Ok(result.rows_affected() == 1)
    }

    /// Guarded status transition. Returns true when the session was in one
    /// of `allowed_from` and moved to `to`; false when the guard failed.
    pub async fn transition(
        &self,
        id: &str,
        to: SessionStatus,
        allowed_from: &[SessionStatus],
    ) -> Result<bool> {
        let started = matches!(to, SessionStatus::Running | SessionStatus::Starting);
        let finished = to.is_terminal();
        let query = format!(
            r#"
            UPDATE sessions SET
                status = ?,
                version = version + 1,
                started_at = CASE WHEN ? AND started_at IS NULL THEN datetime('now') ELSE started_at END,
                finished_at = CASE WHEN ? THEN datetime('now') ELSE finished_at END
            WHERE id = ? AND status IN ({})
            "#,
            status_list(allowed_from)
        );
        let result = sqlx::query(&query)
            .bind(to.to_string())
            .bind(started)
            .bind(finished)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("transitioning session status")?;

        Ok(result.rows_affected() == 1)
    }

    /// Acquire the depth-1 turn slot. Fails (false) when a prompt is
    /// already unanswered or the session is not accepting turns.
    pub async fn acquire_turn_slot(&self, id: &str) -> Result<bool> {
        let query = format!(
            "UPDATE sessions SET prompt_pending = 1, version = version + 1 WHERE id = ? AND prompt_pending = 0 AND status IN ({})",
            status_list(&[
                SessionStatus::Pending,
                SessionStatus::Starting,
                SessionStatus::Running,
            ])
        );
        let result = sqlx::query(&query)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("acquiring turn slot")?;

        Ok(result.rows_affected() == 1)
    }

    /// Release the turn slot without completing (abort, rollback).
    pub async fn release_turn_slot(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET prompt_pending = 0, version = version + 1 WHERE id = ? AND prompt_pending = 1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("releasing turn slot")?;

        Ok(())
    }

    /// Idle arrived: complete the session if (and only if) a prompt was
    /// pending. Returns true when the transition fired.
    pub async fn complete_if_prompt_pending(&self, id: &str) -> Result<bool> {
        let query = format!(
            r#"
            UPDATE sessions SET
                status = 'completed',
                prompt_pending = 0,
                version = version + 1,
                finished_at = datetime('now')
            WHERE id = ? AND prompt_pending = 1 AND status IN ({})
            "#,
            status_list(&[SessionStatus::Starting, SessionStatus::Running])
        );
        let result = sqlx::query(&query)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("completing session on idle")?;

        Ok(result.rows_affected() == 1)
    }

    /// Terminal failure with a recorded reason.
    pub async fn fail(&self, id: &str, reason: &str) -> Result<bool> {
        let query = format!(
            r#"
            UPDATE sessions SET
                status = 'failed',
                prompt_pending = 0,
                version = version + 1,
                finished_at = datetime('now'),
                metadata = json_set(metadata, '$.failure_reason', ?)
            WHERE id = ? AND status IN ({})
            "#,
            status_list(SessionStatus::ACTIVE)
        );
        let result = sqlx::query(&query)
            .bind(reason)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failing session")?;

        Ok(result.rows_affected() == 1)
    }

    /// Archive a terminal session.
    pub async fn archive(&self, id: &str) -> Result<bool> {
        self.transition(id, SessionStatus::Archived, SessionStatus::TERMINAL)
            .await
    }

    /// Merge a patch into the metadata JSON.
    pub async fn set_metadata_field(&self, id: &str, key: &str, value: &Value) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET metadata = json_set(metadata, '$.' || ?, json(?)) WHERE id = ?",
        )
        .bind(key)
        .bind(value.to_string())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("setting session metadata field")?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agent::{AgentLevel, AgentRepository};
    use crate::db::Database;
    use crate::project::ProjectRepository;
    use crate::squad::SquadRepository;
    use serde_json::json;

    pub(crate) async fn seed(db: &Database) -> (String, String) {
        let projects = ProjectRepository::new(db.pool().clone());
        let squads = SquadRepository::new(db.pool().clone());
        let agents = AgentRepository::new(db.pool().clone());
        let project = projects.create("p", "/tmp/p", json!({})).await.unwrap();
        let squad = squads.create(&project.id, "alpha", None).await.unwrap();
        let agent = agents
            .create(
                &squad.id,
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
        (project.id, agent.id)
    }

    #[tokio::test]
    async fn test_backend_id_assigned_exactly_once() {
        let db = Database::in_memory().await.unwrap();
        let (project_id, agent_id) = seed(&db).await;
        let repo = SessionRepository::new(db.pool().clone());

        let session = repo
            .create(
                &project_id,
                &agent_id,
                None,
                SessionMode::Build,
                None,
                None,
                None,
                None,
                json!({}),
            )
            .await
            .unwrap();

        assert!(repo
            .assign_backend_session_id(&session.id, "ses_abc")
            .await
            .unwrap());
        assert!(!repo
            .assign_backend_session_id(&session.id, "ses_other")
            .await
            .unwrap());

        let fetched = repo.get(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.backend_session_id.as_deref(), Some("ses_abc"));
    }

    #[tokio::test]
    async fn test_turn_slot_depth_one() {
        let db = Database::in_memory().await.unwrap();
        let (project_id, agent_id) = seed(&db).await;
        let repo = SessionRepository::new(db.pool().clone());

        let session = repo
            .create(
                &project_id,
                &agent_id,
                None,
                SessionMode::Build,
                None,
                None,
                None,
                None,
                json!({}),
            )
            .await
            .unwrap();

        assert!(repo.acquire_turn_slot(&session.id).await.unwrap());
        // Second enqueue while occupied fails without mutating state.
        assert!(!repo.acquire_turn_slot(&session.id).await.unwrap());

        repo.release_turn_slot(&session.id).await.unwrap();
        assert!(repo.acquire_turn_slot(&session.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_idle_completes_only_with_pending_prompt() {
        let db = Database::in_memory().await.unwrap();
        let (project_id, agent_id) = seed(&db).await;
        let repo = SessionRepository::new(db.pool().clone());

        let session = repo
            .create(
                &project_id,
                &agent_id,
                None,
                SessionMode::Build,
                None,
                None,
                None,
                None,
                json!({}),
            )
            .await
            .unwrap();
        repo.transition(
            &session.id,
            SessionStatus::Running,
            &[SessionStatus::Pending],
        )
        .await
        .unwrap();

        // Idle without a pending prompt is a no-op.
        assert!(!repo.complete_if_prompt_pending(&session.id).await.unwrap());

        repo.acquire_turn_slot(&session.id).await.unwrap();
        assert!(repo.complete_if_prompt_pending(&session.id).await.unwrap());

        let done = repo.get(&session.id).await.unwrap().unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert!(!done.prompt_pending);
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_active_session_uniqueness_query() {
        let db = Database::in_memory().await.unwrap();
        let (project_id, agent_id) = seed(&db).await;
        let repo = SessionRepository::new(db.pool().clone());

        assert!(repo.find_active_for_agent(&agent_id).await.unwrap().is_none());

        let session = repo
            .create(
                &project_id,
                &agent_id,
                None,
                SessionMode::Plan,
                Some("SQ-1"),
                None,
                None,
                None,
                json!({}),
            )
            .await
            .unwrap();

        let active = repo.find_active_for_agent(&agent_id).await.unwrap().unwrap();
        assert_eq!(active.id, session.id);

        repo.fail(&session.id, "backend_silent").await.unwrap();
        assert!(repo.find_active_for_agent(&agent_id).await.unwrap().is_none());

        let failed = repo.get(&session.id).await.unwrap().unwrap();
        assert_eq!(failed.metadata["failure_reason"], "backend_silent");
    }

    #[tokio::test]
    async fn test_archive_requires_terminal() {
        let db = Database::in_memory().await.unwrap();
        let (project_id, agent_id) = seed(&db).await;
        let repo = SessionRepository::new(db.pool().clone());

        let session = repo
            .create(
                &project_id,
                &agent_id,
                None,
                SessionMode::Build,
                None,
                None,
                None,
                None,
                json!({}),
            )
            .await
            .unwrap();

        assert!(!repo.archive(&session.id).await.unwrap());
        repo.fail(&session.id, "stopped").await.unwrap();
        assert!(repo.archive(&session.id).await.unwrap());
    }
}

//! Event log persistence.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::EventRecord;

/// All event columns for SELECT queries.
const EVENT_COLUMNS: &str = "id, kind, payload, project_id, session_id, agent_id, occurred_at";

/// Repository for the append-only event log.
#[derive(Debug, Clone)]
pub struct EventRepository {
    pool: SqlitePool,
}

impl EventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an event.
    pub async fn insert(&self, event: &EventRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (id, kind, payload, project_id, session_id, agent_id, occurred_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.kind)
        .bind(event.payload.to_string())
        .bind(&event.project_id)
        .bind(&event.session_id)
        .bind(&event.agent_id)
        .bind(&event.occurred_at)
        .execute(&self.pool)
        .await
        .context("inserting event")?;

        Ok(())
    }

    /// Most recent events for a project, newest first.
    pub async fn list_for_project(&self, project_id: &str, limit: i64) -> Result<Vec<EventRecord>> {
        let query = format!(
            "SELECT {} FROM events WHERE project_id = ? ORDER BY occurred_at DESC, id DESC LIMIT ?",
            EVENT_COLUMNS
        );
        let events = sqlx::query_as::<_, EventRecord>(&query)
            .bind(project_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("listing events for project")?;

        Ok(events)
    }

    /// Events for a session in ingest order.
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<EventRecord>> {
        let query = format!(
            "SELECT {} FROM events WHERE session_id = ? ORDER BY occurred_at ASC, id ASC",
            EVENT_COLUMNS
        );
        let events = sqlx::query_as::<_, EventRecord>(&query)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .context("listing events for session")?;

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::events::kind;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_and_list() {
        let db = Database::in_memory().await.unwrap();
        // Events reference projects loosely (no FK) so a bare insert works.
        let repo = EventRepository::new(db.pool().clone());

        let a = EventRecord::new(kind::NODE_DISCOVERED, "p1", json!({"url": "http://x"}));
        let b = EventRecord::new(kind::SESSION_IDLE, "p1", json!({})).with_session("s1");
        repo.insert(&a).await.unwrap();
        repo.insert(&b).await.unwrap();

        let for_project = repo.list_for_project("p1", 10).await.unwrap();
        assert_eq!(for_project.len(), 2);

        let for_session = repo.list_for_session("s1").await.unwrap();
        assert_eq!(for_session.len(), 1);
        assert_eq!(for_session[0].kind, "session:idle");
    }
}

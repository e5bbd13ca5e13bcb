//! Transcript entries: the append-only, sequenced log of a session.
//!
//! Entries are keyed by backend-issued message id where one exists, which
//! is what makes re-ingest after an SSE reconnect idempotent. Sequences
//! are dense from 0; the sequence is computed inside the INSERT so
//! concurrent writers (ingester plus local echo) cannot leave gaps.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use squadron_protocol::Role;

/// One transcript entry.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct TranscriptEntry {
    pub id: String,
    pub session_id: String,
    pub sequence: i64,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub backend_message_id: Option<String>,
    /// The normalized message: `{id?, role, parts: [...], ...}`.
    #[sqlx(json)]
    pub payload: Value,
    pub created_at: String,
}

/// All transcript columns for SELECT queries.
const TRANSCRIPT_COLUMNS: &str =
    "id, session_id, sequence, role, backend_message_id, payload, created_at";

/// Repository for transcript persistence.
#[derive(Debug, Clone)]
pub struct TranscriptRepository {
    pool: SqlitePool,
}

impl TranscriptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an entry at the next sequence number.
    pub async fn append(
        &self,
        session_id: &str,
        role: Role,
        backend_message_id: Option<&str>,
        payload: &Value,
    ) -> Result<TranscriptEntry> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO transcript_entries (id, session_id, sequence, role, backend_message_id, payload)
            VALUES (
                ?, ?,
                (SELECT COALESCE(MAX(sequence) + 1, 0) FROM transcript_entries WHERE session_id = ?),
                ?, ?, ?
            )
            "#,
        )
        .bind(&id)
        .bind(session_id)
        .bind(session_id)
        .bind(role.to_string())
        .bind(backend_message_id)
        .bind(payload.to_string())
        .execute(&self.pool)
        .await
        .context("appending transcript entry")?;

        self.get(&id)
            .await?
            .context("transcript entry missing after insert")
    }

    /// Get an entry by ID.
    pub async fn get(&self, id: &str) -> Result<Option<TranscriptEntry>> {
        let query = format!(
            "SELECT {} FROM transcript_entries WHERE id = ?",
            TRANSCRIPT_COLUMNS
        );
        let entry = sqlx::query_as::<_, TranscriptEntry>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching transcript entry")?;

        Ok(entry)
    }

    /// Find the entry holding a given backend message.
    pub async fn get_by_backend_message_id(
        &self,
        session_id: &str,
        backend_message_id: &str,
    ) -> Result<Option<TranscriptEntry>> {
        let query = format!(
            "SELECT {} FROM transcript_entries WHERE session_id = ? AND backend_message_id = ?",
            TRANSCRIPT_COLUMNS
        );
        let entry = sqlx::query_as::<_, TranscriptEntry>(&query)
            .bind(session_id)
            .bind(backend_message_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching transcript entry by backend message id")?;

        Ok(entry)
    }

    /// Replace an entry's payload (part upserts, info merges).
    pub async fn update_payload(&self, id: &str, payload: &Value) -> Result<()> {
        sqlx::query("UPDATE transcript_entries SET payload = ? WHERE id = ?")
            .bind(payload.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("updating transcript payload")?;

        Ok(())
    }

    /// Promote a local echo entry to a backend-acknowledged one. Used when
    /// the backend echoes a user prompt that was inserted optimistically.
    pub async fn attach_backend_message_id(
        &self,
        id: &str,
        backend_message_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE transcript_entries SET backend_message_id = ? WHERE id = ? AND backend_message_id IS NULL",
        )
        .bind(backend_message_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("attaching backend message id")?;

        Ok(())
    }

    /// Delete a local echo (stop rollback). Only entries never acknowledged
    /// by the backend can be removed; the transcript is otherwise
    /// append-only.
    pub async fn delete_unacknowledged(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM transcript_entries WHERE id = ? AND backend_message_id IS NULL AND sequence = (SELECT MAX(sequence) FROM transcript_entries WHERE session_id = (SELECT session_id FROM transcript_entries WHERE id = ?))",
        )
        .bind(id)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("deleting unacknowledged entry")?;

        Ok(result.rows_affected() == 1)
    }

    /// The full transcript in sequence order.
    pub async fn list(&self, session_id: &str) -> Result<Vec<TranscriptEntry>> {
        let query = format!(
            "SELECT {} FROM transcript_entries WHERE session_id = ? ORDER BY sequence ASC",
            TRANSCRIPT_COLUMNS
        );
        let entries = sqlx::query_as::<_, TranscriptEntry>(&query)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .context("listing transcript entries")?;

        Ok(entries)
    }

    /// The trailing `limit` entries in sequence order.
    pub async fn list_tail(&self, session_id: &str, limit: i64) -> Result<Vec<TranscriptEntry>> {
        let query = format!(
            r#"
            SELECT * FROM (
                SELECT {} FROM transcript_entries
                WHERE session_id = ? ORDER BY sequence DESC LIMIT ?
            ) ORDER BY sequence ASC
            "#,
            TRANSCRIPT_COLUMNS
        );
        let entries = sqlx::query_as::<_, TranscriptEntry>(&query)
            .bind(session_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("listing transcript tail")?;

        Ok(entries)
    }

    /// The most recent entry of a role not yet acknowledged by the
    /// backend. Used to reconcile local user echoes with their backend
    /// counterparts.
    pub async fn last_unacknowledged(
        &self,
        session_id: &str,
        role: Role,
    ) -> Result<Option<TranscriptEntry>> {
        let query = format!(
            "SELECT {} FROM transcript_entries WHERE session_id = ? AND role = ? AND backend_message_id IS NULL ORDER BY sequence DESC LIMIT 1",
            TRANSCRIPT_COLUMNS
        );
        let entry = sqlx::query_as::<_, TranscriptEntry>(&query)
            .bind(session_id)
            .bind(role.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("fetching last unacknowledged entry")?;

        Ok(entry)
    }

    /// The most recent assistant entry, target of text appends.
    pub async fn last_assistant_entry(&self, session_id: &str) -> Result<Option<TranscriptEntry>> {
        let query = format!(
            "SELECT {} FROM transcript_entries WHERE session_id = ? AND role = 'assistant' ORDER BY sequence DESC LIMIT 1",
            TRANSCRIPT_COLUMNS
        );
        let entry = sqlx::query_as::<_, TranscriptEntry>(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching last assistant entry")?;

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::session::SessionRepository;
    use serde_json::json;
    use squadron_protocol::SessionMode;

    async fn seed_session(db: &Database) -> String {
        let (project_id, agent_id) = crate::session::repository::tests::seed(db).await;
        let sessions = SessionRepository::new(db.pool().clone());
        sessions
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
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_sequences_are_dense_from_zero() {
        let db = Database::in_memory().await.unwrap();
        let session_id = seed_session(&db).await;
        let repo = TranscriptRepository::new(db.pool().clone());

        for i in 0..5 {
            let entry = repo
                .append(&session_id, Role::User, None, &json!({"n": i}))
                .await
                .unwrap();
            assert_eq!(entry.sequence, i);
        }

        let entries = repo.list(&session_id).await.unwrap();
        let sequences: Vec<i64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_backend_message_id_unique_per_session() {
        let db = Database::in_memory().await.unwrap();
        let session_id = seed_session(&db).await;
        let repo = TranscriptRepository::new(db.pool().clone());

        repo.append(&session_id, Role::Assistant, Some("msg_1"), &json!({}))
            .await
            .unwrap();
        let dup = repo
            .append(&session_id, Role::Assistant, Some("msg_1"), &json!({}))
            .await;
        assert!(dup.is_err());

        let found = repo
            .get_by_backend_message_id(&session_id, "msg_1")
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_echo_rollback_only_for_unacknowledged_tail() {
        let db = Database::in_memory().await.unwrap();
        let session_id = seed_session(&db).await;
        let repo = TranscriptRepository::new(db.pool().clone());

        let echo = repo
            .append(&session_id, Role::User, None, &json!({"text": "hi"}))
            .await
            .unwrap();
        assert!(repo.delete_unacknowledged(&echo.id).await.unwrap());

        let acked = repo
            .append(&session_id, Role::User, Some("msg_2"), &json!({}))
            .await
            .unwrap();
        assert!(!repo.delete_unacknowledged(&acked.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_last_assistant_entry() {
        let db = Database::in_memory().await.unwrap();
        let session_id = seed_session(&db).await;
        let repo = TranscriptRepository::new(db.pool().clone());

        repo.append(&session_id, Role::User, None, &json!({}))
            .await
            .unwrap();
        repo.append(&session_id, Role::Assistant, Some("m1"), &json!({"a": 1}))
            .await
            .unwrap();
        repo.append(&session_id, Role::Assistant, Some("m2"), &json!({"a": 2}))
            .await
            .unwrap();

        let last = repo.last_assistant_entry(&session_id).await.unwrap().unwrap();
        assert_eq!(last.backend_message_id.as_deref(), Some("m2"));
    }
}

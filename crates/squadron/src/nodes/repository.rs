//! External node database repository.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{ExternalNode, NodeSource};

/// All node columns for SELECT queries.
const NODE_COLUMNS: &str = "base_url, healthy, version, source, missed_probes, last_seen_at";

/// Repository for external node persistence.
#[derive(Debug, Clone)]
pub struct ExternalNodeRepository {
    pool: SqlitePool,
}

impl ExternalNodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a healthy sighting of a node.
    pub async fn record_seen(
        &self,
        base_url: &str,
        version: Option<&str>,
        source: NodeSource,
    ) -> Result<ExternalNode> {
        sqlx::query(
            r#"
            INSERT INTO external_nodes (base_url, healthy, version, source, missed_probes, last_seen_at)
            VALUES (?, 1, ?, ?, 0, datetime('now'))
            ON CONFLICT (base_url) DO UPDATE SET
                healthy = 1,
                version = COALESCE(excluded.version, external_nodes.version),
                missed_probes = 0,
                last_seen_at = datetime('now')
            "#,
        )
        .bind(base_url)
        .bind(version)
        .bind(source.to_string())
        .execute(&self.pool)
        .await
        .context("recording node sighting")?;

        self.get(base_url)
            .await?
            .context("node missing after upsert")
    }

    /// Record a failed probe. Returns the node's new state; the third
    /// consecutive miss flips `healthy` off.
    pub async fn record_miss(&self, base_url: &str) -> Result<Option<ExternalNode>> {
        sqlx::query(
            r#"
            UPDATE external_nodes SET
                missed_probes = missed_probes + 1,
                healthy = CASE WHEN missed_probes + 1 >= 3 THEN 0 ELSE healthy END
            WHERE base_url = ?
            "#,
        )
        .bind(base_url)
        .execute(&self.pool)
        .await
        .context("recording node miss")?;

        self.get(base_url).await
    }

    /// Get a node by base URL.
    pub async fn get(&self, base_url: &str) -> Result<Option<ExternalNode>> {
        let query = format!(
            "SELECT {} FROM external_nodes WHERE base_url = ?",
            NODE_COLUMNS
        );
        let node = sqlx::query_as::<_, ExternalNode>(&query)
            .bind(base_url)
            .fetch_optional(&self.pool)
            .await
            .context("fetching node")?;

        Ok(node)
    }

    /// All known nodes.
    pub async fn list(&self) -> Result<Vec<ExternalNode>> {
        let query = format!(
            "SELECT {} FROM external_nodes ORDER BY base_url ASC",
            NODE_COLUMNS
        );
        let nodes = sqlx::query_as::<_, ExternalNode>(&query)
            .fetch_all(&self.pool)
            .await
            .context("listing nodes")?;

        Ok(nodes)
    }

    /// Remove a node.
    pub async fn delete(&self, base_url: &str) -> Result<()> {
        sqlx::query("DELETE FROM external_nodes WHERE base_url = ?")
            .bind(base_url)
            .execute(&self.pool)
            .await
            .context("deleting node")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_three_misses_mark_unhealthy_but_retain() {
        let db = Database::in_memory().await.unwrap();
        let repo = ExternalNodeRepository::new(db.pool().clone());

        repo.record_seen("http://127.0.0.1:6000", Some("0.6.1"), NodeSource::LocalLsof)
            .await
            .unwrap();

        for _ in 0..2 {
            let node = repo
                .record_miss("http://127.0.0.1:6000")
                .await
                .unwrap()
                .unwrap();
            assert!(node.healthy);
        }

        let node = repo
            .record_miss("http://127.0.0.1:6000")
            .await
            .unwrap()
            .unwrap();
        assert!(!node.healthy);
        assert_eq!(node.missed_probes, 3);

        // Still listed until explicit removal.
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sighting_resets_miss_counter() {
        let db = Database::in_memory().await.unwrap();
        let repo = ExternalNodeRepository::new(db.pool().clone());

        repo.record_seen("http://127.0.0.1:6000", None, NodeSource::Manual)
            .await
            .unwrap();
        repo.record_miss("http://127.0.0.1:6000").await.unwrap();

        let node = repo
            .record_seen("http://127.0.0.1:6000", Some("0.7.0"), NodeSource::Manual)
            .await
            .unwrap();
        assert!(node.healthy);
        assert_eq!(node.missed_probes, 0);
        assert_eq!(node.version.as_deref(), Some("0.7.0"));
    }
}

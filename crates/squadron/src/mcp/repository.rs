//! MCP server database repository.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::models::{McpServer, McpSource, McpType};

/// All MCP server columns for SELECT queries.
const MCP_COLUMNS: &str = r#"
    id, squad_id, name, source, server_type, image, url, command, args, headers,
    enabled, status, last_error, catalog_meta, created_at, updated_at
"#;

/// Repository for MCP server persistence.
#[derive(Debug, Clone)]
pub struct McpServerRepository {
    pool: SqlitePool,
}

impl McpServerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a server (disabled until explicit enable).
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        squad_id: &str,
        name: &str,
        source: McpSource,
        server_type: McpType,
        image: Option<&str>,
        url: Option<&str>,
        command: Option<&str>,
        args: &Value,
        headers: &Value,
        catalog_meta: &Value,
    ) -> Result<McpServer> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO mcp_servers (id, squad_id, name, source, server_type, image, url, command, args, headers, catalog_meta)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(squad_id)
        .bind(name)
        .bind(source.to_string())
        .bind(server_type.to_string())
        .bind(image)
        .bind(url)
        .bind(command)
        .bind(args.to_string())
        .bind(headers.to_string())
        .bind(catalog_meta.to_string())
        .execute(&self.pool)
        .await
        .context("creating mcp server")?;

        self.get(&id)
            .await?
            .context("mcp server missing after insert")
    }

    /// Get a server by ID.
    pub async fn get(&self, id: &str) -> Result<Option<McpServer>> {
        let query = format!("SELECT {} FROM mcp_servers WHERE id = ?", MCP_COLUMNS);
        let server = sqlx::query_as::<_, McpServer>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching mcp server")?;

        Ok(server)
    }

    /// Get a server by squad and name.
    pub async fn get_by_name(&self, squad_id: &str, name: &str) -> Result<Option<McpServer>> {
        let query = format!(
            "SELECT {} FROM mcp_servers WHERE squad_id = ? AND name = ?",
            MCP_COLUMNS
        );
        let server = sqlx::query_as::<_, McpServer>(&query)
            .bind(squad_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("fetching mcp server by name")?;

        Ok(server)
    }

    /// List a squad's servers.
    pub async fn list_for_squad(&self, squad_id: &str) -> Result<Vec<McpServer>> {
        let query = format!(
            "SELECT {} FROM mcp_servers WHERE squad_id = ? ORDER BY name ASC",
            MCP_COLUMNS
        );
        let servers = sqlx::query_as::<_, McpServer>(&query)
            .bind(squad_id)
            .fetch_all(&self.pool)
            .await
            .context("listing mcp servers")?;

        Ok(servers)
    }

    /// The enabled subset, in reconcile order.
    pub async fn list_enabled_for_squad(&self, squad_id: &str) -> Result<Vec<McpServer>> {
        let query = format!(
            "SELECT {} FROM mcp_servers WHERE squad_id = ? AND enabled = 1 ORDER BY name ASC",
            MCP_COLUMNS
        );
        let servers = sqlx::query_as::<_, McpServer>(&query)
            .bind(squad_id)
            .fetch_all(&self.pool)
            .await
            .context("listing enabled mcp servers")?;

        Ok(servers)
    }

    /// Flip the enabled flag.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        sqlx::query(
            "UPDATE mcp_servers SET enabled = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(enabled)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("setting mcp server enabled")?;

        Ok(())
    }

    /// Record lifecycle status and error.
    pub async fn set_status(&self, id: &str, status: &str, last_error: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE mcp_servers SET status = ?, last_error = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(status)
        .bind(last_error)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("setting mcp server status")?;

        Ok(())
    }

    /// Apply non-null fields of an update.
    pub async fn update(
        &self,
        id: &str,
        url: Option<&str>,
        command: Option<&str>,
        args: Option<&Value>,
        headers: Option<&Value>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE mcp_servers SET
                url = COALESCE(?, url),
                command = COALESCE(?, command),
                args = COALESCE(?, args),
                headers = COALESCE(?, headers),
                updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(url)
        .bind(command)
        .bind(args.map(|v| v.to_string()))
        .bind(headers.map(|v| v.to_string()))
        .bind(id)
        .execute(&self.pool)
        .await
        .context("updating mcp server")?;

        Ok(())
    }

    /// Delete a server.
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM mcp_servers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting mcp server")?;

        Ok(())
    }
}

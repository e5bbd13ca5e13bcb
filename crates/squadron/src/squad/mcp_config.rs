//! MCP configuration file materialization.
//!
//! The backend reads its tool-server set from `mcp.toml` in the squad's
//! state directory. Reconciliation rewrites the whole file from the
//! enabled server rows and renames it into place so the backend never
//! observes a half-written config.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::mcp::{McpServer, McpType};

#[derive(Debug, Serialize)]
struct McpConfigFile {
    #[serde(rename = "server")]
    servers: BTreeMap<String, McpServerEntry>,
}

#[derive(Debug, Serialize)]
struct McpServerEntry {
    #[serde(rename = "type")]
    server_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
}

impl From<&McpServer> for McpServerEntry {
    fn from(server: &McpServer) -> Self {
        let args = server
            .args
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();
        let headers = server
            .headers
            .as_object()
            .map(|h| {
                h.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_owned())))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            server_type: match server.server_type {
                McpType::Remote => "remote".to_string(),
                McpType::Container => "container".to_string(),
            },
            url: server.url.clone(),
            image: server.image.clone(),
            command: server.command.clone(),
            args,
            headers,
        }
    }
}

/// Write `mcp.toml` for the given enabled servers via temp file + atomic
/// rename. Returns the final path.
pub fn write_mcp_config(state_dir: &Path, servers: &[McpServer]) -> Result<PathBuf> {
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("creating state dir {}", state_dir.display()))?;

    let config = McpConfigFile {
        servers: servers
            .iter()
            .map(|s| (s.name.clone(), McpServerEntry::from(s)))
            .collect(),
    };
    let rendered = toml::to_string_pretty(&config).context("serializing mcp config")?;

    let final_path = state_dir.join("mcp.toml");
    let tmp_path = state_dir.join("mcp.toml.tmp");
    std::fs::write(&tmp_path, rendered)
        .with_context(|| format!("writing {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, &final_path)
        .with_context(|| format!("renaming into {}", final_path.display()))?;

    Ok(final_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::McpSource;
    use serde_json::json;

    fn server(name: &str, server_type: McpType) -> McpServer {
        McpServer {
            id: format!("id-{}", name),
            squad_id: "sq".to_string(),
            name: name.to_string(),
            source: McpSource::Custom,
            server_type,
            image: matches!(server_type, McpType::Container)
                .then(|| format!("mcp/{}:latest", name)),
            url: matches!(server_type, McpType::Remote)
                .then(|| format!("https://{}.example.dev", name)),
            command: None,
            args: json!(["--verbose"]),
            headers: json!({"Authorization": "Bearer token"}),
            enabled: true,
            status: "active".to_string(),
            last_error: None,
            catalog_meta: json!({}),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_write_and_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_mcp_config(
            dir.path(),
            &[server("github", McpType::Remote), server("notion", McpType::Container)],
        )
        .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[server.github]"));
        assert!(contents.contains("url = \"https://github.example.dev\""));
        assert!(contents.contains("[server.notion]"));
        assert!(contents.contains("image = \"mcp/notion:latest\""));
        assert!(!dir.path().join("mcp.toml.tmp").exists());

        // Rewriting with an empty set truncates to an empty table.
        write_mcp_config(dir.path(), &[]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("github"));
    }
}

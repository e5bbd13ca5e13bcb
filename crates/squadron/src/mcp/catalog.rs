//! MCP catalog snapshot.
//!
//! The catalog is fetched from the `docker mcp` CLI and cached; enable
//! operations resolve names against the snapshot so a flaky CLI does not
//! block browsing already-known entries.

use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::cli::DockerMcpCli;

/// One catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Catalog browse filters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogQuery {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

/// Cached registry snapshot.
pub struct McpCatalog {
    cli: DockerMcpCli,
    snapshot: RwLock<Option<Vec<CatalogEntry>>>,
}

impl McpCatalog {
    pub fn new(cli: DockerMcpCli) -> Self {
        Self {
            cli,
            snapshot: RwLock::new(None),
        }
    }

    /// Filtered entries, fetching the snapshot on first use.
    pub async fn entries(&self, query: &CatalogQuery) -> Result<Vec<CatalogEntry>> {
        self.ensure_snapshot().await?;
        let snapshot = self.snapshot.read().await;
        let entries = snapshot.as_deref().unwrap_or_default();

        Ok(entries
            .iter()
            .filter(|entry| Self::matches(entry, query))
            .cloned()
            .collect())
    }

    /// Resolve a catalog entry by exact name.
    pub async fn resolve(&self, name: &str) -> Result<Option<CatalogEntry>> {
        self.ensure_snapshot().await?;
        let snapshot = self.snapshot.read().await;
        Ok(snapshot
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|entry| entry.name == name)
            .cloned())
    }

    /// Drop the cache; the next read re-fetches.
    pub async fn invalidate(&self) {
        *self.snapshot.write().await = None;
    }

    async fn ensure_snapshot(&self) -> Result<()> {
        {
            let snapshot = self.snapshot.read().await;
            if snapshot.is_some() {
                return Ok(());
            }
        }

        let raw = self.cli.catalog_json().await?;
        let entries = Self::parse_catalog(&raw);
        info!("Cached MCP catalog snapshot ({} entries)", entries.len());
        *self.snapshot.write().await = Some(entries);
        Ok(())
    }

    /// The CLI emits either a list or a name-keyed map depending on
    /// version; accept both.
    fn parse_catalog(raw: &serde_json::Value) -> Vec<CatalogEntry> {
        if let Some(list) = raw.as_array() {
            return list
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect();
        }

        let map = raw
            .get("registry")
            .and_then(|v| v.as_object())
            .or_else(|| raw.as_object());
        map.map(|entries| {
            entries
                .iter()
                .filter_map(|(name, body)| {
                    let mut entry: CatalogEntry = serde_json::from_value(body.clone()).ok()?;
                    if entry.name.is_empty() {
                        entry.name = name.clone();
                    }
                    Some(entry)
                })
                .collect()
        })
        .unwrap_or_default()
    }

    fn matches(entry: &CatalogEntry, query: &CatalogQuery) -> bool {
        if let Some(ref q) = query.query {
            let q = q.to_lowercase();
            let haystack = format!(
                "{} {}",
                entry.name.to_lowercase(),
                entry
                    .description
                    .as_deref()
                    .unwrap_or_default()
                    .to_lowercase()
            );
            if !haystack.contains(&q) {
                return false;
            }
        }
        if let Some(ref category) = query.category {
            if entry.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(ref tag) = query.tag {
            if !entry.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_list_and_map_shapes() {
        let list = json!([
            {"name": "github", "description": "GitHub tools", "category": "dev"},
            {"name": "notion", "tags": ["docs"]}
        ]);
        assert_eq!(McpCatalog::parse_catalog(&list).len(), 2);

        let map = json!({
            "registry": {
                "github": {"name": "", "description": "GitHub tools"},
                "notion": {"name": "notion"}
            }
        });
        let parsed = McpCatalog::parse_catalog(&map);
        assert_eq!(parsed.len(), 2);
        assert!(parsed.iter().any(|e| e.name == "github"));
    }

    #[test]
    fn test_query_filters() {
        let entry = CatalogEntry {
            name: "github".to_string(),
            description: Some("GitHub issue tools".to_string()),
            image: None,
            category: Some("dev".to_string()),
            tags: vec!["vcs".to_string()],
        };

        let hit = CatalogQuery {
            query: Some("issue".to_string()),
            category: Some("dev".to_string()),
            tag: Some("vcs".to_string()),
        };
        assert!(McpCatalog::matches(&entry, &hit));

        let miss = CatalogQuery {
            tag: Some("docs".to_string()),
            ..Default::default()
        };
        assert!(!McpCatalog::matches(&entry, &miss));
    }
}

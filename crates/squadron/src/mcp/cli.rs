//! `docker mcp` toolchain probing.
//!
//! Catalog-sourced servers are resolved and launched through the Docker
//! MCP CLI. The CLI may legitimately be absent; callers surface that as
//! `cli_unavailable` instead of silently skipping the operation.

use anyhow::{Context, Result};
use log::debug;
use serde::Serialize;
use tokio::process::Command;

/// Availability report for the MCP toolchain.
#[derive(Debug, Clone, Serialize)]
pub struct McpCliStatus {
    pub available: bool,
    pub version: Option<String>,
}

/// Wrapper around the `docker mcp` CLI.
#[derive(Debug, Clone, Default)]
pub struct DockerMcpCli {
    /// Override for tests; `docker` when unset.
    binary: Option<String>,
}

impl DockerMcpCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the wrapper at a different binary (tests, air-gapped hosts).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: Some(binary.into()),
        }
    }

    fn program(&self) -> &str {
        self.binary.as_deref().unwrap_or("docker")
    }

    /// Probe `docker mcp version`.
    pub async fn status(&self) -> McpCliStatus {
        let output = Command::new(self.program())
            .args(["mcp", "version"])
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                let version = String::from_utf8_lossy(&out.stdout).trim().to_string();
                McpCliStatus {
                    available: true,
                    version: (!version.is_empty()).then_some(version),
                }
            }
            Ok(out) => {
                debug!("docker mcp version exited with {}", out.status);
                McpCliStatus {
                    available: false,
                    version: None,
                }
            }
            Err(e) => {
                debug!("docker mcp not invocable: {}", e);
                McpCliStatus {
                    available: false,
                    version: None,
                }
            }
        }
    }

    /// Dump the catalog as JSON via `docker mcp catalog show --format json`.
    pub async fn catalog_json(&self) -> Result<serde_json::Value> {
        let output = Command::new(self.program())
            .args(["mcp", "catalog", "show", "--format", "json"])
            .output()
            .await
            .context("invoking docker mcp catalog")?;

        if !output.status.success() {
            anyhow::bail!(
                "docker mcp catalog show failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        serde_json::from_slice(&output.stdout).context("parsing docker mcp catalog output")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_reports_unavailable() {
        let cli = DockerMcpCli::with_binary("/nonexistent/docker-mcp-test");
        let status = cli.status().await;
        assert!(!status.available);
        assert!(status.version.is_none());
        assert!(cli.catalog_json().await.is_err());
    }
}

//! MCP server data models.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Where a server definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpSource {
    /// Shipped with the orchestrator.
    Builtin,
    /// Resolved from the `docker mcp` catalog.
    Registry,
    /// Operator-supplied spec.
    #[default]
    Custom,
}

impl std::fmt::Display for McpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpSource::Builtin => write!(f, "builtin"),
            McpSource::Registry => write!(f, "registry"),
            McpSource::Custom => write!(f, "custom"),
        }
    }
}

impl std::str::FromStr for McpSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "builtin" => Ok(McpSource::Builtin),
            "registry" => Ok(McpSource::Registry),
            "custom" => Ok(McpSource::Custom),
            _ => Err(format!("unknown mcp source: {}", s)),
        }
    }
}

impl TryFrom<String> for McpSource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// How the server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpType {
    /// HTTP(S) endpoint.
    #[default]
    Remote,
    /// Containerized server launched by the MCP toolchain.
    Container,
}

impl std::fmt::Display for McpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpType::Remote => write!(f, "remote"),
            McpType::Container => write!(f, "container"),
        }
    }
}

impl std::str::FromStr for McpType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remote" => Ok(McpType::Remote),
            "container" => Ok(McpType::Container),
            _ => Err(format!("unknown mcp type: {}", s)),
        }
    }
}

impl TryFrom<String> for McpType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// An MCP server row. `(squad_id, name)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct McpServer {
    pub id: String,
    pub squad_id: String,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub source: McpSource,
    #[sqlx(rename = "server_type", try_from = "String")]
    #[serde(rename = "type")]
    pub server_type: McpType,
    pub image: Option<String>,
    pub url: Option<String>,
    pub command: Option<String>,
    #[sqlx(json)]
    pub args: Value,
    #[sqlx(json)]
    pub headers: Value,
    pub enabled: bool,
    /// Free-form lifecycle status string (`configured`, `active`, `error`).
    pub status: String,
    pub last_error: Option<String>,
    #[sqlx(json)]
    pub catalog_meta: Value,
    pub created_at: String,
    pub updated_at: String,
}

/// Request to register an MCP server.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMcpServerRequest {
    pub name: String,
    #[serde(default)]
    pub source: McpSource,
    #[serde(rename = "type", default)]
    pub server_type: McpType,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub headers: Value,
    #[serde(default)]
    pub catalog_meta: Value,
}

/// Request to update an MCP server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateMcpServerRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub headers: Option<Value>,
}

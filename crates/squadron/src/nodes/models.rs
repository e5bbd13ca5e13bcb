//! External node data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// How a node entered the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeSource {
    /// Found by the periodic local socket scan.
    LocalLsof,
    /// Declared in configuration.
    Config,
    /// Operator-submitted URL.
    Manual,
}

impl std::fmt::Display for NodeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeSource::LocalLsof => "local_lsof",
            NodeSource::Config => "config",
            NodeSource::Manual => "manual",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for NodeSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local_lsof" => Ok(NodeSource::LocalLsof),
            "config" => Ok(NodeSource::Config),
            "manual" => Ok(NodeSource::Manual),
            _ => Err(format!("unknown node source: {}", s)),
        }
    }
}

impl TryFrom<String> for NodeSource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A known external backend instance, keyed by base URL.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExternalNode {
    pub base_url: String,
    pub healthy: bool,
    pub version: Option<String>,
    #[sqlx(try_from = "String")]
    pub source: NodeSource,
    /// Consecutive failed probes; three mark the node unhealthy.
    pub missed_probes: i64,
    pub last_seen_at: String,
}

//! Squad data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Backend process state for a squad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpencodeStatus {
    /// No backend process.
    #[default]
    Idle,
    /// Spawn in progress, waiting for `/info` to come up.
    Provisioning,
    /// Healthy and serving.
    Running,
    /// Liveness lost; the supervisor is backing off before a restart.
    Error,
}

impl std::fmt::Display for OpencodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpencodeStatus::Idle => write!(f, "idle"),
            OpencodeStatus::Provisioning => write!(f, "provisioning"),
            OpencodeStatus::Running => write!(f, "running"),
            OpencodeStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for OpencodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(OpencodeStatus::Idle),
            "provisioning" => Ok(OpencodeStatus::Provisioning),
            "running" => Ok(OpencodeStatus::Running),
            "error" => Ok(OpencodeStatus::Error),
            _ => Err(format!("unknown opencode status: {}", s)),
        }
    }
}

impl TryFrom<String> for OpencodeStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, <Self as TryFrom<String>>::Error> {
        value.parse()
    }
}

/// A squad.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Squad {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    #[sqlx(try_from = "String")]
    pub opencode_status: OpencodeStatus,
    /// Base URL of the backend while running.
    pub opencode_url: Option<String>,
    pub opencode_pid: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Request to create a squad.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSquadRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Operator-to-squad mail. Published as a `mail:sent` event; nothing in
/// the core consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadMessage {
    pub to_squad_id: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub sender_name: Option<String>,
}

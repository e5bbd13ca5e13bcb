//! Agent data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Seniority level. Levels pick the default system instruction for a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentLevel {
    Junior,
    #[default]
    Senior,
    Principal,
}

impl std::fmt::Display for AgentLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentLevel::Junior => write!(f, "junior"),
            AgentLevel::Senior => write!(f, "senior"),
            AgentLevel::Principal => write!(f, "principal"),
        }
    }
}

impl std::str::FromStr for AgentLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "junior" => Ok(AgentLevel::Junior),
            "senior" => Ok(AgentLevel::Senior),
            "principal" => Ok(AgentLevel::Principal),
            _ => Err(format!("unknown agent level: {}", s)),
        }
    }
}

impl TryFrom<String> for AgentLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Agent availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Working,
    Blocked,
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Working => write!(f, "working"),
            AgentStatus::Blocked => write!(f, "blocked"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(AgentStatus::Idle),
            "working" => Ok(AgentStatus::Working),
            "blocked" => Ok(AgentStatus::Blocked),
            "offline" => Ok(AgentStatus::Offline),
            _ => Err(format!("unknown agent status: {}", s)),
        }
    }
}

impl TryFrom<String> for AgentStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// An agent.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub id: String,
    pub squad_id: String,
    /// Display name, e.g. "Brisk Otter".
    pub name: String,
    /// Lowercase hyphenated form of the name; unique within the squad.
    pub slug: String,
    /// Role key, e.g. "engineer", "reviewer".
    pub role: String,
    #[sqlx(try_from = "String")]
    pub level: AgentLevel,
    pub system_instruction: Option<String>,
    pub model: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: AgentStatus,
    pub mentor_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Request to create an agent.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAgentRequest {
    pub role: String,
    #[serde(default)]
    pub level: AgentLevel,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_instruction: Option<String>,
    /// Explicit name; generated adjective+noun when absent.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub mentor_id: Option<String>,
}

/// Request to update an agent. All fields optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAgentRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub level: Option<AgentLevel>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub mentor_id: Option<String>,
}

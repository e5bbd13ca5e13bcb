//! HTTP request and response bodies for the backend API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response from `GET /info`.
///
/// Also used as the liveness probe body; only `version` matters to the
/// orchestrator, the rest is surfaced verbatim to operators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Turn mode for prompts and commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Read-only planning: the backend may not touch the working tree.
    Plan,
    /// Full build mode with tool access.
    #[default]
    Build,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::Plan => write!(f, "plan"),
            SessionMode::Build => write!(f, "build"),
        }
    }
}

impl std::str::FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plan" => Ok(SessionMode::Plan),
            "build" => Ok(SessionMode::Build),
            _ => Err(format!("unknown session mode: {}", s)),
        }
    }
}

impl TryFrom<String> for SessionMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Body for `POST /session`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Working directory the backend session operates in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

/// Response from `POST /session`: the backend-issued session id.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionResponse {
    pub id: String,
}

/// Body for `POST /session/{id}/prompt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub text: String,
    pub mode: SessionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// When set, the backend records the prompt without generating a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_reply: Option<bool>,
}

/// Body for `POST /session/{id}/command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(default)]
    pub mode: SessionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Body for `POST /session/{id}/shell`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellRequest {
    pub command: String,
    #[serde(default)]
    pub mode: SessionMode,
}

/// Response from `POST /session/{id}/abort`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AbortResponse {
    /// False when there was nothing in flight to abort.
    #[serde(default)]
    pub aborted: bool,
}

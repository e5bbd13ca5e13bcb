//! Session data models.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use squadron_protocol::SessionMode;

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, no backend session yet.
    Pending,
    /// First prompt dispatched, waiting for backend acknowledgment.
    Starting,
    /// Backend session live.
    Running,
    /// Operator paused the session.
    Paused,
    /// Backend reported idle with no pending prompt left.
    Completed,
    /// Unrecoverable error (including a silent backend).
    Failed,
    /// Aborted or stopped by the operator.
    Cancelled,
    /// Terminal and frozen; still addressable, read-only.
    Archived,
}

impl SessionStatus {
    /// Statuses that count against the one-active-session-per-agent rule.
    pub const ACTIVE: &'static [SessionStatus] = &[
        SessionStatus::Pending,
        SessionStatus::Starting,
        SessionStatus::Running,
        SessionStatus::Paused,
    ];

    /// Statuses eligible for archiving.
    pub const TERMINAL: &'static [SessionStatus] = &[
        SessionStatus::Completed,
        SessionStatus::Failed,
        SessionStatus::Cancelled,
    ];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Archived => "archived",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SessionStatus::Pending),
            "starting" => Ok(SessionStatus::Starting),
            "running" => Ok(SessionStatus::Running),
            "paused" => Ok(SessionStatus::Paused),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            "archived" => Ok(SessionStatus::Archived),
            _ => Err(format!("unknown session status: {}", s)),
        }
    }
}

impl TryFrom<String> for SessionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A session.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub project_id: String,
    pub agent_id: String,
    /// Backend-issued id; assigned exactly once at first acknowledgment.
    pub backend_session_id: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: SessionStatus,
    pub model: Option<String>,
    #[sqlx(try_from = "String")]
    pub mode: SessionMode,
    pub ticket_key: Option<String>,
    pub worktree_path: Option<String>,
    pub branch: Option<String>,
    pub base_branch: Option<String>,
    /// Durable form of the depth-1 turn slot: set while a prompt awaits
    /// its `session:idle`.
    pub prompt_pending: bool,
    #[sqlx(json)]
    pub metadata: Value,
    /// Optimistic concurrency version.
    pub version: i64,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub created_at: String,
}

/// Request to start a session.
#[derive(Debug, Clone, Deserialize)]
pub struct StartSessionRequest {
    pub agent_id: String,
    #[serde(default)]
    pub ticket_key: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub worktree_path: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mode: Option<SessionMode>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_and_terminal_partition() {
        assert!(SessionStatus::Pending.is_active());
        assert!(SessionStatus::Paused.is_active());
        assert!(!SessionStatus::Completed.is_active());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Archived.is_terminal());
        assert!(!SessionStatus::Archived.is_active());
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            "pending",
            "starting",
            "running",
            "paused",
            "completed",
            "failed",
            "cancelled",
            "archived",
        ] {
            let parsed: SessionStatus = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }
}

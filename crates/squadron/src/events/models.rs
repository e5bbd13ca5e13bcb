//! Event records and the internal kind taxonomy.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Internal event kinds.
///
/// Kinds are colon-separated. Backends emit dotted forms; those are
/// rewritten at ingest by [`normalize_kind`] and nothing downstream matches
/// on the dotted spelling.
pub mod kind {
    pub const SESSION_STATUS_CHANGED: &str = "session:status_changed";
    pub const SESSION_IDLE: &str = "session:idle";
    pub const MESSAGE_UPDATED: &str = "message:updated";
    pub const MESSAGE_PART: &str = "message:part";
    pub const MESSAGE_TEXT_APPEND: &str = "message:text_append";
    pub const TICKET_CREATED: &str = "ticket:created";
    pub const TICKET_UPDATED: &str = "ticket:updated";
    pub const MAIL_SENT: &str = "mail:sent";
    pub const AGENT_STATUS_CHANGED: &str = "agent:status_changed";
    pub const SQUAD_OPENCODE_STATUS: &str = "squad:opencode_status";
    pub const MCP_UPDATED: &str = "mcp:updated";
    pub const NODE_DISCOVERED: &str = "node:discovered";
    pub const NODE_LOST: &str = "node:lost";
    pub const SYSTEM_CONNECTED: &str = "system:connected";
}

/// Rewrite a dotted kind to the colon-separated internal form.
/// Already-normalized kinds pass through unchanged.
pub fn normalize_kind(raw: &str) -> String {
    raw.replace('.', ":")
}

/// One event in the append-only log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventRecord {
    pub id: String,
    pub kind: String,
    #[sqlx(json)]
    pub payload: Value,
    pub project_id: String,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub occurred_at: String,
}

impl EventRecord {
    /// Create a new record stamped with the current UTC time.
    pub fn new(kind: impl Into<String>, project_id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            payload,
            project_id: project_id.into(),
            session_id: None,
            agent_id: None,
            occurred_at: now_utc(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

/// Current UTC time in the second-precision format SQLite's
/// `datetime('now')` produces.
pub(crate) fn now_utc() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_kind_rewrites_dots() {
        assert_eq!(normalize_kind("session.idle"), "session:idle");
        assert_eq!(
            normalize_kind("lsp.client.diagnostics"),
            "lsp:client:diagnostics"
        );
        assert_eq!(normalize_kind("session:idle"), "session:idle");
    }

    #[test]
    fn test_record_builder() {
        let record = EventRecord::new(kind::SESSION_IDLE, "p1", json!({"x": 1}))
            .with_session("s1")
            .with_agent("a1");
        assert_eq!(record.kind, "session:idle");
        assert_eq!(record.session_id.as_deref(), Some("s1"));
        assert_eq!(record.agent_id.as_deref(), Some("a1"));
        assert_eq!(record.occurred_at.len(), 19);
    }
}

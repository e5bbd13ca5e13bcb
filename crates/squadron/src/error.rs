//! Orchestrator error taxonomy.
//!
//! Every error surfaced to operators carries a stable `kind` string so the
//! UI can render it, plus an optional machine-readable `code` for conflict
//! subcases. Transient I/O inside the backend client and the ingester is
//! retried locally and never reaches this type; what does reach it is
//! either a caller mistake or a condition the operator must act on.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad input: missing path, invalid slug, unknown role.
    #[error("{0}")]
    Validation(String),

    /// Referenced entity missing.
    #[error("{0}")]
    NotFound(String),

    /// Another active session exists for the agent.
    #[error("agent {0} already has an active session")]
    AgentBusy(String),

    /// A prompt is already unanswered for the session.
    #[error("a turn is already in flight for session {0}")]
    TurnInProgress(String),

    /// A lane transition's inputs are not satisfied.
    #[error("{0}")]
    LanePrecondition(String),

    /// The target worktree path is owned by another build session.
    #[error("worktree already claimed at {0}")]
    WorktreeClaimed(String),

    /// An optimistic version check lost a concurrent update.
    #[error("{0}")]
    Conflict(String),

    /// The squad backend is not in the state the operation requires.
    #[error("{0}")]
    PreconditionFailed(String),

    /// Provisioning timeout, spawn failure, connection refused.
    #[error("{0}")]
    BackendUnavailable(String),

    /// The backend spoke something we could not understand.
    #[error("{0}")]
    BackendProtocol(String),

    /// The MCP toolchain CLI is missing.
    #[error("{0}")]
    CliUnavailable(String),

    /// A deadline elapsed (long-prompt turn, outbound call).
    #[error("{0}")]
    Timeout(String),

    /// No qualifying fenced JSON block after session completion.
    #[error("{0}")]
    ExtractionFailed(String),

    /// Anything else; logged with full context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Taxonomy kind, as rendered on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::AgentBusy(_)
            | Error::TurnInProgress(_)
            | Error::LanePrecondition(_)
            | Error::WorktreeClaimed(_)
            | Error::Conflict(_) => "conflict",
            Error::PreconditionFailed(_) => "precondition_failed",
            Error::BackendUnavailable(_) => "backend_unavailable",
            Error::BackendProtocol(_) => "backend_protocol",
            Error::CliUnavailable(_) => "cli_unavailable",
            Error::Timeout(_) => "timeout",
            Error::ExtractionFailed(_) => "extraction_failed",
            Error::Internal(_) => "internal",
        }
    }

    /// Conflict subcase, when one exists.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Error::AgentBusy(_) => Some("agent_busy"),
            Error::TurnInProgress(_) => Some("turn_in_progress"),
            Error::LanePrecondition(_) => Some("lane_precondition_unmet"),
            Error::WorktreeClaimed(_) => Some("worktree_claimed"),
            Error::BackendUnavailable(msg) => {
                if msg.contains("provisioning") {
                    Some("provisioning_timeout")
                } else if msg.contains("spawn") {
                    Some("spawn_failed")
                } else {
                    None
                }
            }
            Error::Timeout(msg) if msg.contains("silent") => Some("backend_silent"),
            _ => None,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Internal(anyhow::Error::new(err).context("database error"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(anyhow::Error::new(err).context("serialization error"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_kinds_share_wire_kind() {
        assert_eq!(Error::AgentBusy("a1".into()).kind(), "conflict");
        assert_eq!(Error::TurnInProgress("s1".into()).kind(), "conflict");
        assert_eq!(
            Error::AgentBusy("a1".into()).code(),
            Some("agent_busy")
        );
        assert_eq!(
            Error::WorktreeClaimed("/tmp/w".into()).code(),
            Some("worktree_claimed")
        );
    }

    #[test]
    fn test_internal_wraps_anyhow() {
        let err: Error = anyhow::anyhow!("boom").into();
        assert_eq!(err.kind(), "internal");
    }
}

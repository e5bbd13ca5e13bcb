//! Session orchestrator: the per-session state machine.
//!
//! ```text
//!                    create_prompt
//! pending ─────────────────────────► starting
//! starting   ─ backend ack ────────► running
//! running    ─ idle + no pending ──► completed
//! running    ─ abort ──────────────► cancelled   (stop only; abort keeps running)
//! running    ─ fatal error ────────► failed
//! any active ─ stop ───────────────► cancelled
//! completed|failed|cancelled ─ archive ─► archived
//! ```
//!
//! A turn begins on prompt/command/shell and ends when the ingester
//! observes `session:idle`. Turns are serialized by a depth-1 slot
//! (`turn_in_progress` on a second enqueue); a silent backend fails the
//! turn after the configured deadline.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use squadron_protocol::{
    CommandRequest, CreateSessionRequest as BackendCreateSession, PromptRequest, Role,
    SessionMode, ShellRequest,
};

use crate::agent::{Agent, AgentRepository, AgentStatus};
use crate::bus::{EventBus, SubscriptionFilter};
use crate::error::{Error, Result};
use crate::events::{kind, EventRecord, EventRepository};
use crate::ingest::{EventIngester, SessionRef};
use crate::opencode::{OpencodeClient, SessionEventStream};
use crate::squad::{SquadRepository, SquadSupervisor};

use super::models::{Session, SessionStatus, StartSessionRequest};
use super::repository::SessionRepository;
use super::transcript::TranscriptRepository;

/// Result of an abort request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortOutcome {
    /// The backend was told to stop the turn; the session stays running.
    Aborted,
    /// The natural idle beat the abort; the session completed untouched.
    AlreadyIdle,
}

/// Orchestrator timers.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// A turn with no idle after this long fails with `backend_silent`.
    pub turn_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            turn_timeout: Duration::from_secs(600),
        }
    }
}

/// Orchestrates every session on this host.
pub struct SessionOrchestrator {
    config: OrchestratorConfig,
    sessions: SessionRepository,
    transcripts: TranscriptRepository,
    events: EventRepository,
    agents: AgentRepository,
    squads: SquadRepository,
    supervisor: Arc<SquadSupervisor>,
    bus: EventBus,
    /// session id -> cancellation for its SSE stream + ingester.
    streams: DashMap<String, CancellationToken>,
}

impl SessionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        sessions: SessionRepository,
        transcripts: TranscriptRepository,
        events: EventRepository,
        agents: AgentRepository,
        squads: SquadRepository,
        supervisor: Arc<SquadSupervisor>,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions,
            transcripts,
            events,
            agents,
            squads,
            supervisor,
            bus,
            streams: DashMap::new(),
        })
    }

    // ========================================================================
    // Lifecycle operations
    // ========================================================================

    /// Create a session for an agent. Rejects with `agent_busy` while the
    /// agent has another active session.
    pub async fn start(&self, request: StartSessionRequest) -> Result<Session> {
        let agent = self.get_agent(&request.agent_id).await?;
        if let Some(active) = self.sessions.find_active_for_agent(&agent.id).await? {
            debug!(
                "Agent {} busy with session {}, rejecting start",
                agent.id, active.id
            );
            return Err(Error::AgentBusy(agent.id));
        }

        let squad = self
            .squads
            .get(&agent.squad_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("squad {}", agent.squad_id)))?;

        let mut metadata = request.metadata.unwrap_or_else(|| json!({}));
        if let Some(title) = request.title {
            metadata["title"] = json!(title);
        }

        let session = self
            .sessions
            .create(
                &squad.project_id,
                &agent.id,
                request.model.as_deref().or(agent.model.as_deref()),
                request.mode.unwrap_or_default(),
                request.ticket_key.as_deref(),
                request.worktree_path.as_deref(),
                request.branch.as_deref(),
                request.base_branch.as_deref(),
                metadata,
            )
            .await?;

        self.emit_status(&session, SessionStatus::Pending).await;
        Ok(session)
    }

    /// Dispatch a prompt turn. Terminal (non-archived) sessions resume: the
    /// same backend session continues when the squad still retains it,
    /// otherwise a fresh session is created transparently under the same
    /// ticket key and the returned session is the one that took the turn.
    pub async fn send_prompt(
        self: &Arc<Self>,
        session_id: &str,
        text: &str,
        mode: Option<SessionMode>,
        model: Option<String>,
        no_reply: bool,
    ) -> Result<Session> {
        let session = self.get_session(session_id).await?;
        if session.status == SessionStatus::Archived {
            return Err(Error::validation("archived sessions are read-only"));
        }

        let previous = session.status;
        if previous.is_terminal() {
            self.sessions
                .transition(session_id, SessionStatus::Starting, SessionStatus::TERMINAL)
                .await?;
        }
        let session = self.get_session(session_id).await?;

        match self
            .dispatch_turn(&session, TurnInput::Prompt {
                text: text.to_string(),
                mode: mode.unwrap_or(session.mode),
                model: model.clone(),
                no_reply,
            })
            .await
        {
            Ok(()) => self.get_session(session_id).await,
            Err(Error::BackendProtocol(reason))
                if previous.is_terminal() && session.backend_session_id.is_some() =>
            {
                // The squad no longer retains the backend session. Restore
                // the old row and take the turn on a fresh session.
                info!(
                    "Backend lost session {} ({}); resuming on a fresh session",
                    session_id, reason
                );
                self.sessions
                    .transition(session_id, previous, &[SessionStatus::Starting])
                    .await?;

                let fresh = self
                    .start(StartSessionRequest {
                        agent_id: session.agent_id.clone(),
                        ticket_key: session.ticket_key.clone(),
                        title: None,
                        worktree_path: session.worktree_path.clone(),
                        branch: session.branch.clone(),
                        base_branch: session.base_branch.clone(),
                        model: session.model.clone(),
                        mode: Some(session.mode),
                        metadata: Some(session.metadata.clone()),
                    })
                    .await?;
                self.dispatch_turn(&fresh, TurnInput::Prompt {
                    text: text.to_string(),
                    mode: mode.unwrap_or(fresh.mode),
                    model,
                    no_reply,
                })
                .await?;
                self.get_session(&fresh.id).await
            }
            Err(e) => {
                if previous.is_terminal() {
                    let _ = self
                        .sessions
                        .transition(session_id, previous, &[SessionStatus::Starting])
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Execute a slash command. `/new` is handled locally: the current
    /// session is cancelled and a fresh one spawned for the same agent.
    pub async fn execute_command(
        self: &Arc<Self>,
        session_id: &str,
        command: &str,
        arguments: Option<String>,
        mode: Option<SessionMode>,
        model: Option<String>,
    ) -> Result<Session> {
        let session = self.get_session(session_id).await?;
        let command = command.trim_start_matches('/').to_string();

        if command == "new" {
            self.stop(session_id, Some("replaced by /new")).await?;
            let fresh = self
                .start(StartSessionRequest {
                    agent_id: session.agent_id.clone(),
                    ticket_key: session.ticket_key.clone(),
                    title: None,
                    worktree_path: session.worktree_path.clone(),
                    branch: session.branch.clone(),
                    base_branch: session.base_branch.clone(),
                    model: session.model.clone(),
                    mode: Some(session.mode),
                    metadata: Some(json!({"resumed_from": session_id})),
                })
                .await?;
            return Ok(fresh);
        }

        self.dispatch_turn(&session, TurnInput::Command {
            command,
            arguments,
            mode: mode.unwrap_or(session.mode),
            model,
        })
        .await?;
        self.get_session(session_id).await
    }

    /// Run a one-shot shell command as a turn.
    pub async fn run_shell(
        self: &Arc<Self>,
        session_id: &str,
        command: &str,
        mode: Option<SessionMode>,
    ) -> Result<Session> {
        let session = self.get_session(session_id).await?;
        self.dispatch_turn(&session, TurnInput::Shell {
            command: command.to_string(),
            mode: mode.unwrap_or(session.mode),
        })
        .await?;
        self.get_session(session_id).await
    }

    /// Signal the backend to stop the current turn. If the natural idle
    /// crossed the abort in flight, the idle wins.
    pub async fn abort(&self, session_id: &str) -> Result<AbortOutcome> {
        let session = self.get_session(session_id).await?;
        if !session.prompt_pending {
            return Ok(AbortOutcome::AlreadyIdle);
        }

        if let Some(ref backend_id) = session.backend_session_id {
            let agent = self.get_agent(&session.agent_id).await?;
            if let Ok(client) = self.supervisor.client(&agent.squad_id) {
                if let Err(e) = client.abort(backend_id).await {
                    warn!("Backend abort for session {} failed: {}", session_id, e);
                }
            }
        }

        // Re-check: the idle may have completed the session meanwhile.
        let session = self.get_session(session_id).await?;
        if session.status == SessionStatus::Completed {
            return Ok(AbortOutcome::AlreadyIdle);
        }

        self.sessions.release_turn_slot(session_id).await?;
        self.sessions
            .transition(session_id, SessionStatus::Running, &[SessionStatus::Starting])
            .await?;
        self.set_agent_status(&session.agent_id, &session.project_id, AgentStatus::Idle)
            .await;
        Ok(AbortOutcome::Aborted)
    }

    /// Terminal stop: cancel outbound work, roll back un-acknowledged
    /// local echoes, and move the session to `cancelled`.
    pub async fn stop(&self, session_id: &str, reason: Option<&str>) -> Result<Session> {
        let session = self.get_session(session_id).await?;

        if session.status.is_active() {
            if let (Some(backend_id), true) =
                (session.backend_session_id.as_deref(), session.prompt_pending)
            {
                let agent = self.get_agent(&session.agent_id).await?;
                if let Ok(client) = self.supervisor.client(&agent.squad_id) {
                    let _ = client.abort(backend_id).await;
                }
            }

            if let Some(echo) = self
                .transcripts
                .last_unacknowledged(session_id, Role::User)
                .await?
            {
                let _ = self.transcripts.delete_unacknowledged(&echo.id).await;
            }

            self.sessions.release_turn_slot(session_id).await?;
            self.sessions
                .transition(session_id, SessionStatus::Cancelled, SessionStatus::ACTIVE)
                .await?;
            if let Some(reason) = reason {
                self.sessions
                    .set_metadata_field(session_id, "stop_reason", &json!(reason))
                    .await?;
            }
        }

        self.detach_stream(session_id);
        self.set_agent_status(&session.agent_id, &session.project_id, AgentStatus::Idle)
            .await;

        let session = self.get_session(session_id).await?;
        self.emit_status(&session, session.status).await;
        Ok(session)
    }

    /// Archive a terminal session.
    pub async fn archive(&self, session_id: &str) -> Result<Session> {
        let archived = self.sessions.archive(session_id).await?;
        if !archived {
            return Err(Error::PreconditionFailed(format!(
                "session {} is not in a terminal status",
                session_id
            )));
        }
        let session = self.get_session(session_id).await?;
        self.emit_status(&session, SessionStatus::Archived).await;
        Ok(session)
    }

    /// Transcript tail for the UI.
    pub async fn messages(
        &self,
        session_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<super::transcript::TranscriptEntry>> {
        self.get_session(session_id).await?;
        let entries = match limit {
            Some(limit) => self.transcripts.list_tail(session_id, limit).await?,
            None => self.transcripts.list(session_id).await?,
        };
        Ok(entries)
    }

    // ========================================================================
    // Turn dispatch
    // ========================================================================

    async fn dispatch_turn(self: &Arc<Self>, session: &Session, input: TurnInput) -> Result<()> {
        if !self.sessions.acquire_turn_slot(&session.id).await? {
            return Err(Error::TurnInProgress(session.id.clone()));
        }

        // Local echo for prompts, reconciled when the backend echoes it.
        let echo = match &input {
            TurnInput::Prompt { text, .. } => Some(
                self.transcripts
                    .append(
                        &session.id,
                        Role::User,
                        None,
                        &json!({
                            "role": Role::User,
                            "parts": [{"type": "text", "text": text}],
                        }),
                    )
                    .await?,
            ),
            _ => None,
        };

        match self.dispatch_to_backend(session, &input).await {
            Ok(()) => {
                self.sessions
                    .transition(
                        &session.id,
                        SessionStatus::Running,
                        &[SessionStatus::Pending, SessionStatus::Starting],
                    )
                    .await?;
                self.set_agent_status(&session.agent_id, &session.project_id, AgentStatus::Working)
                    .await;

                let refreshed = self.get_session(&session.id).await?;
                self.emit_status(&refreshed, refreshed.status).await;
                self.spawn_turn_monitor(refreshed);
                Ok(())
            }
            Err(e) => {
                if let Some(echo) = echo {
                    let _ = self.transcripts.delete_unacknowledged(&echo.id).await;
                }
                self.sessions.release_turn_slot(&session.id).await?;
                Err(e)
            }
        }
    }

    async fn dispatch_to_backend(
        self: &Arc<Self>,
        session: &Session,
        input: &TurnInput,
    ) -> Result<()> {
        let agent = self.get_agent(&session.agent_id).await?;
        self.supervisor.ensure_running(&agent.squad_id).await?;
        let client = self.supervisor.client(&agent.squad_id)?;

        let backend_id = match session.backend_session_id.clone() {
            Some(backend_id) => backend_id,
            None => {
                self.sessions
                    .transition(
                        &session.id,
                        SessionStatus::Starting,
                        &[SessionStatus::Pending],
                    )
                    .await?;
                let title = session
                    .ticket_key
                    .clone()
                    .unwrap_or_else(|| agent.name.clone());
                let created = client
                    .create_session(&BackendCreateSession {
                        title: Some(title),
                        directory: session.worktree_path.clone(),
                    })
                    .await?;

                // Assigned exactly once; a concurrent assignment wins and
                // we adopt whatever landed.
                if !self
                    .sessions
                    .assign_backend_session_id(&session.id, &created.id)
                    .await?
                {
                    self.get_session(&session.id)
                        .await?
                        .backend_session_id
                        .ok_or_else(|| {
                            Error::Internal(anyhow::anyhow!(
                                "session {} lost its backend id",
                                session.id
                            ))
                        })?
                } else {
                    created.id
                }
            }
        };

        self.ensure_stream(session, &client, &backend_id);

        match input {
            TurnInput::Prompt {
                text,
                mode,
                model,
                no_reply,
            } => {
                client
                    .prompt(
                        &backend_id,
                        &PromptRequest {
                            text: text.clone(),
                            mode: *mode,
                            model: model.clone().or_else(|| session.model.clone()),
                            no_reply: no_reply.then_some(true),
                        },
                    )
                    .await
            }
            TurnInput::Command {
                command,
                arguments,
                mode,
                model,
            } => {
                client
                    .command(
                        &backend_id,
                        &CommandRequest {
                            command: command.clone(),
                            arguments: arguments.clone(),
                            mode: *mode,
                            model: model.clone(),
                        },
                    )
                    .await
            }
            TurnInput::Shell { command, mode } => {
                client
                    .shell(
                        &backend_id,
                        &ShellRequest {
                            command: command.clone(),
                            mode: *mode,
                        },
                    )
                    .await
            }
        }
    }

    /// Start the SSE stream + ingester pair for a session if not already
    /// attached.
    fn ensure_stream(self: &Arc<Self>, session: &Session, client: &OpencodeClient, backend_id: &str) {
        if self.streams.contains_key(&session.id) {
            return;
        }

        let token = CancellationToken::new();
        self.streams.insert(session.id.clone(), token.clone());

        let (tx, rx) = mpsc::channel(256);
        let stream = SessionEventStream::new(client.stream_url(backend_id));
        let stream_token = token.clone();
        tokio::spawn(async move {
            stream
                .run(stream_token, move |event| {
                    if let Err(e) = tx.try_send(event) {
                        warn!("Dropping backend event: {}", e);
                    }
                })
                .await;
        });

        let ingester = EventIngester::new(
            SessionRef {
                session_id: session.id.clone(),
                project_id: session.project_id.clone(),
                agent_id: session.agent_id.clone(),
            },
            self.sessions.clone(),
            self.transcripts.clone(),
            self.events.clone(),
            self.bus.clone(),
        );
        tokio::spawn(async move {
            ingester.run(rx).await;
        });
    }

    fn detach_stream(&self, session_id: &str) {
        if let Some((_, token)) = self.streams.remove(session_id) {
            token.cancel();
        }
    }

    /// Watch one turn: finish bookkeeping when the idle arrives, fail the
    /// session with `backend_silent` when nothing does.
    fn spawn_turn_monitor(self: &Arc<Self>, session: Session) {
        let orchestrator = Arc::clone(self);
        let mut events =
            Box::pin(self.bus.subscribe_filtered(SubscriptionFilter::session(&session.id)));
        let timeout = self.config.turn_timeout;

        tokio::spawn(async move {
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    event = events.next() => {
                        match event {
                            Some(event) if event.kind == kind::SESSION_IDLE => {
                                orchestrator
                                    .set_agent_status(
                                        &session.agent_id,
                                        &session.project_id,
                                        AgentStatus::Idle,
                                    )
                                    .await;
                                return;
                            }
                            Some(_) => continue,
                            None => return,
                        }
                    }
                    _ = &mut deadline => {
                        let current = match orchestrator.sessions.get(&session.id).await {
                            Ok(Some(current)) => current,
                            _ => return,
                        };
                        if current.prompt_pending && current.status.is_active() {
                            warn!(
                                "Turn on session {} silent for {:?}, failing",
                                session.id, timeout
                            );
                            let _ = orchestrator
                                .sessions
                                .fail(&session.id, "backend_silent")
                                .await;
                            let failed = orchestrator.sessions.get(&session.id).await.ok().flatten();
                            if let Some(failed) = failed {
                                orchestrator.emit_status(&failed, SessionStatus::Failed).await;
                            }
                            orchestrator
                                .set_agent_status(
                                    &session.agent_id,
                                    &session.project_id,
                                    AgentStatus::Idle,
                                )
                                .await;
                        }
                        return;
                    }
                }
            }
        });
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("session {}", session_id)))
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Agent> {
        self.agents
            .get(agent_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("agent {}", agent_id)))
    }

    async fn set_agent_status(&self, agent_id: &str, project_id: &str, status: AgentStatus) {
        if let Err(e) = self.agents.update_status(agent_id, status).await {
            warn!("Failed to update agent {} status: {:#}", agent_id, e);
            return;
        }
        self.bus.publish(
            EventRecord::new(
                kind::AGENT_STATUS_CHANGED,
                project_id,
                json!({"agent_id": agent_id, "status": status}),
            )
            .with_agent(agent_id),
        );
    }

    async fn emit_status(&self, session: &Session, status: SessionStatus) {
        let record = EventRecord::new(
            kind::SESSION_STATUS_CHANGED,
            &session.project_id,
            json!({"session_id": session.id, "status": status}),
        )
        .with_session(&session.id)
        .with_agent(&session.agent_id);

        if let Err(e) = self.events.insert(&record).await {
            warn!("Failed to persist status event: {:#}", e);
        }
        self.bus.publish(record);
    }
}

/// What a turn carries to the backend.
enum TurnInput {
    Prompt {
        text: String,
        mode: SessionMode,
        model: Option<String>,
        no_reply: bool,
    },
    Command {
        command: String,
        arguments: Option<String>,
        mode: SessionMode,
        model: Option<String>,
    },
    Shell {
        command: String,
        mode: SessionMode,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::mcp::McpServerRepository;
    use crate::project::ProjectRepository;
    use crate::settings::OpencodeSettings;

    async fn setup() -> (Database, Arc<SessionOrchestrator>, String) {
        let db = Database::in_memory().await.unwrap();
        let (_, agent_id) = crate::session::repository::tests::seed(&db).await;

        let bus = EventBus::new();
        let supervisor = SquadSupervisor::new(
            OpencodeSettings {
                binary: "/nonexistent/opencode".to_string(),
                base_port: 43900,
                provisioning_timeout_secs: 1,
                health_interval_secs: 1,
                stop_grace_secs: 1,
            },
            tempfile::tempdir().unwrap().keep(),
            SquadRepository::new(db.pool().clone()),
            ProjectRepository::new(db.pool().clone()),
            McpServerRepository::new(db.pool().clone()),
            bus.clone(),
        );

        let orchestrator = SessionOrchestrator::new(
            OrchestratorConfig {
                turn_timeout: Duration::from_millis(200),
            },
            SessionRepository::new(db.pool().clone()),
            TranscriptRepository::new(db.pool().clone()),
            EventRepository::new(db.pool().clone()),
            AgentRepository::new(db.pool().clone()),
            SquadRepository::new(db.pool().clone()),
            supervisor,
            bus,
        );
        (db, orchestrator, agent_id)
    }

    fn start_request(agent_id: &str) -> StartSessionRequest {
        StartSessionRequest {
            agent_id: agent_id.to_string(),
            ticket_key: Some("SQ-1".to_string()),
            title: None,
            worktree_path: None,
            branch: None,
            base_branch: None,
            model: None,
            mode: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_agent_busy_until_stopped() {
        let (_db, orchestrator, agent_id) = setup().await;

        let first = orchestrator.start(start_request(&agent_id)).await.unwrap();
        assert_eq!(first.status, SessionStatus::Pending);

        let busy = orchestrator.start(start_request(&agent_id)).await;
        match busy {
            Err(Error::AgentBusy(id)) => assert_eq!(id, agent_id),
            other => panic!("expected agent_busy, got {:?}", other.map(|s| s.id)),
        }

        orchestrator.stop(&first.id, None).await.unwrap();
        orchestrator.start(start_request(&agent_id)).await.unwrap();
    }

    #[tokio::test]
    async fn test_prompt_failure_rolls_back_echo_and_slot() {
        let (db, orchestrator, agent_id) = setup().await;

        let session = orchestrator.start(start_request(&agent_id)).await.unwrap();
        // The squad backend cannot spawn (nonexistent binary), so dispatch
        // fails after the slot and echo were taken.
        let err = orchestrator
            .send_prompt(&session.id, "do it", None, None, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "backend_unavailable");

        let sessions = SessionRepository::new(db.pool().clone());
        let after = sessions.get(&session.id).await.unwrap().unwrap();
        assert!(!after.prompt_pending);
        assert_eq!(after.status, SessionStatus::Pending);

        let transcripts = TranscriptRepository::new(db.pool().clone());
        assert!(transcripts.list(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_abort_without_pending_prompt_is_already_idle() {
        let (_db, orchestrator, agent_id) = setup().await;
        let session = orchestrator.start(start_request(&agent_id)).await.unwrap();

        let outcome = orchestrator.abort(&session.id).await.unwrap();
        assert_eq!(outcome, AbortOutcome::AlreadyIdle);
    }

    #[tokio::test]
    async fn test_abort_idle_race_idle_wins() {
        let (db, orchestrator, agent_id) = setup().await;
        let session = orchestrator.start(start_request(&agent_id)).await.unwrap();

        // Simulate an in-flight turn whose idle lands just before abort.
        let sessions = SessionRepository::new(db.pool().clone());
        sessions
            .transition(
                &session.id,
                SessionStatus::Running,
                &[SessionStatus::Pending],
            )
            .await
            .unwrap();
        sessions.acquire_turn_slot(&session.id).await.unwrap();
        sessions.complete_if_prompt_pending(&session.id).await.unwrap();

        let outcome = orchestrator.abort(&session.id).await.unwrap();
        assert_eq!(outcome, AbortOutcome::AlreadyIdle);
        let after = sessions.get(&session.id).await.unwrap().unwrap();
        assert_eq!(after.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_stop_then_archive() {
        let (_db, orchestrator, agent_id) = setup().await;
        let session = orchestrator.start(start_request(&agent_id)).await.unwrap();

        // Archiving a non-terminal session is refused.
        let err = orchestrator.archive(&session.id).await.unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");

        let stopped = orchestrator.stop(&session.id, Some("done")).await.unwrap();
        assert_eq!(stopped.status, SessionStatus::Cancelled);
        assert_eq!(stopped.metadata["stop_reason"], "done");

        let archived = orchestrator.archive(&session.id).await.unwrap();
        assert_eq!(archived.status, SessionStatus::Archived);
    }
}

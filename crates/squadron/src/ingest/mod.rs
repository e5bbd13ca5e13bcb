//! Event ingester: consumes a backend session's SSE stream, normalizes
//! events into the internal taxonomy, persists a replayable transcript,
//! and republishes on the event bus.
//!
//! Within one connection events apply strictly in receive order. Across
//! reconnects, idempotency comes from (message id, part id) upserts, so
//! replaying a stored stream over an empty repository reproduces the
//! original transcript.

mod normalize;

use anyhow::Result;
use log::{debug, warn};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use squadron_protocol::{
    BackendEvent, MessageUpdatedPayload, PartUpdatedPayload, PromptAppendPayload, Role,
    SessionStatusPayload,
};

use crate::bus::EventBus;
use crate::events::{kind, normalize_kind, EventRecord, EventRepository};
use crate::session::{SessionRepository, SessionStatus, TranscriptRepository};

pub use normalize::{append_text, merge_info, upsert_part};

/// Identity of the session an ingester feeds.
#[derive(Debug, Clone)]
pub struct SessionRef {
    pub session_id: String,
    pub project_id: String,
    pub agent_id: String,
}

/// Per-session ingestion pipeline.
pub struct EventIngester {
    meta: SessionRef,
    sessions: SessionRepository,
    transcripts: TranscriptRepository,
    events: EventRepository,
    bus: EventBus,
}

impl EventIngester {
    pub fn new(
        meta: SessionRef,
        sessions: SessionRepository,
        transcripts: TranscriptRepository,
        events: EventRepository,
        bus: EventBus,
    ) -> Self {
        Self {
            meta,
            sessions,
            transcripts,
            events,
            bus,
        }
    }

    /// Drain a channel of backend events until it closes. Individual apply
    /// failures are logged and skipped; they never stop the pipeline.
    pub async fn run(self, mut rx: mpsc::Receiver<BackendEvent>) {
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.apply(&event).await {
                warn!(
                    "Failed to apply backend event '{}' for session {}: {:#}",
                    event.effective_name(),
                    self.meta.session_id,
                    e
                );
            }
        }
        debug!("Ingester for session {} drained", self.meta.session_id);
    }

    /// Apply one backend event: normalize, persist, publish.
    pub async fn apply(&self, event: &BackendEvent) -> Result<()> {
        let name = event.effective_name().to_string();
        let payload = event.payload().clone();

        match name.as_str() {
            "message.updated" | "message.created" => {
                self.apply_message_updated(&payload).await
            }
            "message.part.updated" | "message.part.created" | "part.updated" | "part.created" => {
                self.apply_part_updated(&payload).await
            }
            "tui.prompt.append" => self.apply_prompt_append(&payload).await,
            "session.idle" => self.apply_idle().await,
            "session.status" => {
                let status: SessionStatusPayload =
                    serde_json::from_value(payload.clone()).unwrap_or_default();
                if status.is_idle() {
                    self.apply_idle().await
                } else {
                    self.apply_generic("session.status", &payload).await
                }
            }
            "session.status_changed" => self.apply_status_changed(&payload).await,
            other => self.apply_generic(other, &payload).await,
        }
    }

    /// `message.updated`: upsert the transcript entry by backend message
    /// id, merging info fields into the stored payload.
    async fn apply_message_updated(&self, payload: &Value) -> Result<()> {
        let parsed: MessageUpdatedPayload = serde_json::from_value(payload.clone())?;
        let info = parsed.info;
        let role = info.role.unwrap_or(Role::Assistant);

        let entry = match self
            .transcripts
            .get_by_backend_message_id(&self.meta.session_id, &info.id)
            .await?
        {
            Some(existing) => {
                let mut merged = existing.payload.clone();
                merge_info(&mut merged, &info);
                self.transcripts.update_payload(&existing.id, &merged).await?;
                existing
            }
            None => {
                // A user message may be the backend echo of a local
                // optimistic entry; adopt it instead of duplicating.
                let echo = if role == Role::User {
                    self.transcripts
                        .last_unacknowledged(&self.meta.session_id, Role::User)
                        .await?
                } else {
                    None
                };

                match echo {
                    Some(local) => {
                        self.transcripts
                            .attach_backend_message_id(&local.id, &info.id)
                            .await?;
                        let mut merged = local.payload.clone();
                        merge_info(&mut merged, &info);
                        self.transcripts.update_payload(&local.id, &merged).await?;
                        local
                    }
                    None => {
                        let mut fresh = json!({"id": info.id, "role": role, "parts": []});
                        merge_info(&mut fresh, &info);
                        self.transcripts
                            .append(&self.meta.session_id, role, Some(&info.id), &fresh)
                            .await?
                    }
                }
            }
        };

        self.publish(
            kind::MESSAGE_UPDATED,
            json!({"message_id": info.id, "entry_id": entry.id}),
        );
        Ok(())
    }

    /// `message.part.updated`: upsert the part within its entry by part id
    /// or type; text parts with a delta append instead of replacing.
    async fn apply_part_updated(&self, payload: &Value) -> Result<()> {
        let parsed: PartUpdatedPayload = serde_json::from_value(payload.clone())?;
        let part_value = serde_json::to_value(&parsed.part)?;

        let entry = match parsed.message_id.as_deref() {
            Some(message_id) => {
                match self
                    .transcripts
                    .get_by_backend_message_id(&self.meta.session_id, message_id)
                    .await?
                {
                    Some(entry) => entry,
                    None => {
                        // Part arrived before its message envelope.
                        let fresh = json!({"id": message_id, "role": Role::Assistant, "parts": []});
                        self.transcripts
                            .append(
                                &self.meta.session_id,
                                Role::Assistant,
                                Some(message_id),
                                &fresh,
                            )
                            .await?
                    }
                }
            }
            None => match self
                .transcripts
                .last_assistant_entry(&self.meta.session_id)
                .await?
            {
                Some(entry) => entry,
                None => {
                    let fresh = json!({"role": Role::Assistant, "parts": []});
                    self.transcripts
                        .append(&self.meta.session_id, Role::Assistant, None, &fresh)
                        .await?
                }
            },
        };

        let mut updated = entry.payload.clone();
        upsert_part(&mut updated, part_value, parsed.delta.as_deref());
        self.transcripts.update_payload(&entry.id, &updated).await?;

        self.publish(
            kind::MESSAGE_PART,
            json!({
                "entry_id": entry.id,
                "message_id": parsed.message_id,
                "part_type": parsed.part.kind(),
                "part_id": parsed.part.id(),
            }),
        );
        Ok(())
    }

    /// `tui.prompt.append`: append text to the active assistant entry.
    async fn apply_prompt_append(&self, payload: &Value) -> Result<()> {
        let parsed: PromptAppendPayload = serde_json::from_value(payload.clone())?;
        if parsed.text.is_empty() {
            return Ok(());
        }

        let entry = match self
            .transcripts
            .last_assistant_entry(&self.meta.session_id)
            .await?
        {
            Some(entry) => entry,
            None => {
                let fresh = json!({"role": Role::Assistant, "parts": []});
                self.transcripts
                    .append(&self.meta.session_id, Role::Assistant, None, &fresh)
                    .await?
            }
        };

        let mut updated = entry.payload.clone();
        append_text(&mut updated, &parsed.text);
        self.transcripts.update_payload(&entry.id, &updated).await?;

        self.publish(
            kind::MESSAGE_TEXT_APPEND,
            json!({"entry_id": entry.id, "delta": parsed.text}),
        );
        Ok(())
    }

    /// Idle: complete the session if a prompt was pending, else no-op.
    async fn apply_idle(&self) -> Result<()> {
        let completed = self
            .sessions
            .complete_if_prompt_pending(&self.meta.session_id)
            .await?;

        let record = self.record(kind::SESSION_IDLE, json!({"completed": completed}));
        self.events.insert(&record).await?;
        self.bus.publish(record);

        if completed {
            self.publish(
                kind::SESSION_STATUS_CHANGED,
                json!({"status": SessionStatus::Completed}),
            );
        }
        Ok(())
    }

    /// `session.status_changed`: apply pause/resume reported by the
    /// backend; anything else is recorded but not acted on.
    async fn apply_status_changed(&self, payload: &Value) -> Result<()> {
        let parsed: SessionStatusPayload =
            serde_json::from_value(payload.clone()).unwrap_or_default();

        if let Some(status) = parsed.status.as_deref() {
            match status.parse::<SessionStatus>() {
                Ok(SessionStatus::Paused) => {
                    self.sessions
                        .transition(
                            &self.meta.session_id,
                            SessionStatus::Paused,
                            &[SessionStatus::Running],
                        )
                        .await?;
                }
                Ok(SessionStatus::Running) => {
                    self.sessions
                        .transition(
                            &self.meta.session_id,
                            SessionStatus::Running,
                            &[SessionStatus::Paused, SessionStatus::Starting],
                        )
                        .await?;
                }
                Ok(other) => {
                    debug!(
                        "Ignoring backend-driven status '{}' for session {}",
                        other, self.meta.session_id
                    );
                }
                Err(_) => {
                    debug!(
                        "Unknown backend status '{}' for session {}",
                        status, self.meta.session_id
                    );
                }
            }
        }

        let record = self.record(kind::SESSION_STATUS_CHANGED, payload.clone());
        self.events.insert(&record).await?;
        self.bus.publish(record);
        Ok(())
    }

    /// Anything else: rewrite the kind and persist as a generic event.
    async fn apply_generic(&self, name: &str, payload: &Value) -> Result<()> {
        let record = self.record(&normalize_kind(name), payload.clone());
        self.events.insert(&record).await?;
        self.bus.publish(record);
        Ok(())
    }

    fn record(&self, kind: &str, payload: Value) -> EventRecord {
        EventRecord::new(kind, &self.meta.project_id, payload)
            .with_session(&self.meta.session_id)
            .with_agent(&self.meta.agent_id)
    }

    /// Publish-only (no event row): message traffic is persisted via the
    /// transcript, not the event log.
    fn publish(&self, kind: &str, payload: Value) {
        self.bus.publish(self.record(kind, payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;
    use squadron_protocol::SessionMode;

    async fn setup() -> (Database, EventIngester) {
        let db = Database::in_memory().await.unwrap();
        let (project_id, agent_id) = crate::session::repository::tests::seed(&db).await;
        let sessions = SessionRepository::new(db.pool().clone());
        let session = sessions
            .create(
                &project_id,
                &agent_id,
                None,
                SessionMode::Build,
                None,
                None,
                None,
                None,
                json!({}),
            )
            .await
            .unwrap();
        sessions
            .transition(
                &session.id,
                SessionStatus::Running,
                &[SessionStatus::Pending],
            )
            .await
            .unwrap();

        let ingester = EventIngester::new(
            SessionRef {
                session_id: session.id.clone(),
                project_id,
                agent_id,
            },
            sessions,
            TranscriptRepository::new(db.pool().clone()),
            EventRepository::new(db.pool().clone()),
            EventBus::new(),
        );
        (db, ingester)
    }

    fn message_updated(id: &str, role: &str) -> BackendEvent {
        BackendEvent::new(
            "message.updated",
            json!({"info": {"id": id, "role": role}}),
        )
    }

    fn part_updated(message_id: &str, part: Value) -> BackendEvent {
        BackendEvent::new(
            "message.part.updated",
            json!({"messageID": message_id, "part": part}),
        )
    }

    #[tokio::test]
    async fn test_message_and_part_upserts_are_idempotent() {
        let (db, ingester) = setup().await;
        let transcripts = TranscriptRepository::new(db.pool().clone());

        let events = vec![
            message_updated("msg_1", "assistant"),
            part_updated("msg_1", json!({"type": "text", "id": "prt_1", "text": "hello"})),
            part_updated("msg_1", json!({"type": "text", "id": "prt_1", "text": "hello world"})),
        ];

        // Apply once, then replay the whole stream (reconnect semantics).
        for ev in events.iter().chain(events.iter()) {
            ingester.apply(ev).await.unwrap();
        }

        let entries = transcripts.list(&ingester.meta.session_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        let parts = entries[0].payload["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["text"], "hello world");
    }

    #[tokio::test]
    async fn test_text_delta_appends() {
        let (db, ingester) = setup().await;
        let transcripts = TranscriptRepository::new(db.pool().clone());

        ingester
            .apply(&message_updated("msg_1", "assistant"))
            .await
            .unwrap();
        ingester
            .apply(&BackendEvent::new(
                "message.part.updated",
                json!({
                    "messageID": "msg_1",
                    "part": {"type": "text", "id": "prt_1", "text": ""},
                    "delta": "hel"
                }),
            ))
            .await
            .unwrap();
        ingester
            .apply(&BackendEvent::new(
                "message.part.updated",
                json!({
                    "messageID": "msg_1",
                    "part": {"type": "text", "id": "prt_1", "text": ""},
                    "delta": "lo"
                }),
            ))
            .await
            .unwrap();

        let entries = transcripts.list(&ingester.meta.session_id).await.unwrap();
        assert_eq!(entries[0].payload["parts"][0]["text"], "hello");
    }

    #[tokio::test]
    async fn test_user_echo_reconciled_not_duplicated() {
        let (db, ingester) = setup().await;
        let transcripts = TranscriptRepository::new(db.pool().clone());

        // Local echo inserted by the orchestrator at prompt time.
        transcripts
            .append(
                &ingester.meta.session_id,
                Role::User,
                None,
                &json!({"role": "user", "parts": [{"type": "text", "text": "do the thing"}]}),
            )
            .await
            .unwrap();

        ingester
            .apply(&message_updated("msg_user_1", "user"))
            .await
            .unwrap();

        let entries = transcripts.list(&ingester.meta.session_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].backend_message_id.as_deref(),
            Some("msg_user_1")
        );
    }

    #[tokio::test]
    async fn test_idle_completes_pending_turn_only() {
        let (db, ingester) = setup().await;
        let sessions = SessionRepository::new(db.pool().clone());

        // Idle with no pending prompt: no-op.
        ingester
            .apply(&BackendEvent::new("session.idle", json!({})))
            .await
            .unwrap();
        let session = sessions.get(&ingester.meta.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Running);

        sessions
            .acquire_turn_slot(&ingester.meta.session_id)
            .await
            .unwrap();
        ingester
            .apply(&BackendEvent::new(
                "session.status",
                json!({"type": "idle"}),
            ))
            .await
            .unwrap();
        let session = sessions.get(&ingester.meta.session_id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_event_normalized_and_persisted() {
        let (db, ingester) = setup().await;
        let events = EventRepository::new(db.pool().clone());

        ingester
            .apply(&BackendEvent::new(
                "installation.updated",
                json!({"version": "0.9.0"}),
            ))
            .await
            .unwrap();

        let stored = events
            .list_for_session(&ingester.meta.session_id)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, "installation:updated");
    }
}

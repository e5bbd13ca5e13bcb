//! SSE event payloads.
//!
//! The backend frames its stream as `event: <name>` / `data: <json>`
//! records. [`BackendEvent`] is the raw record; the typed payload structs
//! below are parsed on demand by the event ingester once it has matched the
//! event name. Payload parsing is deliberately lenient -- a field the
//! ingester does not need must never make it drop a record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::parts::{MessageInfo, Part};

/// One record off the SSE stream, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEvent {
    /// The SSE `event:` name (e.g. `message.part.updated`). Backends that
    /// omit it put the discriminator in a `type` field of the data instead.
    pub event: String,
    pub data: Value,
}

impl BackendEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// The effective event name: the SSE name, or the payload's `type`
    /// field when the name is empty or the generic `message`.
    pub fn effective_name(&self) -> &str {
        if !self.event.is_empty() && self.event != "message" {
            return &self.event;
        }
        self.data
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.event)
    }

    /// The payload proper: some backends nest it under `properties`.
    pub fn payload(&self) -> &Value {
        self.data.get("properties").unwrap_or(&self.data)
    }
}

/// Payload of `message.updated`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageUpdatedPayload {
    pub info: MessageInfo,
}

/// Payload of `message.part.updated`.
#[derive(Debug, Clone, Deserialize)]
pub struct PartUpdatedPayload {
    #[serde(rename = "messageID", default)]
    pub message_id: Option<String>,
    pub part: Part,
    /// Incremental text for streaming parts; absent on full snapshots.
    #[serde(default)]
    pub delta: Option<String>,
}

/// Payload of `tui.prompt.append`.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptAppendPayload {
    #[serde(default)]
    pub text: String,
}

/// Payload of `session.status` / `session.status_changed` / `session.idle`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionStatusPayload {
    #[serde(rename = "sessionID", default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "type", default)]
    pub status_type: Option<String>,
}

impl SessionStatusPayload {
    /// Whether this status report means the session has gone idle.
    pub fn is_idle(&self) -> bool {
        self.status_type.as_deref() == Some("idle") || self.status.as_deref() == Some("idle")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_effective_name_prefers_sse_name() {
        let ev = BackendEvent::new("message.part.updated", json!({"type": "ignored"}));
        assert_eq!(ev.effective_name(), "message.part.updated");
    }

    #[test]
    fn test_effective_name_falls_back_to_type_field() {
        let ev = BackendEvent::new("message", json!({"type": "session.idle"}));
        assert_eq!(ev.effective_name(), "session.idle");
        let ev = BackendEvent::new("", json!({"type": "session.idle"}));
        assert_eq!(ev.effective_name(), "session.idle");
    }

    #[test]
    fn test_payload_unwraps_properties() {
        let ev = BackendEvent::new(
            "message.updated",
            json!({"properties": {"info": {"id": "msg_1"}}}),
        );
        let payload: MessageUpdatedPayload = serde_json::from_value(ev.payload().clone()).unwrap();
        assert_eq!(payload.info.id, "msg_1");
    }

    #[test]
    fn test_idle_detection_both_shapes() {
        let a: SessionStatusPayload = serde_json::from_value(json!({"type": "idle"})).unwrap();
        let b: SessionStatusPayload = serde_json::from_value(json!({"status": "idle"})).unwrap();
        let c: SessionStatusPayload = serde_json::from_value(json!({"status": "busy"})).unwrap();
        assert!(a.is_idle());
        assert!(b.is_idle());
        assert!(!c.is_idle());
    }
}

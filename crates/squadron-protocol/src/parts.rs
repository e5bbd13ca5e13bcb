//! Message and part types.
//!
//! A backend message is a role-tagged container for an ordered list of typed
//! parts. Parts arrive incrementally over SSE (`message.part.updated`) and
//! are folded into transcript entries by part id, so every part variant that
//! can carry an id does.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Token counts reported with assistant messages.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub reasoning: u64,
    #[serde(default)]
    pub cache_read: u64,
    #[serde(default)]
    pub cache_write: u64,
}

/// Message-level metadata carried by `message.updated`.
///
/// Only the fields the orchestrator acts on are named; the remainder rides
/// along in `extra` and is merged into the persisted transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInfo {
    /// Backend-issued message id, unique within the backend session.
    pub id: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(rename = "sessionID", default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub tokens: Option<Usage>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Execution state of a tool part.
///
/// Kept permissive: the backend reports `pending`, `running`, `completed`
/// and `error`, with input/output attached at different stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// A message part.
///
/// Closed sum over the part types the backend emits today. A part with an
/// unrecognized `type` deserializes into [`Part::Unknown`] carrying the
/// original map, so replays of old transcripts survive backend upgrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    #[serde(rename_all = "camelCase")]
    Text {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        text: String,
        /// Synthetic parts are backend-injected context, not model output.
        #[serde(default)]
        synthetic: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    Reasoning {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Tool {
        #[serde(default)]
        id: Option<String>,
        #[serde(rename = "callID", default)]
        call_id: Option<String>,
        #[serde(default)]
        tool: String,
        #[serde(default)]
        state: ToolState,
    },
    #[serde(rename_all = "camelCase")]
    File {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        mime: Option<String>,
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Patch {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        hash: Option<String>,
        #[serde(default)]
        files: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    StepStart {
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    StepFinish {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        cost: Option<f64>,
        #[serde(default)]
        tokens: Option<Usage>,
    },
    #[serde(rename_all = "camelCase")]
    Snapshot {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        snapshot: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Compaction {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        summary: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Agent {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Retry {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        attempt: Option<u32>,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Subtask {
        #[serde(default)]
        id: Option<String>,
        #[serde(rename = "sessionID", default)]
        session_id: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    /// Forward-compatibility escape hatch: the original map, untouched.
    #[serde(untagged)]
    Unknown(Value),
}

impl Part {
    /// The part id, when the backend assigned one.
    pub fn id(&self) -> Option<&str> {
        match self {
            Part::Text { id, .. }
            | Part::Reasoning { id, .. }
            | Part::Tool { id, .. }
            | Part::File { id, .. }
            | Part::Patch { id, .. }
            | Part::StepStart { id }
            | Part::StepFinish { id, .. }
            | Part::Snapshot { id, .. }
            | Part::Compaction { id, .. }
            | Part::Agent { id, .. }
            | Part::Retry { id, .. }
            | Part::Subtask { id, .. } => id.as_deref(),
            Part::Unknown(value) => value.get("id").and_then(|v| v.as_str()),
        }
    }

    /// The wire `type` tag, including for unknown parts.
    pub fn kind(&self) -> &str {
        match self {
            Part::Text { .. } => "text",
            Part::Reasoning { .. } => "reasoning",
            Part::Tool { .. } => "tool",
            Part::File { .. } => "file",
            Part::Patch { .. } => "patch",
            Part::StepStart { .. } => "step-start",
            Part::StepFinish { .. } => "step-finish",
            Part::Snapshot { .. } => "snapshot",
            Part::Compaction { .. } => "compaction",
            Part::Agent { .. } => "agent",
            Part::Retry { .. } => "retry",
            Part::Subtask { .. } => "subtask",
            Part::Unknown(value) => value
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_part_round_trip() {
        let part: Part = serde_json::from_value(json!({
            "type": "text",
            "id": "prt_1",
            "text": "hello"
        }))
        .unwrap();
        assert_eq!(part.id(), Some("prt_1"));
        assert_eq!(part.kind(), "text");
        match part {
            Part::Text { text, .. } => assert_eq!(text, "hello"),
            other => panic!("expected text part, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_part_camel_case_fields() {
        let part: Part = serde_json::from_value(json!({
            "type": "tool",
            "id": "prt_2",
            "callID": "call_9",
            "tool": "bash",
            "state": { "status": "completed", "output": "ok" }
        }))
        .unwrap();
        match part {
            Part::Tool {
                call_id,
                tool,
                state,
                ..
            } => {
                assert_eq!(call_id.as_deref(), Some("call_9"));
                assert_eq!(tool, "bash");
                assert_eq!(state.status, "completed");
            }
            other => panic!("expected tool part, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_part_preserved() {
        let raw = json!({
            "type": "telemetry",
            "id": "prt_3",
            "samples": [1, 2, 3]
        });
        let part: Part = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(part.kind(), "telemetry");
        assert_eq!(part.id(), Some("prt_3"));
        match &part {
            Part::Unknown(value) => assert_eq!(*value, raw),
            other => panic!("expected unknown part, got {:?}", other),
        }
        // Serializing an unknown part emits the original map.
        assert_eq!(serde_json::to_value(&part).unwrap(), raw);
    }

    #[test]
    fn test_message_info_keeps_extra_fields() {
        let info: MessageInfo = serde_json::from_value(json!({
            "id": "msg_1",
            "role": "assistant",
            "sessionID": "ses_1",
            "finishReason": "stop"
        }))
        .unwrap();
        assert_eq!(info.id, "msg_1");
        assert_eq!(info.session_id.as_deref(), Some("ses_1"));
        assert_eq!(info.extra.get("finishReason"), Some(&json!("stop")));
    }
}

//! Pure payload-folding helpers.
//!
//! Transcript entries store the materialized message view: info fields at
//! the top level and an ordered `parts` array. These helpers fold incoming
//! updates into that view and are deliberately free of I/O so replay
//! equivalence can be tested directly.

use serde_json::{json, Value};

use squadron_protocol::MessageInfo;

/// Merge message info fields into an entry payload. Existing keys are
/// overwritten; `parts` is never touched.
pub fn merge_info(payload: &mut Value, info: &MessageInfo) {
    let obj = ensure_object(payload);
    obj.insert("id".to_string(), json!(info.id));
    if let Some(role) = info.role {
        obj.insert("role".to_string(), json!(role));
    }
    if let Some(ref model) = info.model {
        obj.insert("model".to_string(), json!(model));
    }
    if let Some(ref provider) = info.provider {
        obj.insert("provider".to_string(), json!(provider));
    }
    if let Some(tokens) = info.tokens {
        obj.insert("tokens".to_string(), json!(tokens));
    }
    for (key, value) in &info.extra {
        obj.insert(key.clone(), value.clone());
    }
}

/// Upsert a part into the entry's `parts` array, keyed by part id when
/// present, falling back to part type. Text parts carrying a delta append
/// to the existing text instead of replacing it.
pub fn upsert_part(payload: &mut Value, part: Value, delta: Option<&str>) {
    let obj = ensure_object(payload);
    let parts = obj.entry("parts").or_insert_with(|| json!([]));
    if !parts.is_array() {
        *parts = json!([]);
    }
    let parts = parts.as_array_mut().unwrap();

    let part_id = part.get("id").and_then(|v| v.as_str()).map(str::to_owned);
    let part_type = part.get("type").and_then(|v| v.as_str()).map(str::to_owned);

    let existing = parts.iter_mut().find(|candidate| {
        if let Some(ref id) = part_id {
            return candidate.get("id").and_then(|v| v.as_str()) == Some(id);
        }
        if let Some(ref ty) = part_type {
            return candidate.get("type").and_then(|v| v.as_str()) == Some(ty);
        }
        false
    });

    match existing {
        Some(slot) => {
            if let (Some(delta), Some("text")) = (delta, part_type.as_deref()) {
                let current = slot.get("text").and_then(|v| v.as_str()).unwrap_or("");
                let appended = format!("{}{}", current, delta);
                if let Some(slot_obj) = slot.as_object_mut() {
                    slot_obj.insert("text".to_string(), json!(appended));
                }
            } else {
                *slot = part;
            }
        }
        None => {
            let mut fresh = part;
            if let (Some(delta), Some("text")) = (delta, part_type.as_deref()) {
                if let Some(fresh_obj) = fresh.as_object_mut() {
                    let current = fresh_obj
                        .get("text")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    fresh_obj.insert("text".to_string(), json!(current + delta));
                }
            }
            parts.push(fresh);
        }
    }
}

/// Append text to the entry's trailing text part, creating one if the
/// entry has none.
pub fn append_text(payload: &mut Value, text: &str) {
    let obj = ensure_object(payload);
    let parts = obj.entry("parts").or_insert_with(|| json!([]));
    if !parts.is_array() {
        *parts = json!([]);
    }
    let parts = parts.as_array_mut().unwrap();

    let last_text = parts
        .iter_mut()
        .rev()
        .find(|p| p.get("type").and_then(|v| v.as_str()) == Some("text"));

    match last_text {
        Some(part) => {
            let current = part.get("text").and_then(|v| v.as_str()).unwrap_or("");
            let appended = format!("{}{}", current, text);
            if let Some(part_obj) = part.as_object_mut() {
                part_obj.insert("text".to_string(), json!(appended));
            }
        }
        None => parts.push(json!({"type": "text", "text": text})),
    }
}

fn ensure_object(payload: &mut Value) -> &mut serde_json::Map<String, Value> {
    if !payload.is_object() {
        *payload = json!({});
    }
    payload.as_object_mut().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_by_id_replaces() {
        let mut payload = json!({"parts": [{"type": "text", "id": "p1", "text": "a"}]});
        upsert_part(
            &mut payload,
            json!({"type": "text", "id": "p1", "text": "ab"}),
            None,
        );
        assert_eq!(payload["parts"].as_array().unwrap().len(), 1);
        assert_eq!(payload["parts"][0]["text"], "ab");
    }

    #[test]
    fn test_upsert_by_type_when_no_id() {
        let mut payload = json!({"parts": [{"type": "reasoning", "text": "thinking"}]});
        upsert_part(
            &mut payload,
            json!({"type": "reasoning", "text": "thinking more"}),
            None,
        );
        assert_eq!(payload["parts"].as_array().unwrap().len(), 1);
        assert_eq!(payload["parts"][0]["text"], "thinking more");
    }

    #[test]
    fn test_delta_appends_to_existing_text() {
        let mut payload = json!({"parts": [{"type": "text", "id": "p1", "text": "hel"}]});
        upsert_part(
            &mut payload,
            json!({"type": "text", "id": "p1"}),
            Some("lo"),
        );
        assert_eq!(payload["parts"][0]["text"], "hello");
    }

    #[test]
    fn test_distinct_parts_accumulate_in_order() {
        let mut payload = json!({});
        upsert_part(&mut payload, json!({"type": "step-start", "id": "s1"}), None);
        upsert_part(
            &mut payload,
            json!({"type": "tool", "id": "t1", "tool": "bash"}),
            None,
        );
        upsert_part(&mut payload, json!({"type": "text", "id": "x1", "text": "done"}), None);

        let kinds: Vec<&str> = payload["parts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["step-start", "tool", "text"]);
    }

    #[test]
    fn test_append_text_creates_part_when_missing() {
        let mut payload = json!({"role": "assistant"});
        append_text(&mut payload, "hi");
        append_text(&mut payload, " there");
        assert_eq!(payload["parts"][0]["text"], "hi there");
    }

    #[test]
    fn test_merge_info_preserves_parts() {
        let mut payload = json!({"parts": [{"type": "text", "text": "x"}]});
        let info: MessageInfo = serde_json::from_value(json!({
            "id": "m1",
            "role": "assistant",
            "model": "claude-sonnet-4",
            "finishReason": "stop"
        }))
        .unwrap();
        merge_info(&mut payload, &info);

        assert_eq!(payload["id"], "m1");
        assert_eq!(payload["model"], "claude-sonnet-4");
        assert_eq!(payload["finishReason"], "stop");
        assert_eq!(payload["parts"][0]["text"], "x");
    }
}

//! Artifact extraction from transcripts.
//!
//! Stage artifacts are fenced JSON blocks in assistant messages. A block
//! qualifies when its info string is `json` (case-insensitive) or absent
//! and its contents parse as a JSON object carrying the stage's
//! discriminator field. The last qualifying block wins; everything else is
//! ignored silently, so extraction is idempotent and safe to re-run. The
//! whole pass is a pure function of the transcript.

use serde_json::Value;

use squadron_protocol::Role;

use crate::session::TranscriptEntry;

use super::models::{AiReview, BuildResult, IssuePlan};

/// Extract the plan-stage artifact (requires an `issues` array).
pub fn extract_issue_plan(entries: &[TranscriptEntry]) -> Option<IssuePlan> {
    last_qualifying(entries, |value| {
        value.get("issues")?.as_array()?;
        serde_json::from_value(value.clone()).ok()
    })
}

/// Extract the build-stage artifact (requires a `pr_url` string).
pub fn extract_build_result(entries: &[TranscriptEntry]) -> Option<BuildResult> {
    last_qualifying(entries, |value| {
        value.get("pr_url")?.as_str()?;
        serde_json::from_value(value.clone()).ok()
    })
}

/// Extract the review-stage artifact (requires a valid `recommendation`).
pub fn extract_ai_review(entries: &[TranscriptEntry]) -> Option<AiReview> {
    last_qualifying(entries, |value| {
        value.get("recommendation")?;
        serde_json::from_value(value.clone()).ok()
    })
}

fn last_qualifying<T>(
    entries: &[TranscriptEntry],
    qualify: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    let mut winner = None;
    for entry in entries {
        if entry.role != Role::Assistant {
            continue;
        }
        for block in fenced_blocks(&assistant_text(entry)) {
            if let Some(object) = parse_json_object(&block) {
                if let Some(artifact) = qualify(&object) {
                    winner = Some(artifact);
                }
            }
        }
    }
    winner
}

/// Concatenated text parts of an entry, in part order.
fn assistant_text(entry: &TranscriptEntry) -> String {
    entry
        .payload
        .get("parts")
        .and_then(|v| v.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

/// The contents of qualifying triple-backtick fences: info string `json`
/// (any case) or empty.
fn fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<(bool, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("```") {
            match current.take() {
                Some((qualifies, lines)) => {
                    if qualifies {
                        blocks.push(lines.join("\n"));
                    }
                }
                None => {
                    let info = rest.trim();
                    let qualifies = info.is_empty() || info.eq_ignore_ascii_case("json");
                    current = Some((qualifies, Vec::new()));
                }
            }
        } else if let Some((_, ref mut lines)) = current {
            lines.push(line);
        }
    }

    blocks
}

fn parse_json_object(block: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(block.trim()).ok()?;
    value.is_object().then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::ReviewRecommendation;
    use serde_json::json;

    fn entry(role: Role, text: &str) -> TranscriptEntry {
        TranscriptEntry {
            id: "e".to_string(),
            session_id: "s".to_string(),
            sequence: 0,
            role,
            backend_message_id: None,
            payload: json!({"parts": [{"type": "text", "text": text}]}),
            created_at: String::new(),
        }
    }

    #[test]
    fn test_happy_plan_extraction() {
        let text = r#"Here is the plan.

```json
{"issues":[{"title":"RL middleware","body_md":"...","labels":["squads"],"dependencies":[]}],"repo":"acme/app","prd_path":".squads/prds/c1.md","questions":[]}
```
"#;
        let entries = vec![entry(Role::Assistant, text)];
        let plan = extract_issue_plan(&entries).unwrap();
        assert_eq!(plan.issues.len(), 1);
        assert_eq!(plan.issues[0].title, "RL middleware");
        assert_eq!(plan.repo.as_deref(), Some("acme/app"));
    }

    #[test]
    fn test_extraction_ignores_prose_and_unqualified_blocks() {
        let text = r#"First attempt:

```json
{"foo": 1}
```

Final verdict:

```json
{"recommendation":"approve","risk":"low","summary":"ok","findings":[]}
```
"#;
        let entries = vec![entry(Role::Assistant, text)];
        let review = extract_ai_review(&entries).unwrap();
        assert_eq!(review.recommendation, ReviewRecommendation::Approve);
        assert_eq!(review.risk.as_deref(), Some("low"));
    }

    #[test]
    fn test_last_qualifying_block_wins() {
        let text = r#"```json
{"pr_url": "https://github.com/acme/app/pull/1"}
```

Correction:

```
{"pr_url": "https://github.com/acme/app/pull/2"}
```
"#;
        let entries = vec![entry(Role::Assistant, text)];
        let result = extract_build_result(&entries).unwrap();
        assert_eq!(result.pr_url, "https://github.com/acme/app/pull/2");
    }

    #[test]
    fn test_non_json_fences_and_user_entries_ignored() {
        let rust_fence = entry(
            Role::Assistant,
            "```rust\n{\"pr_url\": \"https://nope\"}\n```",
        );
        let user_block = entry(
            Role::User,
            "```json\n{\"pr_url\": \"https://also-nope\"}\n```",
        );
        assert!(extract_build_result(&[rust_fence, user_block]).is_none());
    }

    #[test]
    fn test_unparsable_block_skipped_silently() {
        let text = "```json\n{not json at all\n```\n```json\n{\"issues\": []}\n```";
        let entries = vec![entry(Role::Assistant, text)];
        let plan = extract_issue_plan(&entries).unwrap();
        assert!(plan.issues.is_empty());
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let text = "```json\n{\"issues\": [{\"title\": \"t\"}]}\n```";
        let entries = vec![entry(Role::Assistant, text)];
        let first = extract_issue_plan(&entries).unwrap();
        let second = extract_issue_plan(&entries).unwrap();
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }
}

//! Deterministic prompt classification.
//!
//! Pure function over the inbound chat request — no I/O, no shared state.
//! The same input always yields the same tag set, which the router (and the
//! dedup fingerprint) both rely on.

use std::collections::HashSet;

use serde_json::Value;

use crate::catalog::Capability;

const LONG_CONTEXT_THRESHOLD_BYTES: usize = 32 * 1024;

const REASONING_CUES: &[&str] = &[
    "prove", "proof", "step by step", "step-by-step", "derive", "derivation",
    "reason through", "explain why", "theorem", "lemma",
];

const CODE_MARKERS: &[&str] = &["```", "def ", "function ", "class ", "impl ", "fn ", "#include", "import "];

/// Classify one chat-completions request body into a capability tag set.
///
/// `general` is always present unless a more specific tag fires, matching the
/// "first match wins, except long-context" rule: vision/code/reasoning are
/// mutually exclusive with each other and with `general`, but `long-context`
/// layers on top of whichever of those fired.
pub fn classify(body: &Value) -> HashSet<Capability> {
    let mut tags = HashSet::new();

    let messages = body.get("messages").and_then(Value::as_array);
    let has_non_text_part = messages
        .map(|msgs| msgs.iter().any(message_has_non_text_part))
        .unwrap_or(false);

    let text = messages
        .map(|msgs| {
            msgs.iter()
                .filter_map(extract_text)
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    let lower = text.to_lowercase();

    if has_non_text_part {
        tags.insert(Capability::Vision);
    } else if CODE_MARKERS.iter().any(|m| text.contains(m)) {
        tags.insert(Capability::Code);
    } else if REASONING_CUES.iter().any(|c| lower.contains(c)) {
        tags.insert(Capability::Reasoning);
    } else {
        tags.insert(Capability::General);
    }

    if text.len() > LONG_CONTEXT_THRESHOLD_BYTES {
        tags.insert(Capability::LongContext);
    }

    tags
}

fn message_has_non_text_part(msg: &Value) -> bool {
    match msg.get("content") {
        Some(Value::Array(parts)) => parts.iter().any(|p| {
            p.get("type")
                .and_then(Value::as_str)
                .map(|t| t != "text")
                .unwrap_or(false)
        }),
        _ => false,
    }
}

fn extract_text(msg: &Value) -> Option<String> {
    match msg.get("content") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(parts)) => {
            let joined: String = parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n");
            Some(joined)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_greeting_is_general() {
        let body = json!({ "messages": [{ "role": "user", "content": "Hello there" }] });
        let tags = classify(&body);
        assert!(tags.contains(&Capability::General));
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn proof_request_is_reasoning() {
        let body = json!({ "messages": [{ "role": "user", "content": "Prove sqrt(2) is irrational" }] });
        let tags = classify(&body);
        assert!(tags.contains(&Capability::Reasoning));
    }

    #[test]
    fn fenced_code_block_is_code() {
        let body = json!({ "messages": [{ "role": "user", "content": "fix this:\n```rust\nfn main() {}\n```" }] });
        let tags = classify(&body);
        assert!(tags.contains(&Capability::Code));
    }

    #[test]
    fn image_part_is_vision() {
        let body = json!({
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": "what is this?" },
                    { "type": "image_url", "image_url": { "url": "data:image/png;base64,AAA" } }
                ]
            }]
        });
        let tags = classify(&body);
        assert!(tags.contains(&Capability::Vision));
    }

    #[test]
    fn long_prompt_adds_long_context_alongside_other_tag() {
        let long_text = "a".repeat(40_000);
        let body = json!({ "messages": [{ "role": "user", "content": long_text }] });
        let tags = classify(&body);
        assert!(tags.contains(&Capability::LongContext));
        assert!(tags.contains(&Capability::General));
    }

    #[test]
    fn classification_is_deterministic() {
        let body = json!({ "messages": [{ "role": "user", "content": "Prove the halting problem" }] });
        assert_eq!(classify(&body), classify(&body));
    }
}

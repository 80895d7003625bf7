//! Message Extraction: display text, thinking text and tool cards.
//!
//! All extractors are total over [`Message`]: missing or malformed content
//! yields `None` / an empty list. [`ExtractionCache`] memoizes the combined
//! result per message identity; the caller owns its lifetime.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::model::{ContentBlock, Message};
use crate::role::{RoleClass, normalize_role_for_grouping};

static THINK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<\s*think(?:ing)?\s*>(.*?)(?:<\s*/\s*think(?:ing)?\s*>|$)")
        .expect("valid think-tag regex")
});

fn is_assistant(message: &Message) -> bool {
    normalize_role_for_grouping(&message.role) == RoleClass::Assistant
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn raw_text_parts(message: &Message) -> Vec<String> {
    message
        .content
        .blocks()
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        })
        .collect()
}

/// Concatenated text blocks, trimmed. Inline think tags are stripped from
/// assistant output.
pub fn extract_text(message: &Message) -> Option<String> {
    let joined = raw_text_parts(message).join("\n");
    let text = if is_assistant(message) {
        THINK_TAG.replace_all(&joined, "").into_owned()
    } else {
        joined
    };
    non_empty(text)
}

/// Thinking blocks plus any inline `<think>` sections of assistant text.
pub fn extract_thinking(message: &Message) -> Option<String> {
    let mut parts: Vec<String> = message
        .content
        .blocks()
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Thinking { thinking } => non_empty(thinking),
            _ => None,
        })
        .collect();
    if is_assistant(message) {
        for text in raw_text_parts(message) {
            parts.extend(
                THINK_TAG
                    .captures_iter(&text)
                    .filter_map(|cap| cap.get(1))
                    .filter_map(|m| non_empty(m.as_str().to_string())),
            );
        }
    }
    non_empty(parts.join("\n\n"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCardKind {
    Call,
    Result,
}

impl ToolCardKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Result => "result",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCard {
    pub kind: ToolCardKind,
    pub name: String,
    pub tool_call_id: Option<String>,
    pub arguments: Option<String>,
    pub result: Option<String>,
    pub is_error: bool,
}

pub fn extract_tool_cards(message: &Message) -> Vec<ToolCard> {
    let mut cards = Vec::new();
    for block in message.content.blocks() {
        match block {
            ContentBlock::ToolCall {
                id,
                name,
                arguments,
            } => {
                let arguments = match arguments {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => non_empty(s),
                    other => serde_json::to_string_pretty(&other).ok(),
                };
                cards.push(ToolCard {
                    kind: ToolCardKind::Call,
                    name,
                    tool_call_id: id,
                    arguments,
                    result: None,
                    is_error: false,
                });
            }
            ContentBlock::ToolResult {
                tool_call_id,
                name,
                content,
                is_error,
            } => cards.push(ToolCard {
                kind: ToolCardKind::Result,
                name: name
                    .or_else(|| message.tool_name.clone())
                    .unwrap_or_else(|| "tool".to_string()),
                tool_call_id: tool_call_id.or_else(|| message.tool_call_id.clone()),
                arguments: None,
                result: non_empty(content),
                is_error,
            }),
            _ => {}
        }
    }
    if cards.is_empty() && normalize_role_for_grouping(&message.role) == RoleClass::Tool {
        cards.push(ToolCard {
            kind: ToolCardKind::Result,
            name: message
                .tool_name
                .clone()
                .unwrap_or_else(|| "tool".to_string()),
            tool_call_id: message.tool_call_id.clone(),
            arguments: None,
            result: non_empty(raw_text_parts(message).join("\n")),
            is_error: message.is_errored(),
        });
    }
    cards
}

/// Tool output, either by role or by carrying a tool-result block.
pub fn is_tool_result_message(message: &Message) -> bool {
    normalize_role_for_grouping(&message.role) == RoleClass::Tool
        || message
            .content
            .blocks()
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolResult { .. }))
}

// ── Cache ───────────────────────────────────────────────────────────

/// Stable identity of a transcript entry: its id when present, else a hash
/// of role, timestamp and content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageIdentity {
    Id(String),
    Hash(String),
}

impl MessageIdentity {
    pub fn of(message: &Message) -> Self {
        if let Some(id) = message.id.as_deref().filter(|id| !id.is_empty()) {
            return Self::Id(id.to_string());
        }
        let mut hasher = Sha256::new();
        hasher.update(message.role.as_bytes());
        hasher.update(message.timestamp.to_le_bytes());
        hasher.update(serde_json::to_vec(&message.content).unwrap_or_default());
        let digest = hasher.finalize();
        Self::Hash(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMessage {
    pub text: Option<String>,
    pub thinking: Option<String>,
    pub tool_cards: Vec<ToolCard>,
}

impl ExtractedMessage {
    pub fn from_message(message: &Message) -> Self {
        Self {
            text: extract_text(message),
            thinking: extract_thinking(message),
            tool_cards: extract_tool_cards(message),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    extracted: Arc<ExtractedMessage>,
    generation: u64,
}

/// Extraction results keyed by [`MessageIdentity`].
///
/// Each `get` stamps its entry with the current generation; `sweep` drops
/// entries nobody read since the previous sweep. A render pass is one
/// `get` per visible message followed by one `sweep`, so identities are
/// computed once per message per pass.
#[derive(Debug, Default)]
pub struct ExtractionCache {
    entries: HashMap<MessageIdentity, CacheEntry>,
    generation: u64,
    hits: u64,
    misses: u64,
}

impl ExtractionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, message: &Message) -> Arc<ExtractedMessage> {
        let identity = MessageIdentity::of(message);
        let generation = self.generation;
        if let Some(hit) = self.entries.get_mut(&identity) {
            hit.generation = generation;
            self.hits += 1;
            return Arc::clone(&hit.extracted);
        }
        self.misses += 1;
        let extracted = Arc::new(ExtractedMessage::from_message(message));
        self.entries.insert(
            identity,
            CacheEntry {
                extracted: Arc::clone(&extracted),
                generation,
            },
        );
        extracted
    }

    /// Drop entries not read since the previous sweep and start a new
    /// generation.
    pub fn sweep(&mut self) {
        let current = self.generation;
        self.entries.retain(|_, entry| entry.generation == current);
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageContent;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Message {
        Message::from_value(&value).expect("object")
    }

    #[test]
    fn test_text_joins_blocks_and_trims() {
        let msg = parse(json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "  first "},
                {"type": "image", "data": "AAA"},
                {"type": "text", "text": "second  "}
            ]
        }));
        assert_eq!(extract_text(&msg).as_deref(), Some("first \nsecond"));
    }

    #[test]
    fn test_legacy_and_empty_content() {
        let legacy = parse(json!({"role": "assistant", "content": " hi "}));
        assert_eq!(extract_text(&legacy).as_deref(), Some("hi"));
        let empty = parse(json!({"role": "assistant"}));
        assert_eq!(extract_text(&empty), None);
        assert_eq!(extract_thinking(&empty), None);
        assert!(extract_tool_cards(&empty).is_empty());
    }

    #[test]
    fn test_thinking_blocks_and_tags() {
        let msg = parse(json!({
            "role": "assistant",
            "content": [
                {"type": "thinking", "thinking": "plan"},
                {"type": "text", "text": "<think>inner</think>answer"}
            ]
        }));
        assert_eq!(extract_text(&msg).as_deref(), Some("answer"));
        assert_eq!(extract_thinking(&msg).as_deref(), Some("plan\n\ninner"));

        let user = parse(json!({"role": "user", "content": "<think>literal</think>"}));
        assert_eq!(extract_text(&user).as_deref(), Some("<think>literal</think>"));
        assert_eq!(extract_thinking(&user), None);
    }

    #[test]
    fn test_tool_cards() {
        let msg = parse(json!({
            "role": "assistant",
            "content": [
                {"type": "toolCall", "id": "c1", "name": "exec", "arguments": {"cmd": "ls"}},
                {"type": "tool_result", "toolCallId": "c1", "content": "boom", "isError": true}
            ]
        }));
        let cards = extract_tool_cards(&msg);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].kind, ToolCardKind::Call);
        assert!(cards[0].arguments.as_deref().unwrap_or("").contains("\"cmd\""));
        assert_eq!(cards[1].kind.label(), "result");
        assert!(cards[1].is_error);
        assert_eq!(cards[1].result.as_deref(), Some("boom"));
    }

    #[test]
    fn test_tool_role_without_blocks() {
        let msg = parse(json!({
            "role": "toolResult",
            "toolName": "read",
            "content": "file body"
        }));
        assert!(is_tool_result_message(&msg));
        let cards = extract_tool_cards(&msg);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].name, "read");
        assert_eq!(cards[0].result.as_deref(), Some("file body"));
    }

    #[test]
    fn test_cache_hits_by_identity() {
        let mut cache = ExtractionCache::new();
        let a = Message {
            id: Some("m1".into()),
            ..Message::assistant_text("hello", 1)
        };
        let b = Message::assistant_text("world", 2);
        cache.get(&a);
        cache.get(&a);
        cache.get(&b);
        assert_eq!(cache.stats(), (1, 2));
        assert_eq!(cache.len(), 2);

        cache.sweep();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&b).text.as_deref(), Some("world"));
        cache.sweep();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats(), (2, 2));
    }

    #[test]
    fn test_hash_identity_tracks_content() {
        let a = Message::assistant_text("x", 1);
        let mut b = a.clone();
        assert_eq!(MessageIdentity::of(&a), MessageIdentity::of(&b));
        b.content = MessageContent::Text("y".into());
        assert_ne!(MessageIdentity::of(&a), MessageIdentity::of(&b));
    }
}

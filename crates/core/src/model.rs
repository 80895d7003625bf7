//! Transcript model: messages, content blocks and markers.
//!
//! Gateway history arrives as loosely shaped JSON. Everything here is parsed
//! through total functions: odd fields are defaulted, unknown block kinds are
//! kept as [`ContentBlock::Unknown`], nothing panics or errors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ── Content blocks ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        id: Option<String>,
        name: String,
        arguments: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: Option<String>,
        name: Option<String>,
        content: String,
        is_error: bool,
    },
    #[serde(rename_all = "camelCase")]
    Image {
        mime_type: String,
        data: String,
    },
    Unknown,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Parse one block of unknown shape. Bare strings become text blocks.
    pub fn from_value(value: &Value) -> Self {
        let obj = match value {
            Value::String(s) => return Self::text(s.clone()),
            Value::Object(obj) => obj,
            _ => return Self::Unknown,
        };
        let kind = str_field(obj, &["type"])
            .map(|t| normalize_tag(&t))
            .unwrap_or_default();
        match kind.as_str() {
            "text" | "inputtext" | "outputtext" => Self::Text {
                text: str_field(obj, &["text"]).unwrap_or_default(),
            },
            "thinking" | "reasoning" => Self::Thinking {
                thinking: str_field(obj, &["thinking", "text"]).unwrap_or_default(),
            },
            "toolcall" | "tooluse" | "functioncall" => Self::ToolCall {
                id: str_field(obj, &["id", "toolCallId", "tool_call_id"]),
                name: str_field(obj, &["name"]).unwrap_or_else(|| "tool".to_string()),
                arguments: obj
                    .get("arguments")
                    .or_else(|| obj.get("input"))
                    .or_else(|| obj.get("args"))
                    .cloned()
                    .unwrap_or(Value::Null),
            },
            "toolresult" | "functionresult" => Self::ToolResult {
                tool_call_id: str_field(obj, &["toolCallId", "tool_call_id", "tool_use_id"]),
                name: str_field(obj, &["name", "toolName"]),
                content: obj.get("content").map(flatten_text).unwrap_or_default(),
                is_error: bool_field(obj, &["isError", "is_error"]),
            },
            "image" => {
                let source = obj.get("source").and_then(Value::as_object);
                Self::Image {
                    mime_type: str_field(obj, &["mimeType", "media_type", "mime_type"])
                        .or_else(|| source.and_then(|s| str_field(s, &["media_type"])))
                        .unwrap_or_else(|| "image/png".to_string()),
                    data: str_field(obj, &["data", "content"])
                        .or_else(|| source.and_then(|s| str_field(s, &["data"])))
                        .unwrap_or_default(),
                }
            }
            _ => Self::Unknown,
        }
    }

    /// Whether the block carries anything worth rendering.
    pub fn has_content(&self) -> bool {
        match self {
            Self::Text { text } => !text.trim().is_empty(),
            Self::Thinking { thinking } => !thinking.trim().is_empty(),
            Self::ToolCall { .. } | Self::ToolResult { .. } => true,
            Self::Image { data, .. } => !data.is_empty(),
            Self::Unknown => false,
        }
    }
}

/// Message content: legacy bare strings or an ordered block list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

impl MessageContent {
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(s)) => Self::Text(s.clone()),
            Some(Value::Array(items)) => {
                Self::Blocks(items.iter().map(ContentBlock::from_value).collect())
            }
            Some(v @ Value::Object(_)) => Self::Blocks(vec![ContentBlock::from_value(v)]),
            _ => Self::default(),
        }
    }

    pub fn has_content(&self) -> bool {
        match self {
            Self::Text(s) => !s.trim().is_empty(),
            Self::Blocks(blocks) => blocks.iter().any(ContentBlock::has_content),
        }
    }

    /// Block view of the content; a legacy string is a single text block.
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match self {
            Self::Text(s) => vec![ContentBlock::text(s.clone())],
            Self::Blocks(blocks) => blocks.clone(),
        }
    }

    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            Self::Text(s) => vec![ContentBlock::Text { text: s }],
            Self::Blocks(blocks) => blocks,
        }
    }
}

// ── Markers ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Compaction,
    Other,
}

/// Out-of-band tag attached to a transcript entry by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMarker {
    pub kind: MarkerKind,
    pub id: String,
}

impl TranscriptMarker {
    pub fn compaction(id: impl Into<String>) -> Self {
        Self {
            kind: MarkerKind::Compaction,
            id: id.into(),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let kind = match str_field(obj, &["kind", "type"])?.to_ascii_lowercase().as_str() {
            "compaction" => MarkerKind::Compaction,
            _ => MarkerKind::Other,
        };
        let id = str_field(obj, &["id"])?;
        Some(Self { kind, id })
    }

    pub fn is_compaction(&self) -> bool {
        self.kind == MarkerKind::Compaction
    }
}

// ── Message ─────────────────────────────────────────────────────────

/// A single transcript entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: String,
    pub content: MessageContent,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<TranscriptMarker>,
}

impl Message {
    pub fn new(role: impl Into<String>, blocks: Vec<ContentBlock>, timestamp: i64) -> Self {
        Self {
            role: role.into(),
            content: MessageContent::Blocks(blocks),
            timestamp,
            ..Self::default()
        }
    }

    pub fn assistant_text(text: impl Into<String>, timestamp: i64) -> Self {
        Self::new("assistant", vec![ContentBlock::text(text)], timestamp)
    }

    pub fn system_text(text: impl Into<String>, timestamp: i64) -> Self {
        Self::new("system", vec![ContentBlock::text(text)], timestamp)
    }

    /// Parse a transcript entry of unknown shape. Returns `None` only when the
    /// value is not an object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let content = if obj.contains_key("content") {
            MessageContent::from_value(obj.get("content"))
        } else {
            str_field(obj, &["text"])
                .map(MessageContent::Text)
                .unwrap_or_default()
        };
        Some(Self {
            role: str_field(obj, &["role"]).unwrap_or_default(),
            content,
            timestamp: obj.get("timestamp").map(parse_timestamp).unwrap_or(0),
            id: str_field(obj, &["id"]),
            tool_call_id: str_field(obj, &["toolCallId", "tool_call_id"]),
            tool_name: str_field(obj, &["toolName", "tool_name", "name"]),
            stop_reason: str_field(obj, &["stopReason", "stop_reason"]),
            error_message: str_field(obj, &["errorMessage", "error_message"]),
            marker: obj
                .get("marker")
                .or_else(|| obj.get("__marker"))
                .and_then(TranscriptMarker::from_value),
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn is_errored(&self) -> bool {
        self.stop_reason.as_deref() == Some("error") || self.error_message.is_some()
    }

    pub fn compaction_marker(&self) -> Option<&TranscriptMarker> {
        self.marker.as_ref().filter(|m| m.is_compaction())
    }
}

// ── Queue ───────────────────────────────────────────────────────────

/// A composed message deferred while a run is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: String,
    pub text: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<crate::attachment::ChatAttachment>,
    /// Refresh the session list once the run started by this entry ends.
    #[serde(default)]
    pub refresh_sessions: bool,
}

impl QueuedMessage {
    pub fn new(text: impl Into<String>, attachments: Vec<crate::attachment::ChatAttachment>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            text: text.into(),
            created_at: now_ms(),
            attachments,
            refresh_sessions: false,
        }
    }
}

// ── Field helpers ───────────────────────────────────────────────────

fn normalize_tag(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

pub(crate) fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn bool_field(obj: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_bool))
        .unwrap_or(false)
}

/// Tool-result payloads may be a string or a list of text blocks.
fn flatten_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match ContentBlock::from_value(item) {
                ContentBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_timestamp(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis())
            .or_else(|_| s.parse::<i64>())
            .unwrap_or(0),
        _ => 0,
    }
}

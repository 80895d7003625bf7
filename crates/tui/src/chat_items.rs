//! Chat Item Builder: transcript + live stream to ordered render items.
//!
//! Keys are derived only from message identity and position in the full
//! history, so rebuilding with unchanged inputs yields identical keys and a
//! group keeps its key while messages are appended after it.

use gwchat_core::{Message, RoleClass, is_tool_result_message, normalize_role_for_grouping};
use gwchat_session::ChatSessionState;

pub const CHAT_HISTORY_RENDER_LIMIT: usize = 200;
pub const HISTORY_NOTICE_KEY: &str = "chat:history:notice";
pub const COMPACTION_LABEL: &str = "Compaction";

#[derive(Debug, Clone, PartialEq)]
pub struct GroupedMessage {
    pub key: String,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageGroup {
    pub key: String,
    pub role: RoleClass,
    pub messages: Vec<GroupedMessage>,
    /// Timestamp of the last member.
    pub timestamp: i64,
    pub is_streaming: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatItem {
    Group(MessageGroup),
    Divider {
        key: String,
        label: String,
        timestamp: i64,
    },
    Stream {
        key: String,
        text: String,
        started_at: Option<i64>,
    },
    ReadingIndicator {
        key: String,
    },
}

impl ChatItem {
    pub fn key(&self) -> &str {
        match self {
            Self::Group(group) => &group.key,
            Self::Divider { key, .. } | Self::Stream { key, .. } | Self::ReadingIndicator { key } => {
                key
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Group(_) => "group",
            Self::Divider { .. } => "divider",
            Self::Stream { .. } => "stream",
            Self::ReadingIndicator { .. } => "reading-indicator",
        }
    }

    pub fn as_group(&self) -> Option<&MessageGroup> {
        match self {
            Self::Group(group) => Some(group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChatItemsInput<'a> {
    pub session_key: &'a str,
    pub messages: &'a [Message],
    pub tool_messages: &'a [Message],
    pub show_thinking: bool,
    /// `None`: no run; `Some("")`: run started, no text yet.
    pub stream: Option<&'a str>,
    pub stream_started_at: Option<i64>,
}

impl<'a> ChatItemsInput<'a> {
    pub fn from_state(state: &'a ChatSessionState, show_thinking: bool) -> Self {
        Self {
            session_key: &state.session_key,
            messages: &state.messages,
            tool_messages: &state.tool_messages,
            show_thinking,
            stream: state.stream.as_deref(),
            stream_started_at: state.stream_started_at,
        }
    }
}

fn history_message_key(message: &Message, index: usize) -> String {
    if let Some(id) = message.tool_call_id.as_deref().filter(|id| !id.is_empty()) {
        return format!("tool:{}", id);
    }
    if let Some(id) = message.id.as_deref().filter(|id| !id.is_empty()) {
        return format!("msg:{}", id);
    }
    format!(
        "msg:{}:{}:{}",
        normalize_role_for_grouping(&message.role),
        message.timestamp,
        index
    )
}

fn live_tool_key(message: &Message, index: usize) -> String {
    if let Some(id) = message.tool_call_id.as_deref().filter(|id| !id.is_empty()) {
        return format!("tool:{}", id);
    }
    if let Some(id) = message.id.as_deref().filter(|id| !id.is_empty()) {
        return format!("msg:{}", id);
    }
    format!("tool:live:{}:{}", message.timestamp, index)
}

/// Stable merge by timestamp; history wins ties.
fn merge_by_timestamp<'a>(
    history: Vec<(String, &'a Message)>,
    mut tools: Vec<(String, &'a Message)>,
) -> Vec<(String, &'a Message)> {
    tools.sort_by_key(|(_, m)| m.timestamp);
    let mut merged = Vec::with_capacity(history.len() + tools.len());
    let mut tools = tools.into_iter().peekable();
    for entry in history {
        while let Some((_, tool)) = tools.peek() {
            if tool.timestamp < entry.1.timestamp {
                merged.extend(tools.next());
            } else {
                break;
            }
        }
        merged.push(entry);
    }
    merged.extend(tools);
    merged
}

fn new_group(key: String, role: RoleClass, message: &Message) -> MessageGroup {
    MessageGroup {
        key: format!("group:{}:{}", role, key),
        role,
        timestamp: message.timestamp,
        messages: vec![GroupedMessage {
            key,
            message: message.clone(),
        }],
        is_streaming: false,
    }
}

pub fn build_chat_items(input: &ChatItemsInput<'_>) -> Vec<ChatItem> {
    let mut items = Vec::new();
    let total = input.messages.len();
    let start = total.saturating_sub(CHAT_HISTORY_RENDER_LIMIT);

    if start > 0 {
        let notice = Message::system_text(
            format!(
                "Showing last {} messages ({} hidden).",
                CHAT_HISTORY_RENDER_LIMIT, start
            ),
            input.messages[start].timestamp,
        );
        items.push(ChatItem::Group(new_group(
            HISTORY_NOTICE_KEY.to_string(),
            RoleClass::System,
            &notice,
        )));
    }

    let history: Vec<(String, &Message)> = input.messages[start..]
        .iter()
        .enumerate()
        .map(|(offset, m)| (history_message_key(m, start + offset), m))
        .collect();

    let visible = if input.show_thinking {
        let tools = input
            .tool_messages
            .iter()
            .enumerate()
            .map(|(i, m)| (live_tool_key(m, i), m))
            .collect();
        merge_by_timestamp(history, tools)
    } else {
        history
            .into_iter()
            .filter(|(_, m)| !is_tool_result_message(m))
            .collect()
    };

    let mut current: Option<MessageGroup> = None;
    for (key, message) in visible {
        if let Some(marker) = message.compaction_marker() {
            items.extend(current.take().map(ChatItem::Group));
            items.push(ChatItem::Divider {
                key: format!("divider:compaction:{}", marker.id),
                label: COMPACTION_LABEL.to_string(),
                timestamp: message.timestamp,
            });
            continue;
        }
        let role = normalize_role_for_grouping(&message.role);
        match current.as_mut() {
            Some(group) if group.role == role => {
                group.timestamp = message.timestamp;
                group.messages.push(GroupedMessage {
                    key,
                    message: message.clone(),
                });
            }
            _ => {
                items.extend(current.take().map(ChatItem::Group));
                current = Some(new_group(key, role, message));
            }
        }
    }
    items.extend(current.map(ChatItem::Group));

    if let Some(stream) = input.stream {
        if let Some(ChatItem::Group(last)) = items.last_mut()
            && last.role == RoleClass::Assistant
        {
            last.is_streaming = true;
        }
        let started = input
            .stream_started_at
            .map(|t| t.to_string())
            .unwrap_or_else(|| "live".to_string());
        let key = format!("stream:{}:{}", input.session_key, started);
        if stream.trim().is_empty() {
            items.push(ChatItem::ReadingIndicator { key });
        } else {
            items.push(ChatItem::Stream {
                key,
                text: stream.to_string(),
                started_at: input.stream_started_at,
            });
        }
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwchat_core::{ContentBlock, TranscriptMarker, extract_text};

    fn msg(role: &str, text: &str, ts: i64) -> Message {
        Message::new(role, vec![ContentBlock::text(text)], ts)
    }

    fn input<'a>(messages: &'a [Message]) -> ChatItemsInput<'a> {
        ChatItemsInput {
            session_key: "main",
            messages,
            tool_messages: &[],
            show_thinking: false,
            stream: None,
            stream_started_at: None,
        }
    }

    fn tool_result(ts: i64) -> Message {
        Message {
            tool_call_id: Some(format!("call-{ts}")),
            ..msg("toolResult", "output", ts)
        }
    }

    #[test]
    fn test_truncation_notice_is_first() {
        let messages: Vec<Message> = (0..205).map(|i| msg("user", "hi", i)).collect();
        let items = build_chat_items(&input(&messages));
        let notice = items[0].as_group().expect("group");
        assert_eq!(notice.role, RoleClass::System);
        assert_eq!(notice.messages.len(), 1);
        assert_eq!(
            extract_text(&notice.messages[0].message).as_deref(),
            Some("Showing last 200 messages (5 hidden).")
        );
        let rest = items[1].as_group().expect("group");
        assert_eq!(rest.messages.len(), 200);
        assert_eq!(rest.messages[0].key, "msg:user:5:5");
    }

    #[test]
    fn test_truncation_boundary() {
        let exact: Vec<Message> = (0..200).map(|i| msg("user", "hi", i)).collect();
        let items = build_chat_items(&input(&exact));
        assert_eq!(items.len(), 1);
        let group = items[0].as_group().expect("group");
        assert_eq!(group.role, RoleClass::User);
        assert_eq!(group.messages.len(), 200);

        let over: Vec<Message> = (0..201).map(|i| msg("user", "hi", i)).collect();
        let items = build_chat_items(&input(&over));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key(), format!("group:system:{}", HISTORY_NOTICE_KEY));
        let notice = items[0].as_group().expect("group");
        assert_eq!(
            extract_text(&notice.messages[0].message).as_deref(),
            Some("Showing last 200 messages (1 hidden).")
        );
        assert_eq!(items[1].as_group().expect("group").messages.len(), 200);
    }

    #[test]
    fn test_compaction_divider() {
        let marker = Message {
            marker: Some(TranscriptMarker::compaction("abc123")),
            ..msg("system", "compacted", 2)
        };
        let messages = vec![msg("user", "a", 1), marker, msg("user", "b", 3)];
        let items = build_chat_items(&input(&messages));
        assert_eq!(items.len(), 3);
        assert_eq!(items[1].key(), "divider:compaction:abc123");
        assert!(matches!(&items[1], ChatItem::Divider { label, .. } if label == "Compaction"));
        assert_eq!(items[0].kind(), "group");
        assert_eq!(items[2].kind(), "group");
    }

    #[test]
    fn test_consecutive_roles_coalesce() {
        let messages = vec![
            msg("user", "a", 1),
            msg("USER", "b", 2),
            msg("assistant", "c", 3),
            msg("user", "d", 4),
        ];
        let items = build_chat_items(&input(&messages));
        assert_eq!(items.len(), 3);
        let first = items[0].as_group().expect("group");
        assert_eq!(first.messages.len(), 2);
        assert_eq!(first.timestamp, 2);
        assert_eq!(first.key, "group:user:msg:user:1:0");
    }

    #[test]
    fn test_tool_results_hidden_without_thinking() {
        let messages = vec![msg("assistant", "a", 1), tool_result(2), msg("assistant", "b", 3)];
        let items = build_chat_items(&input(&messages));
        assert_eq!(items.len(), 1);
        let group = items[0].as_group().expect("group");
        assert!(group.messages.iter().all(|m| !is_tool_result_message(&m.message)));
    }

    #[test]
    fn test_tool_messages_merged_with_thinking() {
        let messages = vec![msg("user", "go", 1), msg("assistant", "done", 5)];
        let tools = vec![tool_result(3)];
        let items = build_chat_items(&ChatItemsInput {
            tool_messages: &tools,
            show_thinking: true,
            ..input(&messages)
        });
        let kinds: Vec<_> = items
            .iter()
            .filter_map(ChatItem::as_group)
            .map(|g| g.role)
            .collect();
        assert_eq!(
            kinds,
            vec![RoleClass::User, RoleClass::Tool, RoleClass::Assistant]
        );
        assert_eq!(items[1].key(), "group:tool:tool:call-3");
    }

    #[test]
    fn test_reading_indicator_and_stream_keys() {
        let messages = vec![msg("user", "q", 1)];
        let waiting = build_chat_items(&ChatItemsInput {
            stream: Some(""),
            stream_started_at: Some(42),
            ..input(&messages)
        });
        assert_eq!(
            waiting.last(),
            Some(&ChatItem::ReadingIndicator {
                key: "stream:main:42".into()
            })
        );

        let streaming = build_chat_items(&ChatItemsInput {
            stream: Some("partial answer"),
            stream_started_at: Some(42),
            ..input(&messages)
        });
        assert_eq!(
            streaming.last(),
            Some(&ChatItem::Stream {
                key: "stream:main:42".into(),
                text: "partial answer".into(),
                started_at: Some(42),
            })
        );

        let blank = build_chat_items(&ChatItemsInput {
            stream: Some("  \n"),
            stream_started_at: Some(42),
            ..input(&messages)
        });
        assert_eq!(
            blank.last(),
            Some(&ChatItem::ReadingIndicator {
                key: "stream:main:42".into()
            })
        );
    }

    #[test]
    fn test_streaming_flag_only_on_trailing_assistant_group() {
        let messages = vec![msg("user", "q", 1), msg("assistant", "thinking aloud", 2)];
        let items = build_chat_items(&ChatItemsInput {
            stream: Some("more"),
            ..input(&messages)
        });
        assert!(items[1].as_group().expect("group").is_streaming);
        assert!(!items[0].as_group().expect("group").is_streaming);
        assert_eq!(items[2].key(), "stream:main:live");

        let user_last = vec![msg("user", "q", 1)];
        let items = build_chat_items(&ChatItemsInput {
            stream: Some(""),
            ..input(&user_last)
        });
        assert!(!items[0].as_group().expect("group").is_streaming);
    }

    #[test]
    fn test_keys_stable_across_builds_and_appends() {
        let mut messages = vec![
            Message {
                id: Some("m1".into()),
                ..msg("user", "a", 1)
            },
            msg("assistant", "b", 2),
        ];
        let first: Vec<String> = build_chat_items(&input(&messages))
            .iter()
            .map(|i| i.key().to_string())
            .collect();
        let again: Vec<String> = build_chat_items(&input(&messages))
            .iter()
            .map(|i| i.key().to_string())
            .collect();
        assert_eq!(first, again);

        messages.push(msg("assistant", "c", 3));
        let grown = build_chat_items(&input(&messages));
        assert_eq!(grown[0].key(), "group:user:msg:m1");
        assert_eq!(grown[1].key(), first[1]);
        assert_eq!(grown[1].as_group().expect("group").messages.len(), 2);
    }
}

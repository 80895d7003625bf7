//! Runtime Adapter: the port between canonical chat state and the thread
//! view the renderer consumes.
//!
//! Rendering direction: [`convert_chat_items`] is a pure mapping from render
//! items to [`ThreadMessage`]s, carrying the original [`ChatItem`] as
//! metadata. Action direction: [`ThreadRuntime`] callbacks translate widget
//! actions (new, edit, reload, cancel) into composer/controller calls.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use gwchat_core::{
    AttachmentError, ChatAttachment, ContentBlock, ExtractionCache, RoleClass, ToolCard,
    extract_text, normalize_role_for_grouping,
};
use gwchat_session::{ChatHost, DynGatewayClient, SubmitOutcome, SubmitOverride};
use tracing::{debug, warn};

use crate::chat_items::{ChatItem, ChatItemsInput, build_chat_items};

// ── Thread model ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRole {
    User,
    Assistant,
    System,
}

impl ThreadRole {
    fn from_class(role: RoleClass) -> Self {
        match role {
            RoleClass::User => Self::User,
            RoleClass::Assistant | RoleClass::Tool => Self::Assistant,
            RoleClass::System | RoleClass::Other => Self::System,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Complete,
    Running,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThreadPart {
    Text(String),
    Reasoning(String),
    Tool(ToolCard),
    Image { mime_type: String, bytes: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadMessage {
    /// Render item key.
    pub id: String,
    pub role: ThreadRole,
    pub parts: Vec<ThreadPart>,
    pub status: ThreadStatus,
    pub created_at: Option<i64>,
    /// The render item this message was built from.
    pub metadata: ChatItem,
}

impl ThreadMessage {
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ThreadPart::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn convert_chat_items(
    items: &[ChatItem],
    show_thinking: bool,
    cache: &mut ExtractionCache,
) -> Vec<ThreadMessage> {
    items
        .iter()
        .map(|item| convert_chat_item(item, show_thinking, cache))
        .collect()
}

fn convert_chat_item(
    item: &ChatItem,
    show_thinking: bool,
    cache: &mut ExtractionCache,
) -> ThreadMessage {
    let (role, parts, status, created_at) = match item {
        ChatItem::Group(group) => {
            let mut parts = Vec::new();
            for member in &group.messages {
                let extracted = cache.get(&member.message);
                if show_thinking && let Some(thinking) = &extracted.thinking {
                    parts.push(ThreadPart::Reasoning(thinking.clone()));
                }
                if let Some(text) = &extracted.text {
                    parts.push(ThreadPart::Text(text.clone()));
                }
                if show_thinking {
                    parts.extend(extracted.tool_cards.iter().cloned().map(ThreadPart::Tool));
                }
                for block in member.message.content.blocks() {
                    if let ContentBlock::Image { mime_type, data } = block {
                        parts.push(ThreadPart::Image {
                            mime_type,
                            bytes: data.len() * 3 / 4,
                        });
                    }
                }
            }
            let status = if group.is_streaming {
                ThreadStatus::Running
            } else {
                ThreadStatus::Complete
            };
            (
                ThreadRole::from_class(group.role),
                parts,
                status,
                Some(group.timestamp),
            )
        }
        ChatItem::Divider {
            label, timestamp, ..
        } => (
            ThreadRole::System,
            vec![ThreadPart::Text(label.clone())],
            ThreadStatus::Complete,
            Some(*timestamp),
        ),
        ChatItem::Stream {
            text, started_at, ..
        } => (
            ThreadRole::Assistant,
            vec![ThreadPart::Text(text.clone())],
            ThreadStatus::Running,
            *started_at,
        ),
        ChatItem::ReadingIndicator { .. } => (
            ThreadRole::Assistant,
            Vec::new(),
            ThreadStatus::Running,
            None,
        ),
    };
    ThreadMessage {
        id: item.key().to_string(),
        role,
        parts,
        status,
        created_at,
        metadata: item.clone(),
    }
}

// ── Widget actions ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendContent {
    Text(String),
    Image { data_url: String },
}

/// A message submitted by the thread view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendMessage {
    pub parent_id: Option<String>,
    pub source_id: Option<String>,
    pub content: Vec<AppendContent>,
    pub attachments: Vec<ChatAttachment>,
}

impl AppendMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![AppendContent::Text(text.into())],
            ..Self::default()
        }
    }

    /// Split into draft text and attachments. Unusable inline images are
    /// dropped.
    pub fn parse(&self) -> (String, Vec<ChatAttachment>) {
        let mut texts = Vec::new();
        let mut attachments = self.attachments.clone();
        for part in &self.content {
            match part {
                AppendContent::Text(text) => texts.push(text.as_str()),
                AppendContent::Image { data_url } => {
                    match ChatAttachment::from_data_url(data_url.clone()) {
                        Ok(attachment) => attachments.push(attachment),
                        Err(err) => warn!(error = %err, "dropping inline image"),
                    }
                }
            }
        }
        (texts.join("\n").trim().to_string(), attachments)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub text: String,
    pub attachments: Vec<ChatAttachment>,
    pub parent_id: Option<String>,
    pub source_id: Option<String>,
}

/// Receives edits when the host supports rewriting a prior turn.
#[async_trait]
pub trait EditHandler: Send + Sync {
    async fn edit(&self, request: EditRequest) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Delegated,
    Submitted(SubmitOutcome),
}

/// Callbacks the thread view invokes.
#[async_trait]
pub trait ThreadRuntime: Send {
    fn thread_messages(&mut self) -> Vec<ThreadMessage>;

    fn is_running(&self) -> bool;

    async fn on_new(&mut self, message: AppendMessage) -> SubmitOutcome;

    async fn on_edit(&mut self, message: AppendMessage) -> anyhow::Result<EditOutcome>;

    /// Resend the user prompt nearest to `parent_id`. `None` when the
    /// transcript has no user turn at all.
    async fn on_reload(&mut self, parent_id: Option<&str>) -> Option<SubmitOutcome>;

    /// Abort the active run when abort is permitted.
    async fn on_cancel(&mut self) -> bool;
}

/// Nearest user prompt relative to `anchor`: scan backward from the anchor,
/// then forward past it. Without an anchor the scan starts at the end.
pub fn resolve_retry_prompt(items: &[ChatItem], anchor: Option<&str>) -> Option<String> {
    let entries: Vec<(&str, &str, &gwchat_core::Message)> = items
        .iter()
        .filter_map(ChatItem::as_group)
        .flat_map(|group| {
            group
                .messages
                .iter()
                .map(move |m| (group.key.as_str(), m.key.as_str(), &m.message))
        })
        .collect();
    if entries.is_empty() {
        return None;
    }
    let anchor_index = anchor
        .and_then(|id| {
            entries
                .iter()
                .position(|(group_key, member_key, _)| *group_key == id || *member_key == id)
        })
        .unwrap_or(entries.len() - 1);

    let user_text = |(_, _, message): &(&str, &str, &gwchat_core::Message)| {
        if normalize_role_for_grouping(&message.role) == RoleClass::User {
            extract_text(message)
        } else {
            None
        }
    };
    entries[..=anchor_index]
        .iter()
        .rev()
        .find_map(user_text)
        .or_else(|| entries[anchor_index + 1..].iter().find_map(user_text))
}

// ── ChatRuntime ─────────────────────────────────────────────────────

/// [`ThreadRuntime`] over a [`ChatHost`] and a gateway client.
pub struct ChatRuntime {
    pub host: ChatHost,
    pub show_thinking: bool,
    client: DynGatewayClient,
    edit_handler: Option<Arc<dyn EditHandler>>,
    cache: ExtractionCache,
}

impl ChatRuntime {
    pub fn new(host: ChatHost, client: DynGatewayClient, show_thinking: bool) -> Self {
        Self {
            host,
            show_thinking,
            client,
            edit_handler: None,
            cache: ExtractionCache::new(),
        }
    }

    pub fn with_edit_handler(mut self, handler: Arc<dyn EditHandler>) -> Self {
        self.edit_handler = Some(handler);
        self
    }

    pub fn client(&self) -> DynGatewayClient {
        Arc::clone(&self.client)
    }

    pub fn chat_items(&self) -> Vec<ChatItem> {
        build_chat_items(&ChatItemsInput::from_state(
            self.host.controller.state(),
            self.show_thinking,
        ))
    }

    pub fn attach_file(&mut self, path: &Path) -> Result<(), AttachmentError> {
        self.host.attach_file(path)
    }

    pub fn remove_attachment(&mut self, id: &str) -> bool {
        self.host.remove_attachment(id)
    }

    /// Switch sessions and drop cached extractions of the old transcript.
    pub fn switch_session(&mut self, session_key: &str) {
        self.host.switch_session(session_key);
        self.cache.clear();
    }
}

#[async_trait]
impl ThreadRuntime for ChatRuntime {
    fn thread_messages(&mut self) -> Vec<ThreadMessage> {
        let items = self.chat_items();
        let thread = convert_chat_items(&items, self.show_thinking, &mut self.cache);
        self.cache.sweep();
        thread
    }

    fn is_running(&self) -> bool {
        self.host.is_busy()
    }

    async fn on_new(&mut self, message: AppendMessage) -> SubmitOutcome {
        let (text, attachments) = message.parse();
        self.host.draft = text;
        self.host.attachments.extend(attachments);
        let client = self.client();
        self.host.handle_send_chat(client.as_ref(), None).await
    }

    async fn on_edit(&mut self, message: AppendMessage) -> anyhow::Result<EditOutcome> {
        let (text, attachments) = message.parse();
        if let Some(handler) = self.edit_handler.clone() {
            handler
                .edit(EditRequest {
                    text,
                    attachments,
                    parent_id: message.parent_id,
                    source_id: message.source_id,
                })
                .await?;
            return Ok(EditOutcome::Delegated);
        }
        debug!("no edit handler; resending edited text");
        self.host.draft = text;
        self.host.attachments = attachments;
        let client = self.client();
        let outcome = self.host.handle_send_chat(client.as_ref(), None).await;
        Ok(EditOutcome::Submitted(outcome))
    }

    async fn on_reload(&mut self, parent_id: Option<&str>) -> Option<SubmitOutcome> {
        let prompt = resolve_retry_prompt(&self.chat_items(), parent_id)?;
        let client = self.client();
        Some(
            self.host
                .handle_send_chat(client.as_ref(), Some(SubmitOverride::text(prompt)))
                .await,
        )
    }

    async fn on_cancel(&mut self) -> bool {
        if !self.host.controller.can_abort() {
            return false;
        }
        let client = self.client();
        self.host.controller.abort_chat_run(client.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwchat_core::Message;
    use gwchat_session::{ChatController, GatewayClient, MemoryGateway};
    use std::sync::Mutex;

    fn msg(role: &str, text: &str, ts: i64) -> Message {
        Message::new(role, vec![ContentBlock::text(text)], ts)
    }

    fn runtime_with(messages: Vec<Message>) -> (ChatRuntime, Arc<MemoryGateway>) {
        let gateway = Arc::new(MemoryGateway::new());
        let mut controller = ChatController::new("main");
        controller.set_connected(true);
        controller.state_mut().messages = messages;
        let client: DynGatewayClient = gateway.clone();
        (
            ChatRuntime::new(ChatHost::new(controller), client, false),
            gateway,
        )
    }

    fn items_for(messages: &[Message]) -> Vec<ChatItem> {
        build_chat_items(&ChatItemsInput {
            session_key: "main",
            messages,
            tool_messages: &[],
            show_thinking: false,
            stream: None,
            stream_started_at: None,
        })
    }

    #[derive(Default)]
    struct RecordingEditHandler {
        requests: Mutex<Vec<EditRequest>>,
    }

    #[async_trait]
    impl EditHandler for RecordingEditHandler {
        async fn edit(&self, request: EditRequest) -> anyhow::Result<()> {
            self.requests.lock().expect("lock").push(request);
            Ok(())
        }
    }

    #[test]
    fn test_convert_keeps_keys_and_metadata() {
        let messages = vec![msg("user", "hi", 1), msg("tool", "out", 2), msg("assistant", "yo", 3)];
        let items = build_chat_items(&ChatItemsInput {
            session_key: "main",
            messages: &messages,
            tool_messages: &[],
            show_thinking: true,
            stream: Some(""),
            stream_started_at: Some(9),
        });
        let mut cache = ExtractionCache::new();
        let thread = convert_chat_items(&items, true, &mut cache);
        assert_eq!(thread.len(), items.len());
        for (message, item) in thread.iter().zip(&items) {
            assert_eq!(message.id, item.key());
            assert_eq!(&message.metadata, item);
        }
        assert_eq!(thread[0].role, ThreadRole::User);
        assert_eq!(thread[1].role, ThreadRole::Assistant);
        assert!(matches!(thread[1].parts[1], ThreadPart::Tool(_)));
        assert_eq!(thread[2].status, ThreadStatus::Running);
        assert_eq!(thread[3].status, ThreadStatus::Running);
        assert!(thread[3].parts.is_empty());
    }

    #[test]
    fn test_reasoning_only_with_thinking() {
        let message = Message::new(
            "assistant",
            vec![
                ContentBlock::Thinking {
                    thinking: "hmm".into(),
                },
                ContentBlock::text("answer"),
            ],
            1,
        );
        let items = items_for(std::slice::from_ref(&message));
        let mut cache = ExtractionCache::new();
        let hidden = convert_chat_items(&items, false, &mut cache);
        assert_eq!(hidden[0].parts, vec![ThreadPart::Text("answer".into())]);
        let shown = convert_chat_items(&items, true, &mut cache);
        assert_eq!(shown[0].parts[0], ThreadPart::Reasoning("hmm".into()));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_thread_messages_reuses_and_prunes_cache() {
        let (mut rt, _gateway) =
            runtime_with(vec![msg("user", "hi", 1), msg("assistant", "yo", 2)]);
        rt.thread_messages();
        assert_eq!(rt.cache.stats(), (0, 2));
        rt.thread_messages();
        assert_eq!(rt.cache.stats(), (2, 2));

        rt.host.controller.state_mut().messages.truncate(1);
        let thread = rt.thread_messages();
        assert_eq!(thread.len(), 1);
        assert_eq!(rt.cache.len(), 1);
        assert_eq!(rt.cache.stats(), (3, 2));
    }

    #[test]
    fn test_retry_prompt_scans_backward_then_forward() {
        let messages = vec![
            msg("assistant", "welcome", 1),
            msg("user", "first", 2),
            msg("assistant", "a1", 3),
            msg("user", "second", 4),
            msg("assistant", "a2", 5),
        ];
        let items = items_for(&messages);
        let a1 = items[2].key().to_string();
        assert_eq!(
            resolve_retry_prompt(&items, Some(&a1)).as_deref(),
            Some("first")
        );
        assert_eq!(resolve_retry_prompt(&items, None).as_deref(), Some("second"));
        let welcome = items[0].key().to_string();
        assert_eq!(
            resolve_retry_prompt(&items, Some(&welcome)).as_deref(),
            Some("first")
        );
        assert_eq!(resolve_retry_prompt(&items_for(&messages[..1]), None), None);
    }

    #[test]
    fn test_append_message_parse() {
        let message = AppendMessage {
            content: vec![
                AppendContent::Text("look ".into()),
                AppendContent::Image {
                    data_url: "data:image/png;base64,QUJD".into(),
                },
                AppendContent::Image {
                    data_url: "bogus".into(),
                },
            ],
            ..AppendMessage::default()
        };
        let (text, attachments) = message.parse();
        assert_eq!(text, "look");
        assert_eq!(attachments.len(), 1);
    }

    #[tokio::test]
    async fn test_on_new_sends_through_composer() {
        let (mut runtime, gateway) = runtime_with(Vec::new());
        let outcome = runtime.on_new(AppendMessage::text("hello")).await;
        assert!(matches!(outcome, SubmitOutcome::Sent { .. }));
        assert_eq!(gateway.sent()[0].message, "hello");
        assert!(runtime.is_running());
    }

    #[tokio::test]
    async fn test_on_edit_prefers_handler() {
        let (runtime, gateway) = runtime_with(vec![msg("user", "old", 1)]);
        let handler = Arc::new(RecordingEditHandler::default());
        let mut runtime = runtime.with_edit_handler(handler.clone());
        let outcome = runtime
            .on_edit(AppendMessage {
                parent_id: Some("p".into()),
                source_id: Some("s".into()),
                ..AppendMessage::text("new")
            })
            .await
            .expect("edit");
        assert_eq!(outcome, EditOutcome::Delegated);
        let requests = handler.requests.lock().expect("lock");
        assert_eq!(requests[0].parent_id.as_deref(), Some("p"));
        assert_eq!(requests[0].source_id.as_deref(), Some("s"));
        assert!(gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn test_on_edit_falls_back_to_send() {
        let (mut runtime, gateway) = runtime_with(Vec::new());
        let outcome = runtime
            .on_edit(AppendMessage::text("edited"))
            .await
            .expect("edit");
        assert!(matches!(outcome, EditOutcome::Submitted(SubmitOutcome::Sent { .. })));
        assert_eq!(gateway.sent()[0].message, "edited");
    }

    #[tokio::test]
    async fn test_on_reload_resends_prompt() {
        let (mut runtime, gateway) =
            runtime_with(vec![msg("user", "again", 1), msg("assistant", "x", 2)]);
        let outcome = runtime.on_reload(None).await;
        assert!(matches!(outcome, Some(SubmitOutcome::Sent { .. })));
        assert_eq!(gateway.sent()[0].message, "again");
    }

    #[tokio::test]
    async fn test_on_cancel_requires_abortable_run() {
        let (mut runtime, gateway) = runtime_with(Vec::new());
        assert!(!runtime.on_cancel().await);
        assert!(gateway.aborts().is_empty());

        runtime.host.controller.state_mut().run_id = Some("r1".into());
        assert!(runtime.on_cancel().await);
        assert_eq!(gateway.aborts().len(), 1);
        assert!(gateway.is_connected());
    }
}

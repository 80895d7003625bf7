//! Chat Session Controller: session-scoped state and the operations that
//! mutate it.
//!
//! Async results are applied under two fences: the session key active when
//! the result arrives, and a monotonic sequence number for history loads so a
//! slower, earlier request can never overwrite a later one. Push events are
//! fenced by run id.

use gwchat_core::{
    ChatAttachment, ContentBlock, GatewayError, Message, MessageContent, RoleClass, extract_text,
    normalize_role_for_grouping, now_ms,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::gateway::{ChatAbortRequest, ChatSendRequest, GatewayClient, HistoryRequest, HistoryResponse};

pub const DEFAULT_HISTORY_LIMIT: usize = 200;

/// Kind of a chat push event, as surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatEventState {
    Delta,
    Final,
    Aborted,
    Error,
}

impl ChatEventState {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "delta" => Some(Self::Delta),
            "final" => Some(Self::Final),
            "aborted" => Some(Self::Aborted),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Delta)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delta => "delta",
            Self::Final => "final",
            Self::Aborted => "aborted",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatSessionState {
    pub session_key: String,
    pub messages: Vec<Message>,
    /// Live tool output for the current run; shown only with thinking on.
    pub tool_messages: Vec<Message>,
    pub thinking_level: Option<String>,
    pub run_id: Option<String>,
    pub sending: bool,
    /// `Some("")` means a run started and has produced no text yet.
    pub stream: Option<String>,
    pub stream_started_at: Option<i64>,
    pub loading: bool,
    pub last_error: Option<String>,
    pub connected: bool,
}

impl ChatSessionState {
    pub fn new(session_key: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            messages: Vec::new(),
            tool_messages: Vec::new(),
            thinking_level: None,
            run_id: None,
            sending: false,
            stream: None,
            stream_started_at: None,
            loading: false,
            last_error: None,
            connected: false,
        }
    }

    fn clear_run(&mut self) {
        self.run_id = None;
        self.stream = None;
        self.stream_started_at = None;
    }
}

/// Captured when a history load is issued; checked when it resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTicket {
    pub seq: u64,
    pub session_key: String,
}

#[derive(Debug, Clone)]
pub struct ChatController {
    state: ChatSessionState,
    history_limit: usize,
    issued_seq: u64,
    applied_seq: u64,
}

impl ChatController {
    pub fn new(session_key: impl Into<String>) -> Self {
        Self::with_history_limit(session_key, DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(session_key: impl Into<String>, history_limit: usize) -> Self {
        Self {
            state: ChatSessionState::new(session_key),
            history_limit: history_limit.max(1),
            issued_seq: 0,
            applied_seq: 0,
        }
    }

    pub fn state(&self) -> &ChatSessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ChatSessionState {
        &mut self.state
    }

    pub fn session_key(&self) -> &str {
        &self.state.session_key
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.state.connected = connected;
    }

    pub fn is_busy(&self) -> bool {
        self.state.sending || self.state.run_id.is_some()
    }

    pub fn can_abort(&self) -> bool {
        self.state.connected
            && (self.state.sending || self.state.run_id.is_some() || self.state.stream.is_some())
    }

    /// Select another session. In-flight history for the previous session is
    /// discarded when it resolves.
    pub fn switch_session(&mut self, session_key: impl Into<String>) {
        let session_key = session_key.into();
        if session_key == self.state.session_key {
            return;
        }
        info!(from = %self.state.session_key, to = %session_key, "switching chat session");
        let connected = self.state.connected;
        self.state = ChatSessionState::new(session_key);
        self.state.connected = connected;
    }

    // ── History ─────────────────────────────────────────────────────

    pub fn begin_history_load(&mut self) -> Option<HistoryTicket> {
        if !self.state.connected {
            return None;
        }
        self.issued_seq += 1;
        self.state.loading = true;
        Some(HistoryTicket {
            seq: self.issued_seq,
            session_key: self.state.session_key.clone(),
        })
    }

    pub fn history_request(&self, ticket: &HistoryTicket) -> HistoryRequest {
        HistoryRequest {
            session_key: ticket.session_key.clone(),
            limit: self.history_limit,
        }
    }

    /// Apply a resolved history request. Returns `true` when the result was
    /// current and has been applied.
    pub fn apply_history(
        &mut self,
        ticket: HistoryTicket,
        result: Result<HistoryResponse, GatewayError>,
    ) -> bool {
        if ticket.session_key != self.state.session_key {
            debug!(
                ticket_session = %ticket.session_key,
                active_session = %self.state.session_key,
                "discarding history for inactive session"
            );
            return false;
        }
        if ticket.seq <= self.applied_seq {
            debug!(
                seq = ticket.seq,
                applied = self.applied_seq,
                "discarding stale history response"
            );
            return false;
        }
        self.applied_seq = ticket.seq;
        if ticket.seq == self.issued_seq {
            self.state.loading = false;
        }
        match result {
            Ok(response) => {
                self.state.messages = normalize_history(response.messages);
                self.state.thinking_level = response.thinking_level;
                self.state.tool_messages.clear();
                true
            }
            Err(err) => {
                warn!(session = %ticket.session_key, error = %err, "chat.history failed");
                self.state.last_error = Some(err.to_string());
                false
            }
        }
    }

    pub async fn load_chat_history(&mut self, client: &dyn GatewayClient) -> bool {
        let Some(ticket) = self.begin_history_load() else {
            return false;
        };
        let result = client.chat_history(self.history_request(&ticket)).await;
        self.apply_history(ticket, result)
    }

    // ── Send / abort ────────────────────────────────────────────────

    /// Send a user message. Returns the run id on success, `None` when
    /// disconnected, empty, or failed.
    pub async fn send_chat_message(
        &mut self,
        client: &dyn GatewayClient,
        text: &str,
        attachments: &[ChatAttachment],
    ) -> Option<String> {
        if !self.state.connected {
            return None;
        }
        let text = text.trim();
        if text.is_empty() && attachments.is_empty() {
            return None;
        }

        let now = now_ms();
        let mut blocks = Vec::with_capacity(1 + attachments.len());
        if !text.is_empty() {
            blocks.push(ContentBlock::text(text));
        }
        blocks.extend(attachments.iter().map(ChatAttachment::to_block));
        self.state.messages.push(Message::new("user", blocks, now));

        let run_id = uuid::Uuid::new_v4().to_string();
        self.state.sending = true;
        self.state.last_error = None;
        self.state.run_id = Some(run_id.clone());
        self.state.stream = Some(String::new());
        self.state.stream_started_at = Some(now);

        let request = ChatSendRequest {
            session_key: self.state.session_key.clone(),
            message: text.to_string(),
            attachments: attachments.iter().map(ChatAttachment::to_payload).collect(),
            deliver: false,
            idempotency_key: run_id.clone(),
        };
        let result = client.chat_send(request).await;
        self.state.sending = false;

        match result {
            Ok(response) => {
                let run_id = response
                    .run_id
                    .filter(|id| !id.is_empty())
                    .unwrap_or(run_id);
                self.state.run_id = Some(run_id.clone());
                debug!(run_id = %run_id, "chat.send accepted");
                Some(run_id)
            }
            Err(err) => {
                warn!(error = %err, "chat.send failed");
                self.state.clear_run();
                self.state.messages.push(Message::assistant_text(
                    format!("Error: {}", err.detail()),
                    now_ms(),
                ));
                self.state.last_error = Some(err.to_string());
                None
            }
        }
    }

    /// Abort the current run (or the whole session when no run id is known).
    pub async fn abort_chat_run(&mut self, client: &dyn GatewayClient) -> bool {
        if !self.state.connected {
            return false;
        }
        let request = ChatAbortRequest {
            session_key: self.state.session_key.clone(),
            run_id: self.state.run_id.clone(),
        };
        match client.chat_abort(request).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "chat.abort failed");
                self.state.last_error = Some(err.to_string());
                false
            }
        }
    }

    // ── Push events ─────────────────────────────────────────────────

    pub fn handle_chat_event(&mut self, payload: Option<&Value>) -> Option<ChatEventState> {
        let obj = payload?.as_object()?;
        let session_key = obj.get("sessionKey").and_then(Value::as_str)?;
        if session_key != self.state.session_key {
            return None;
        }
        let state = obj
            .get("state")
            .and_then(Value::as_str)
            .and_then(ChatEventState::parse)?;

        // Any runId other than ours is foreign, including when we track no
        // run; frames without a runId belong to the active run.
        if let Some(event_run) = obj.get("runId").and_then(Value::as_str)
            && self.state.run_id.as_deref() != Some(event_run)
        {
            return match state {
                ChatEventState::Delta => None,
                terminal => {
                    debug!(run_id = event_run, state = terminal.as_str(), "foreign run event");
                    Some(terminal)
                }
            };
        }

        match state {
            ChatEventState::Delta => {
                if let Some(next) = obj.get("message").and_then(stream_text) {
                    let current = self.state.stream.as_deref().unwrap_or_default();
                    if current.is_empty() || next.len() >= current.len() {
                        self.state.stream = Some(next);
                    }
                    if self.state.stream_started_at.is_none() {
                        self.state.stream_started_at = Some(now_ms());
                    }
                }
            }
            ChatEventState::Final => self.state.clear_run(),
            ChatEventState::Aborted => {
                let carried = obj.get("message").and_then(normalize_aborted_message);
                match carried {
                    Some(message) => self.state.messages.push(message),
                    None => {
                        let buffered = self.state.stream.as_deref().unwrap_or_default();
                        if !buffered.trim().is_empty() {
                            self.state
                                .messages
                                .push(Message::assistant_text(buffered, now_ms()));
                        }
                    }
                }
                self.state.clear_run();
            }
            ChatEventState::Error => {
                self.state.clear_run();
                self.state.last_error = Some(
                    obj.get("errorMessage")
                        .and_then(Value::as_str)
                        .unwrap_or("chat error")
                        .to_string(),
                );
            }
        }
        Some(state)
    }

    /// Live tool output for the active run.
    pub fn handle_tool_event(&mut self, payload: Option<&Value>) -> bool {
        let Some(obj) = payload.and_then(Value::as_object) else {
            return false;
        };
        if obj.get("sessionKey").and_then(Value::as_str) != Some(self.state.session_key.as_str()) {
            return false;
        }
        // Any runId other than ours is foreign, including when we track no
        // run; frames without a runId belong to the active run.
        if let Some(event_run) = obj.get("runId").and_then(Value::as_str)
            && self.state.run_id.as_deref() != Some(event_run)
        {
            return false;
        }
        let Some(message) = obj.get("message").and_then(Message::from_value) else {
            return false;
        };
        self.state.tool_messages.push(message);
        true
    }
}

fn stream_text(message: &Value) -> Option<String> {
    match message {
        Value::String(s) => Some(s.clone()),
        other => Message::from_value(other).map(|m| extract_text(&m).unwrap_or_default()),
    }
}

fn normalize_aborted_message(value: &Value) -> Option<Message> {
    let message = Message::from_value(value)?;
    if normalize_role_for_grouping(&message.role) != RoleClass::Assistant {
        return None;
    }
    if !message.content.has_content() {
        return None;
    }
    let mut message = message;
    if message.timestamp == 0 {
        message.timestamp = now_ms();
    }
    Some(message)
}

/// Parse raw history entries, dropping degenerate ones and rewriting legacy
/// assistant strings into block form.
pub fn normalize_history(raw: Vec<Value>) -> Vec<Message> {
    raw.iter()
        .filter_map(Message::from_value)
        .filter_map(|mut message| {
            if let MessageContent::Text(text) = &message.content
                && text.trim().is_empty()
            {
                return None;
            }
            let is_assistant = normalize_role_for_grouping(&message.role) == RoleClass::Assistant;
            if is_assistant && message.is_errored() && !message.content.has_content() {
                return None;
            }
            if is_assistant && matches!(message.content, MessageContent::Text(_)) {
                message.content =
                    MessageContent::Blocks(std::mem::take(&mut message.content).into_blocks());
            }
            Some(message)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryGateway;
    use serde_json::json;

    fn connected(session: &str) -> ChatController {
        let mut controller = ChatController::new(session);
        controller.set_connected(true);
        controller
    }

    fn history(texts: &[&str]) -> HistoryResponse {
        HistoryResponse {
            messages: texts
                .iter()
                .enumerate()
                .map(|(i, t)| json!({"role": "user", "content": t, "timestamp": i}))
                .collect(),
            thinking_level: Some("low".into()),
        }
    }

    fn texts(controller: &ChatController) -> Vec<String> {
        controller
            .state()
            .messages
            .iter()
            .filter_map(extract_text)
            .collect()
    }

    fn with_run(session: &str, run: &str, stream: &str) -> ChatController {
        let mut controller = connected(session);
        let state = controller.state_mut();
        state.run_id = Some(run.into());
        state.stream = Some(stream.into());
        state.stream_started_at = Some(100);
        controller
    }

    // ── history ─────────────────────────────────────────────────────

    #[test]
    fn test_later_history_wins_when_earlier_resolves_last() {
        let mut controller = connected("main");
        let first = controller.begin_history_load().expect("ticket");
        let second = controller.begin_history_load().expect("ticket");

        assert!(controller.apply_history(second, Ok(history(&["new"]))));
        assert!(!controller.apply_history(first, Ok(history(&["old"]))));

        assert_eq!(texts(&controller), vec!["new"]);
        assert!(!controller.state().loading);
    }

    #[test]
    fn test_history_for_previous_session_is_discarded() {
        let mut controller = connected("main");
        controller.state_mut().messages = vec![Message::assistant_text("keep", 1)];
        let ticket = controller.begin_history_load().expect("ticket");
        controller.switch_session("other");
        controller.state_mut().messages = vec![Message::assistant_text("keep", 1)];

        assert!(!controller.apply_history(ticket, Ok(history(&["stale"]))));
        assert_eq!(texts(&controller), vec!["keep"]);
    }

    #[test]
    fn test_disconnected_history_issues_nothing() {
        let mut controller = ChatController::new("main");
        assert!(controller.begin_history_load().is_none());
    }

    #[test]
    fn test_history_normalization() {
        let raw = vec![
            json!({"role": "user", "content": "   "}),
            json!({"role": "assistant", "content": [], "stopReason": "error"}),
            json!({"role": "assistant", "content": "legacy"}),
            json!("not an object"),
            json!({"role": "assistant", "content": [{"type": "text", "text": "partial"}], "stopReason": "error"}),
        ];
        let messages = normalize_history(raw);
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0].content,
            MessageContent::Blocks(vec![ContentBlock::text("legacy")])
        );
        assert_eq!(extract_text(&messages[1]).as_deref(), Some("partial"));
    }

    #[test]
    fn test_history_failure_records_error() {
        let mut controller = connected("main");
        let ticket = controller.begin_history_load().expect("ticket");
        assert!(!controller.apply_history(ticket, Err(GatewayError::Timeout)));
        assert_eq!(controller.state().last_error.as_deref(), Some("request timed out"));
        assert!(!controller.state().loading);
    }

    #[tokio::test]
    async fn test_load_chat_history_through_gateway() {
        let gateway = MemoryGateway::new();
        gateway.set_history(
            "main",
            vec![json!({"role": "assistant", "content": "hello", "timestamp": 3})],
        );
        let mut controller = connected("main");
        assert!(controller.load_chat_history(&gateway).await);
        assert_eq!(texts(&controller), vec!["hello"]);
        assert_eq!(gateway.history_calls()[0].limit, DEFAULT_HISTORY_LIMIT);
    }

    // ── send / abort ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_send_disconnected_is_noop() {
        let gateway = MemoryGateway::new();
        let mut controller = ChatController::new("main");
        assert_eq!(controller.send_chat_message(&gateway, "hi", &[]).await, None);
        assert!(gateway.sent().is_empty());
        assert!(controller.state().messages.is_empty());
    }

    #[tokio::test]
    async fn test_send_success_appends_optimistic_message() {
        let gateway = MemoryGateway::new();
        let mut controller = connected("main");
        let attachment =
            ChatAttachment::from_data_url("data:image/png;base64,QUJD").expect("attachment");

        let run_id = controller
            .send_chat_message(&gateway, "look", std::slice::from_ref(&attachment))
            .await
            .expect("run id");

        let state = controller.state();
        assert_eq!(state.messages.len(), 1);
        let blocks = state.messages[0].content.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], ContentBlock::text("look"));
        assert!(matches!(&blocks[1], ContentBlock::Image { data, .. } if data == "QUJD"));
        assert!(!state.sending);
        assert_eq!(state.run_id.as_deref(), Some(run_id.as_str()));
        assert_eq!(state.stream.as_deref(), Some(""));

        let sent = gateway.sent();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].deliver);
        assert_eq!(sent[0].idempotency_key, run_id);
        assert_eq!(sent[0].attachments[0].content, "QUJD");
    }

    #[tokio::test]
    async fn test_send_failure_appends_inline_error() {
        let gateway = MemoryGateway::new();
        gateway.fail_send(GatewayError::rpc("chat.send", "quota exceeded"));
        let mut controller = connected("main");

        assert_eq!(controller.send_chat_message(&gateway, "hi", &[]).await, None);

        let state = controller.state();
        assert_eq!(state.messages.len(), 2);
        let error = &state.messages[1];
        assert_eq!(error.role, "assistant");
        match &error.content.blocks()[0] {
            ContentBlock::Text { text } => {
                assert!(text.contains("Error:"));
                assert!(text.contains("quota exceeded"));
            }
            other => panic!("unexpected block {other:?}"),
        }
        assert!(!state.sending);
        assert!(state.run_id.is_none());
        assert!(state.stream.is_none());
        assert!(state.last_error.is_some());
    }

    #[tokio::test]
    async fn test_send_uses_server_run_id() {
        let gateway = MemoryGateway::new();
        gateway.set_next_run_id("server-run");
        let mut controller = connected("main");
        let run = controller.send_chat_message(&gateway, "hi", &[]).await;
        assert_eq!(run.as_deref(), Some("server-run"));
        assert_eq!(controller.state().run_id.as_deref(), Some("server-run"));
    }

    #[tokio::test]
    async fn test_abort_paths() {
        let gateway = MemoryGateway::new();
        let mut offline = ChatController::new("main");
        assert!(!offline.abort_chat_run(&gateway).await);

        let mut controller = with_run("main", "r1", "");
        assert!(controller.abort_chat_run(&gateway).await);
        assert_eq!(gateway.aborts()[0].run_id.as_deref(), Some("r1"));

        controller.state_mut().run_id = None;
        assert!(controller.abort_chat_run(&gateway).await);
        assert_eq!(gateway.aborts()[1].run_id, None);

        gateway.fail_abort(GatewayError::Transport("reset".into()));
        assert!(!controller.abort_chat_run(&gateway).await);
        assert!(
            controller
                .state()
                .last_error
                .as_deref()
                .unwrap_or("")
                .contains("reset")
        );
    }

    // ── events ──────────────────────────────────────────────────────

    #[test]
    fn test_event_without_payload_or_other_session() {
        let mut controller = with_run("main", "r1", "x");
        assert_eq!(controller.handle_chat_event(None), None);
        let other = json!({"sessionKey": "other", "runId": "r1", "state": "final"});
        assert_eq!(controller.handle_chat_event(Some(&other)), None);
        assert_eq!(controller.state().run_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_foreign_delta_is_ignored() {
        let mut controller = with_run("main", "r1", "mine");
        let before = controller.state().clone();
        let event = json!({
            "sessionKey": "main", "runId": "r2", "state": "delta",
            "message": {"role": "assistant", "content": [{"type": "text", "text": "theirs, longer"}]}
        });
        assert_eq!(controller.handle_chat_event(Some(&event)), None);
        assert_eq!(controller.state(), &before);
    }

    #[test]
    fn test_foreign_final_is_surfaced_without_mutation() {
        let mut controller = with_run("main", "r1", "mine");
        let event = json!({"sessionKey": "main", "runId": "r2", "state": "final"});
        assert_eq!(
            controller.handle_chat_event(Some(&event)),
            Some(ChatEventState::Final)
        );
        assert_eq!(controller.state().run_id.as_deref(), Some("r1"));
        assert_eq!(controller.state().stream.as_deref(), Some("mine"));
    }

    #[test]
    fn test_own_delta_grows_stream() {
        let mut controller = with_run("main", "r1", "");
        let delta = |text: &str| {
            json!({
                "sessionKey": "main", "runId": "r1", "state": "delta",
                "message": {"role": "assistant", "content": [{"type": "text", "text": text}]}
            })
        };
        assert_eq!(
            controller.handle_chat_event(Some(&delta("Hel"))),
            Some(ChatEventState::Delta)
        );
        controller.handle_chat_event(Some(&delta("Hello")));
        controller.handle_chat_event(Some(&delta("He")));
        assert_eq!(controller.state().stream.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_delta_without_run_id_counts_as_own() {
        let mut controller = with_run("main", "r1", "draft");
        let event = json!({
            "sessionKey": "main", "state": "delta",
            "message": {"role": "assistant", "content": [{"type": "text", "text": "draft reply"}]}
        });
        assert_eq!(
            controller.handle_chat_event(Some(&event)),
            Some(ChatEventState::Delta)
        );
        assert_eq!(controller.state().stream.as_deref(), Some("draft reply"));
        assert_eq!(controller.state().run_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_own_final_clears_run() {
        let mut controller = with_run("main", "r1", "done");
        let event = json!({"sessionKey": "main", "runId": "r1", "state": "final"});
        assert_eq!(
            controller.handle_chat_event(Some(&event)),
            Some(ChatEventState::Final)
        );
        let state = controller.state();
        assert!(state.run_id.is_none());
        assert!(state.stream.is_none());
        assert!(state.stream_started_at.is_none());
    }

    #[test]
    fn test_own_abort_appends_carried_message() {
        let mut controller = with_run("main", "r1", "buffered");
        let event = json!({
            "sessionKey": "main", "runId": "r1", "state": "aborted",
            "message": {"role": "assistant", "content": [{"type": "text", "text": "partial answer"}]}
        });
        assert_eq!(
            controller.handle_chat_event(Some(&event)),
            Some(ChatEventState::Aborted)
        );
        assert_eq!(texts(&controller), vec!["partial answer"]);
        assert!(controller.state().run_id.is_none());
    }

    #[test]
    fn test_malformed_abort_falls_back_to_stream() {
        for message in [json!({"role": "user", "content": "x"}), json!("oops"), json!(null)] {
            let mut controller = with_run("main", "r1", "buffered text");
            let event = json!({
                "sessionKey": "main", "runId": "r1", "state": "aborted", "message": message
            });
            assert_eq!(
                controller.handle_chat_event(Some(&event)),
                Some(ChatEventState::Aborted)
            );
            assert_eq!(texts(&controller), vec!["buffered text"]);
            assert_eq!(controller.state().messages[0].role, "assistant");
        }
    }

    #[test]
    fn test_abort_with_nothing_buffered_appends_nothing() {
        let mut controller = with_run("main", "r1", "  ");
        let event = json!({"sessionKey": "main", "runId": "r1", "state": "aborted"});
        controller.handle_chat_event(Some(&event));
        assert!(controller.state().messages.is_empty());
        assert!(controller.state().stream.is_none());
    }

    #[test]
    fn test_error_event_records_message() {
        let mut controller = with_run("main", "r1", "x");
        let event = json!({
            "sessionKey": "main", "runId": "r1", "state": "error", "errorMessage": "model overloaded"
        });
        assert_eq!(
            controller.handle_chat_event(Some(&event)),
            Some(ChatEventState::Error)
        );
        assert!(controller.state().run_id.is_none());
        assert_eq!(
            controller.state().last_error.as_deref(),
            Some("model overloaded")
        );
    }

    #[test]
    fn test_tool_event_fenced_by_run() {
        let mut controller = with_run("main", "r1", "");
        let mine = json!({
            "sessionKey": "main", "runId": "r1",
            "message": {"role": "toolResult", "toolName": "exec", "content": "ok"}
        });
        let theirs = json!({
            "sessionKey": "main", "runId": "r9",
            "message": {"role": "toolResult", "content": "no"}
        });
        assert!(controller.handle_tool_event(Some(&mine)));
        assert!(!controller.handle_tool_event(Some(&theirs)));
        assert_eq!(controller.state().tool_messages.len(), 1);
    }
}

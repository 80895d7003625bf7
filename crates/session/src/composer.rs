//! Chat Composer/Queue Logic: decides whether a submit sends, queues, or
//! stops the active run, and drives the follow-ups after terminal events.

use std::collections::HashSet;
use std::path::Path;

use gwchat_core::{AttachmentError, ChatAttachment, QueuedMessage};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::controller::{ChatController, ChatEventState};
use crate::gateway::{GatewayClient, GatewayEvent, SessionSummary};

pub const CHAT_STOP_COMMANDS: [&str; 6] = ["/stop", "stop", "esc", "abort", "wait", "exit"];

/// Prefix that starts a fresh session; the session list is refreshed once
/// the resulting run ends.
pub const CHAT_RESET_PREFIX: &str = "/new";

pub fn is_chat_stop_command(text: &str) -> bool {
    let folded = text.trim().to_lowercase();
    CHAT_STOP_COMMANDS.contains(&folded.as_str())
}

fn is_chat_reset_command(text: &str) -> bool {
    text.trim_start().starts_with(CHAT_RESET_PREFIX)
}

/// What a submit ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Sent { run_id: String },
    Queued { id: String },
    Aborted { ok: bool },
    Failed,
    Ignored,
}

/// Text submitted from somewhere other than the draft (queue flush, retry,
/// widget callbacks).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOverride {
    pub text: String,
    pub attachments: Vec<ChatAttachment>,
    /// Put the text back into the draft if the send fails.
    pub restore_draft: bool,
}

impl SubmitOverride {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Composer-side owner of the draft, pending attachments and the queue.
#[derive(Debug, Clone)]
pub struct ChatHost {
    pub controller: ChatController,
    pub draft: String,
    pub attachments: Vec<ChatAttachment>,
    pub queue: Vec<QueuedMessage>,
    pub sessions: Vec<SessionSummary>,
    refresh_sessions_after: HashSet<String>,
}

impl ChatHost {
    pub fn new(controller: ChatController) -> Self {
        Self {
            controller,
            draft: String::new(),
            attachments: Vec::new(),
            queue: Vec::new(),
            sessions: Vec::new(),
            refresh_sessions_after: HashSet::new(),
        }
    }

    pub fn connected(&self) -> bool {
        self.controller.state().connected
    }

    pub fn is_busy(&self) -> bool {
        self.controller.is_busy()
    }

    pub fn pending_session_refresh(&self, run_id: &str) -> bool {
        self.refresh_sessions_after.contains(run_id)
    }

    // ── Attachments ─────────────────────────────────────────────────

    pub fn add_attachment(&mut self, attachment: ChatAttachment) {
        self.attachments.push(attachment);
    }

    pub fn attach_file(&mut self, path: &Path) -> Result<(), AttachmentError> {
        let attachment = ChatAttachment::from_path(path)?;
        debug!(path = %path.display(), mime = %attachment.mime_type, "attached image");
        self.attachments.push(attachment);
        Ok(())
    }

    pub fn remove_attachment(&mut self, id: &str) -> bool {
        let before = self.attachments.len();
        self.attachments.retain(|a| a.id != id);
        self.attachments.len() != before
    }

    // ── Queue ───────────────────────────────────────────────────────

    pub fn remove_queued_message(&mut self, id: &str) -> bool {
        let before = self.queue.len();
        self.queue.retain(|item| item.id != id);
        self.queue.len() != before
    }

    fn enqueue(&mut self, text: String, attachments: Vec<ChatAttachment>, refresh: bool) -> String {
        let item = QueuedMessage {
            refresh_sessions: refresh,
            ..QueuedMessage::new(text, attachments)
        };
        let id = item.id.clone();
        debug!(id = %id, depth = self.queue.len() + 1, "queued chat message");
        self.queue.push(item);
        id
    }

    /// Send the head of the queue when idle. A failed send puts it back.
    pub async fn flush_chat_queue(&mut self, client: &dyn GatewayClient) -> Option<SubmitOutcome> {
        if !self.connected() || self.is_busy() || self.queue.is_empty() {
            return None;
        }
        let next = self.queue.remove(0);
        let run_id = self
            .controller
            .send_chat_message(client, &next.text, &next.attachments)
            .await;
        match run_id {
            Some(run_id) => {
                if next.refresh_sessions {
                    self.refresh_sessions_after.insert(run_id.clone());
                }
                Some(SubmitOutcome::Sent { run_id })
            }
            None => {
                self.queue.insert(0, next);
                Some(SubmitOutcome::Failed)
            }
        }
    }

    // ── Submit ──────────────────────────────────────────────────────

    /// Submit the draft (or `override_input`): stop, queue, or send.
    pub async fn handle_send_chat(
        &mut self,
        client: &dyn GatewayClient,
        override_input: Option<SubmitOverride>,
    ) -> SubmitOutcome {
        if !self.connected() {
            return SubmitOutcome::Ignored;
        }
        let from_draft = override_input.is_none();
        let previous_draft = self.draft.clone();
        let (text, attachments, restore_override) = match override_input {
            Some(input) => (input.text.trim().to_string(), input.attachments, input.restore_draft),
            None => (self.draft.trim().to_string(), self.attachments.clone(), false),
        };
        if text.is_empty() && attachments.is_empty() {
            return SubmitOutcome::Ignored;
        }

        if is_chat_stop_command(&text) {
            self.draft.clear();
            let ok = self.controller.abort_chat_run(client).await;
            return SubmitOutcome::Aborted { ok };
        }

        let refresh = is_chat_reset_command(&text);
        if from_draft {
            self.draft.clear();
            self.attachments.clear();
        }

        if self.is_busy() {
            let id = self.enqueue(text, attachments, refresh);
            return SubmitOutcome::Queued { id };
        }

        match self
            .controller
            .send_chat_message(client, &text, &attachments)
            .await
        {
            Some(run_id) => {
                if refresh {
                    self.refresh_sessions_after.insert(run_id.clone());
                }
                SubmitOutcome::Sent { run_id }
            }
            None => {
                if from_draft {
                    self.draft = previous_draft;
                    self.attachments = attachments;
                } else if restore_override {
                    self.draft = text;
                    self.attachments = attachments;
                }
                SubmitOutcome::Failed
            }
        }
    }

    // ── Sessions ────────────────────────────────────────────────────

    pub async fn refresh_sessions(&mut self, client: &dyn GatewayClient) -> bool {
        match client.list_sessions().await {
            Ok(sessions) => {
                self.sessions = sessions;
                true
            }
            Err(err) => {
                warn!(error = %err, "sessions.list failed");
                false
            }
        }
    }

    /// Switch to another session: pending composer state belongs to the old
    /// session and is dropped.
    pub fn switch_session(&mut self, session_key: &str) {
        self.controller.switch_session(session_key);
        self.queue.clear();
        self.attachments.clear();
    }

    // ── Events ──────────────────────────────────────────────────────

    /// Route a push frame. Terminal chat events reset live tool output,
    /// flush the queue and refresh sessions when the run was started by
    /// `/new`; a final event reloads history.
    pub async fn handle_gateway_event(
        &mut self,
        client: &dyn GatewayClient,
        event: &GatewayEvent,
    ) -> Option<ChatEventState> {
        match event.event.as_str() {
            GatewayEvent::CHAT => self.handle_chat_event(client, event.payload.as_ref()).await,
            GatewayEvent::TOOL => {
                self.controller.handle_tool_event(event.payload.as_ref());
                None
            }
            other => {
                debug!(event = other, "ignoring gateway event");
                None
            }
        }
    }

    pub async fn handle_chat_event(
        &mut self,
        client: &dyn GatewayClient,
        payload: Option<&Value>,
    ) -> Option<ChatEventState> {
        let state = self.controller.handle_chat_event(payload)?;
        if state.is_terminal() {
            // Foreign terminal events leave the own run in place.
            if self.controller.state().run_id.is_none() {
                self.controller.state_mut().tool_messages.clear();
            }
            let run_id = payload
                .and_then(|p| p.get("runId"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(run_id) = run_id
                && self.refresh_sessions_after.remove(&run_id)
                && state == ChatEventState::Final
            {
                info!(run_id = %run_id, "refreshing sessions after reset run");
                self.refresh_sessions(client).await;
            }
        }
        if state == ChatEventState::Final {
            self.controller.load_chat_history(client).await;
        }
        if state.is_terminal() {
            self.flush_chat_queue(client).await;
        }
        Some(state)
    }
}

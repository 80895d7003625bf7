//! In-memory gateway: records requests and serves canned responses.
//!
//! Used as the test double for the controller/composer and as the backend of
//! the CLI's `--offline` mode, where `echo` replies stream back as push events.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use gwchat_core::{GatewayError, Message, now_ms};
use serde_json::{Value, json};
use tokio::sync::broadcast;

use crate::gateway::{
    ChatAbortRequest, ChatSendRequest, ChatSendResponse, GatewayClient, GatewayEvent,
    HistoryRequest, HistoryResponse, SessionSummary,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct MemoryState {
    histories: HashMap<String, Vec<Value>>,
    thinking_level: Option<String>,
    sessions: Vec<SessionSummary>,
    history_calls: Vec<HistoryRequest>,
    sent: Vec<ChatSendRequest>,
    aborts: Vec<ChatAbortRequest>,
    session_list_calls: usize,
    next_run_id: Option<String>,
    fail_history: Option<GatewayError>,
    fail_send: Option<GatewayError>,
    fail_abort: Option<GatewayError>,
}

#[derive(Debug)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<GatewayEvent>,
    connected: AtomicBool,
    echo: bool,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::default()),
            events,
            connected: AtomicBool::new(true),
            echo: false,
        }
    }

    /// A gateway that answers every send by echoing it back as an assistant
    /// run (delta then final) and persisting both turns into history.
    pub fn with_echo() -> Self {
        Self {
            echo: true,
            ..Self::new()
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_history(&self, session_key: &str, messages: Vec<Value>) {
        self.lock()
            .histories
            .insert(session_key.to_string(), messages);
    }

    pub fn set_thinking_level(&self, level: Option<&str>) {
        self.lock().thinking_level = level.map(str::to_string);
    }

    pub fn set_sessions(&self, sessions: Vec<SessionSummary>) {
        self.lock().sessions = sessions;
    }

    pub fn set_next_run_id(&self, run_id: &str) {
        self.lock().next_run_id = Some(run_id.to_string());
    }

    pub fn fail_history(&self, err: GatewayError) {
        self.lock().fail_history = Some(err);
    }

    pub fn fail_send(&self, err: GatewayError) {
        self.lock().fail_send = Some(err);
    }

    pub fn fail_abort(&self, err: GatewayError) {
        self.lock().fail_abort = Some(err);
    }

    /// Push a frame to every subscriber.
    pub fn emit(&self, event: GatewayEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn history_calls(&self) -> Vec<HistoryRequest> {
        self.lock().history_calls.clone()
    }

    pub fn sent(&self) -> Vec<ChatSendRequest> {
        self.lock().sent.clone()
    }

    pub fn aborts(&self) -> Vec<ChatAbortRequest> {
        self.lock().aborts.clone()
    }

    pub fn session_list_calls(&self) -> usize {
        self.lock().session_list_calls
    }

    fn echo_run(&self, request: &ChatSendRequest, run_id: &str) {
        let now = now_ms();
        let reply = if request.message.is_empty() {
            format!("Received {} attachment(s).", request.attachments.len())
        } else {
            format!("echo: {}", request.message)
        };
        let user = json!({
            "role": "user",
            "content": [{"type": "text", "text": request.message}],
            "timestamp": now,
        });
        let assistant = Message::assistant_text(reply.clone(), now).to_value();
        {
            let mut state = self.lock();
            let history = state
                .histories
                .entry(request.session_key.clone())
                .or_default();
            history.push(user);
            history.push(assistant.clone());
        }
        self.emit(GatewayEvent::chat(json!({
            "runId": run_id,
            "sessionKey": request.session_key,
            "state": "delta",
            "message": {"role": "assistant", "content": [{"type": "text", "text": reply}]},
        })));
        self.emit(GatewayEvent::chat(json!({
            "runId": run_id,
            "sessionKey": request.session_key,
            "state": "final",
            "message": assistant,
        })));
    }
}

#[async_trait]
impl GatewayClient for MemoryGateway {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn chat_history(
        &self,
        request: HistoryRequest,
    ) -> Result<HistoryResponse, GatewayError> {
        let mut state = self.lock();
        state.history_calls.push(request.clone());
        if let Some(err) = state.fail_history.clone() {
            return Err(err);
        }
        let messages = state
            .histories
            .get(&request.session_key)
            .map(|all| {
                let skip = all.len().saturating_sub(request.limit);
                all[skip..].to_vec()
            })
            .unwrap_or_default();
        Ok(HistoryResponse {
            messages,
            thinking_level: state.thinking_level.clone(),
        })
    }

    async fn chat_send(&self, request: ChatSendRequest) -> Result<ChatSendResponse, GatewayError> {
        if !self.is_connected() {
            return Err(GatewayError::Disconnected);
        }
        let run_id = {
            let mut state = self.lock();
            state.sent.push(request.clone());
            if let Some(err) = state.fail_send.clone() {
                return Err(err);
            }
            state
                .next_run_id
                .take()
                .unwrap_or_else(|| request.idempotency_key.clone())
        };
        if self.echo {
            self.echo_run(&request, &run_id);
        }
        Ok(ChatSendResponse {
            run_id: Some(run_id),
        })
    }

    async fn chat_abort(&self, request: ChatAbortRequest) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.aborts.push(request);
        match state.fail_abort.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, GatewayError> {
        let mut state = self.lock();
        state.session_list_calls += 1;
        Ok(state.sessions.clone())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }
}

//! HTTP gateway client.
//!
//! Requests go out as `POST {base}/rpc` with `{"method", "params"}` and come
//! back in an `{"ok", "payload", "error"}` envelope. Push frames arrive as
//! newline-delimited JSON from `GET {base}/events`; `data:` prefixed lines
//! are accepted too so an SSE endpoint works unchanged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use gwchat_core::{GatewayConfig, GatewayError};
use gwchat_session::{
    ChatAbortRequest, ChatSendRequest, ChatSendResponse, GatewayClient, GatewayEvent,
    HistoryRequest, HistoryResponse, SessionSummary,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(10);
const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    method: &'a str,
    params: &'a P,
}

#[derive(Debug, Default, Deserialize)]
pub struct RpcEnvelope {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RpcErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionsListPayload {
    #[serde(default)]
    sessions: Vec<SessionSummary>,
}

/// Unwrap a response envelope. A missing payload on success decodes as an
/// empty object.
pub fn decode_envelope(method: &str, envelope: RpcEnvelope) -> Result<Value, GatewayError> {
    if envelope.ok {
        return Ok(envelope
            .payload
            .filter(|p| !p.is_null())
            .unwrap_or_else(|| Value::Object(Default::default())));
    }
    let error = envelope.error.unwrap_or_default();
    let message = error
        .message
        .filter(|m| !m.trim().is_empty())
        .or(error.code)
        .unwrap_or_else(|| "request failed".to_string());
    Err(GatewayError::rpc(method, message))
}

/// Parse one frame of the event stream. Blank lines, SSE comments and
/// malformed frames yield `None`.
pub fn parse_event_line(line: &str) -> Option<GatewayEvent> {
    let trimmed = line.trim();
    let data = trimmed
        .strip_prefix("data:")
        .map(str::trim)
        .unwrap_or(trimmed);
    if data.is_empty() || data.starts_with(':') {
        return None;
    }
    match serde_json::from_str::<GatewayEvent>(data) {
        Ok(event) => Some(event),
        Err(err) => {
            debug!(error = %err, "dropping malformed event frame");
            None
        }
    }
}

/// Splits a byte stream into lines; partial lines (and partial UTF-8
/// sequences) wait for the next chunk.
///
/// A line longer than the limit yields one `InvalidResponse` in its place
/// and the rest of it is skipped up to the next newline.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    limit: usize,
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit,
            discarding: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<String, GatewayError>> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (head, tail) = rest.split_at(pos + 1);
            rest = tail;
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if self.pending.len() + pos > self.limit {
                self.pending.clear();
                lines.push(Err(self.overflow()));
                continue;
            }
            self.pending.extend_from_slice(head);
            let line = std::mem::take(&mut self.pending);
            let text = String::from_utf8_lossy(&line);
            lines.push(Ok(text.trim_end_matches(['\r', '\n']).to_string()));
        }
        if !self.discarding {
            self.pending.extend_from_slice(rest);
            if self.pending.len() > self.limit {
                self.pending.clear();
                self.discarding = true;
                lines.push(Err(self.overflow()));
            }
        }
        lines
    }

    fn overflow(&self) -> GatewayError {
        GatewayError::InvalidResponse(format!("event line exceeds {} bytes", self.limit))
    }
}

/// Reconnect delay: doubles per attempt up to the cap, back to the base
/// once a stream has been up.
#[derive(Debug)]
struct Backoff {
    next: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            next: RECONNECT_BASE_DELAY,
        }
    }

    fn reset(&mut self) {
        self.next = RECONNECT_BASE_DELAY;
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (delay * 2).min(RECONNECT_MAX_DELAY);
        delay
    }
}

/// [`GatewayClient`] over HTTP.
#[derive(Clone)]
pub struct HttpGateway {
    base_url: String,
    token: Option<String>,
    request_timeout: Duration,
    client: reqwest::Client,
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<GatewayEvent>,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            client,
            connected: Arc::new(AtomicBool::new(false)),
            events,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Override the connection flag; one-shot commands that never open the
    /// event stream mark themselves connected.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn map_transport_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            return GatewayError::Timeout;
        }
        if err.is_connect() {
            self.connected.store(false, Ordering::SeqCst);
        }
        GatewayError::Transport(err.to_string())
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, GatewayError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/rpc", self.base_url);
        debug!(method, "gateway rpc");
        let mut request = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&RpcRequest { method, params });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::rpc(method, "unauthorized"));
        }
        let envelope: RpcEnvelope = response.json().await.map_err(|e| {
            if status.is_success() {
                GatewayError::InvalidResponse(format!("{}: {}", method, e))
            } else {
                GatewayError::Transport(format!("HTTP {}", status))
            }
        })?;
        let payload = decode_envelope(method, envelope)?;
        serde_json::from_value(payload)
            .map_err(|e| GatewayError::InvalidResponse(format!("{}: {}", method, e)))
    }

    /// Keep the event stream open in the background, reconnecting with
    /// exponential backoff. Abort the handle to stop it.
    pub fn spawn_event_stream(&self) -> JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move { gateway.run_event_stream().await })
    }

    async fn run_event_stream(&self) {
        let mut backoff = Backoff::new();
        loop {
            let result = self.stream_events_once().await;
            self.connected.store(false, Ordering::SeqCst);
            if result.is_ok() {
                backoff.reset();
            }
            let delay = backoff.next_delay();
            match result {
                Ok(()) => info!(retry_in_ms = delay.as_millis() as u64, "event stream ended"),
                Err(err) => {
                    warn!(error = %err, retry_in_ms = delay.as_millis() as u64, "event stream unavailable");
                }
            }
            tokio::time::sleep(delay).await;
        }
    }

    async fn stream_events_once(&self) -> Result<(), GatewayError> {
        let url = format!("{}/events", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/x-ndjson");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::Transport(format!("HTTP {}", response.status())));
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(url = %url, "event stream connected");

        let mut stream = response.bytes_stream();
        let mut buffer = LineBuffer::default();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(error = %err, "event stream interrupted");
                    break;
                }
            };
            for line in buffer.push(&chunk) {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(error = %err, "dropped event line");
                        continue;
                    }
                };
                if let Some(event) = parse_event_line(&line) {
                    // Frames with no subscriber are dropped.
                    let _ = self.events.send(event);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayClient for HttpGateway {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn chat_history(
        &self,
        request: HistoryRequest,
    ) -> Result<HistoryResponse, GatewayError> {
        self.call("chat.history", &request).await
    }

    async fn chat_send(&self, request: ChatSendRequest) -> Result<ChatSendResponse, GatewayError> {
        self.call("chat.send", &request).await
    }

    async fn chat_abort(&self, request: ChatAbortRequest) -> Result<(), GatewayError> {
        let _: Value = self.call("chat.abort", &request).await?;
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, GatewayError> {
        let payload: SessionsListPayload = self
            .call("sessions.list", &serde_json::json!({}))
            .await?;
        Ok(payload.sessions)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }
}

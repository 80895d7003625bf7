//! GatewayClient trait: the port between the session logic and a gateway
//! transport.
//!
//! This trait lives in `gwchat-session` so the controller never depends on
//! `gwchat-interface`. `gwchat-interface` provides the HTTP implementation;
//! [`crate::MemoryGateway`] backs tests and offline mode.

use std::sync::Arc;

use async_trait::async_trait;
use gwchat_core::{AttachmentPayload, GatewayError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

// ── Request / response DTOs ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    pub session_key: String,
    pub limit: usize,
}

/// `chat.history` response. Messages stay raw JSON until the controller
/// normalizes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub thinking_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendRequest {
    pub session_key: String,
    pub message: String,
    pub attachments: Vec<AttachmentPayload>,
    pub deliver: bool,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendResponse {
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAbortRequest {
    pub session_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

/// A push frame from the gateway: `{event, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub event: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl GatewayEvent {
    pub const CHAT: &'static str = "chat";
    pub const TOOL: &'static str = "chat.tool";

    pub fn chat(payload: Value) -> Self {
        Self {
            event: Self::CHAT.to_string(),
            payload: Some(payload),
        }
    }
}

// ── Trait ────────────────────────────────────────────────────────────

#[async_trait]
pub trait GatewayClient: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn chat_history(&self, request: HistoryRequest)
    -> Result<HistoryResponse, GatewayError>;

    async fn chat_send(&self, request: ChatSendRequest) -> Result<ChatSendResponse, GatewayError>;

    async fn chat_abort(&self, request: ChatAbortRequest) -> Result<(), GatewayError>;

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, GatewayError>;

    /// Subscribe to push events. Every subscriber sees every frame sent after
    /// it subscribed.
    fn subscribe_events(&self) -> broadcast::Receiver<GatewayEvent>;
}

pub type DynGatewayClient = Arc<dyn GatewayClient>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_request_wire_shape() {
        let request = ChatSendRequest {
            session_key: "main".into(),
            message: "hi".into(),
            attachments: vec![AttachmentPayload {
                kind: "image".into(),
                mime_type: "image/png".into(),
                content: "QUJD".into(),
            }],
            deliver: false,
            idempotency_key: "run-1".into(),
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            value,
            json!({
                "sessionKey": "main",
                "message": "hi",
                "attachments": [{"type": "image", "mimeType": "image/png", "content": "QUJD"}],
                "deliver": false,
                "idempotencyKey": "run-1"
            })
        );
    }

    #[test]
    fn test_abort_request_omits_missing_run() {
        let value = serde_json::to_value(ChatAbortRequest {
            session_key: "main".into(),
            run_id: None,
        })
        .expect("serialize");
        assert_eq!(value, json!({"sessionKey": "main"}));
    }

    #[test]
    fn test_history_response_defaults() {
        let parsed: HistoryResponse = serde_json::from_value(json!({})).expect("parse");
        assert!(parsed.messages.is_empty());
        assert!(parsed.thinking_level.is_none());
    }
}

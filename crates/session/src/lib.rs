//! gwchat Session: chat session controller and composer logic.
//!
//! This crate owns canonical chat state. It depends on `gwchat-core` for the
//! transcript model and defines the `GatewayClient` trait that
//! `gwchat-interface` implements over HTTP.

pub mod composer;
pub mod controller;
pub mod gateway;
pub mod memory;

pub use composer::{
    CHAT_RESET_PREFIX, CHAT_STOP_COMMANDS, ChatHost, SubmitOutcome, SubmitOverride,
    is_chat_stop_command,
};
pub use controller::{
    ChatController, ChatEventState, ChatSessionState, DEFAULT_HISTORY_LIMIT, HistoryTicket,
    normalize_history,
};
pub use gateway::{
    ChatAbortRequest, ChatSendRequest, ChatSendResponse, DynGatewayClient, GatewayClient,
    GatewayEvent, HistoryRequest, HistoryResponse, SessionSummary,
};
pub use memory::MemoryGateway;

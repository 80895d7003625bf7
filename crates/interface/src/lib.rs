//! gwchat Interface - 交互层
//!
//! 职责：
//! - CLI 命令行工具
//! - HTTP gateway 客户端（RPC + 事件流）
//!
//! 架构：
//! - cli: 命令行接口，装配 gateway、会话与终端界面
//! - http_gateway: `GatewayClient` 的 HTTP 实现

pub mod cli;
pub mod http_gateway;

pub use cli::{CliError, run_cli};
pub use http_gateway::{HttpGateway, LineBuffer, decode_envelope, parse_event_line};

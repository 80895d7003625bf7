//! gwchat 配置系统
//!
//! 支持 YAML 配置文件和环境变量（`GWCHAT_*`）。命令行参数在 interface 层
//! 覆盖二者。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// gwchat 主配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GwchatConfig {
    /// Gateway 连接配置
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// 会话配置
    #[serde(default)]
    pub chat: ChatConfig,

    /// 终端界面配置
    #[serde(default)]
    pub ui: UiConfig,
}

/// Gateway 连接配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway 基础 URL
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Bearer token (可选)
    #[serde(default)]
    pub token: Option<String>,

    /// 请求超时 (秒)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:18789".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// 会话配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// 默认会话 key
    #[serde(default = "default_session")]
    pub default_session: String,

    /// 每次拉取的历史条数
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// 是否显示思考过程与工具输出
    #[serde(default)]
    pub show_thinking: bool,
}

fn default_session() -> String {
    "main".to_string()
}

fn default_history_limit() -> usize {
    200
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_session: default_session(),
            history_limit: default_history_limit(),
            show_thinking: false,
        }
    }
}

/// 终端界面配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiConfig {
    /// 是否显示队列侧栏
    #[serde(default = "default_true")]
    pub show_queue_panel: bool,

    /// 事件循环轮询间隔 (毫秒)
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// 日志文件路径 (TUI 模式下日志不能写到终端)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_tick_ms() -> u64 {
    50
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            show_queue_panel: true,
            tick_ms: default_tick_ms(),
            log_file: None,
        }
    }
}

impl GwchatConfig {
    /// Load from the resolved config path (if it exists), then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading config");
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(url) = env_string("GWCHAT_GATEWAY_URL") {
            self.gateway.url = url;
        }
        if let Some(token) = env_string("GWCHAT_GATEWAY_TOKEN") {
            self.gateway.token = Some(token);
        }
        if let Some(session) = env_string("GWCHAT_SESSION") {
            self.chat.default_session = session;
        }
        if let Some(raw) = env_string("GWCHAT_SHOW_THINKING") {
            self.chat.show_thinking = parse_bool(&raw).ok_or(ConfigError::InvalidEnv {
                key: "GWCHAT_SHOW_THINKING".to_string(),
                value: raw,
            })?;
        }
        if let Some(raw) = env_string("GWCHAT_HISTORY_LIMIT") {
            self.chat.history_limit = raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidEnv {
                    key: "GWCHAT_HISTORY_LIMIT".to_string(),
                    value: raw,
                })?;
        }
        Ok(())
    }
}

/// Config file resolution: `$GWCHAT_CONFIG`, then `./.gwchat/config.yaml`,
/// then `<config_dir>/gwchat/config.yaml`.
pub fn config_file_path() -> Option<PathBuf> {
    if let Some(path) = env_string("GWCHAT_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from(".gwchat").join("config.yaml");
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir().map(|dir| dir.join("gwchat").join("config.yaml"))
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

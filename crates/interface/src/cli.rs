//! CLI - Command Line Interface
//!
//! Commands:
//! - gwchat chat              - interactive terminal chat (default)
//! - gwchat send "message"    - one-shot send, optionally waiting for the reply
//! - gwchat history           - print the session transcript
//! - gwchat sessions          - list gateway sessions
//! - gwchat abort             - abort the active run in a session

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, TimeZone};
use clap::{ArgAction, Args, Parser, Subcommand};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gwchat_core::{
    AttachmentError, ChatAttachment, ConfigError, GatewayError, GwchatConfig, Message, RoleClass,
    extract_text, extract_thinking, normalize_role_for_grouping,
};
use gwchat_session::{
    ChatController, ChatHost, DynGatewayClient, GatewayClient, GatewayEvent, MemoryGateway,
};
use gwchat_tui::{ChatRuntime, ChatViewState, run_chat_tui};

use crate::http_gateway::HttpGateway;

/// CLI Errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Attachment error: {0}")]
    Attachment(#[from] AttachmentError),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("No reply within {0}s")]
    WaitTimeout(u64),

    #[error("Terminal error: {0}")]
    Terminal(#[from] std::io::Error),
}

/// gwchat CLI
#[derive(Parser, Debug)]
#[command(name = "gwchat")]
#[command(author, version, about = "Terminal client for a chat gateway", long_about = None)]
pub(crate) struct Cli {
    /// Gateway base URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// Bearer token for the gateway
    #[arg(long, global = true)]
    token: Option<String>,

    /// Session key
    #[arg(short, long, global = true)]
    session: Option<String>,

    /// Show thinking and tool output
    #[arg(long, global = true)]
    thinking: bool,

    /// Use an in-process echo gateway instead of the network
    #[arg(long, global = true)]
    offline: bool,

    /// Verbose logging (repeat for more)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Open the interactive chat view
    Chat(ChatArgs),

    /// Send one message
    Send(SendArgs),

    /// Print the session transcript
    History(HistoryArgs),

    /// List gateway sessions
    Sessions,

    /// Abort the active run
    Abort,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ChatArgs {
    /// Log file (the terminal is taken by the chat view)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct SendArgs {
    /// Message text
    pub message: String,

    /// Attach an image (repeatable)
    #[arg(short, long)]
    pub attach: Vec<PathBuf>,

    /// Wait for the run to finish and print the reply
    #[arg(short, long)]
    pub wait: bool,

    /// Seconds to wait for the reply
    #[arg(long, default_value_t = 120)]
    pub wait_secs: u64,
}

#[derive(Args, Debug)]
pub(crate) struct HistoryArgs {
    /// Number of messages to fetch
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Parse CLI arguments and execute commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = GwchatConfig::load()?;
    apply_cli_overrides(&cli, &mut config);

    let command = cli.command.unwrap_or(Commands::Chat(ChatArgs::default()));
    match &command {
        Commands::Chat(args) => {
            let path = args
                .log_file
                .clone()
                .or_else(|| config.ui.log_file.clone())
                .unwrap_or_else(default_log_file);
            init_file_tracing(cli.verbose, &path)?;
        }
        _ => init_stderr_tracing(cli.verbose),
    }

    let gateway = GatewayHandle::connect(&config, cli.offline)?;
    let result = match command {
        Commands::Chat(_) => cmd_chat(&gateway, &config).await,
        Commands::Send(args) => cmd_send(&gateway, &config, args).await,
        Commands::History(args) => cmd_history(&gateway, &config, args).await,
        Commands::Sessions => cmd_sessions(&gateway).await,
        Commands::Abort => cmd_abort(&gateway, &config).await,
    };
    gateway.shutdown();
    result.map_err(Into::into)
}

fn apply_cli_overrides(cli: &Cli, config: &mut GwchatConfig) {
    if let Some(url) = &cli.url {
        config.gateway.url = url.clone();
    }
    if let Some(token) = &cli.token {
        config.gateway.token = Some(token.clone());
    }
    if let Some(session) = &cli.session {
        config.chat.default_session = session.clone();
    }
    if cli.thinking {
        config.chat.show_thinking = true;
    }
}

// ── Tracing ─────────────────────────────────────────────────────────

fn log_filter(verbose: u8) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env("GWCHAT_LOG") {
        return filter;
    }
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    EnvFilter::new(level)
}

fn init_stderr_tracing(verbose: u8) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn init_file_tracing(verbose: u8, path: &Path) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose.max(1)))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init();
    Ok(())
}

fn default_log_file() -> PathBuf {
    std::env::temp_dir().join("gwchat").join("gwchat.log")
}

// ── Gateway wiring ──────────────────────────────────────────────────

struct GatewayHandle {
    client: DynGatewayClient,
    http: Option<HttpGateway>,
    stream: Mutex<Option<JoinHandle<()>>>,
}

impl GatewayHandle {
    fn connect(config: &GwchatConfig, offline: bool) -> Result<Self, CliError> {
        if offline {
            info!("using offline echo gateway");
            return Ok(Self {
                client: Arc::new(MemoryGateway::with_echo()),
                http: None,
                stream: Mutex::new(None),
            });
        }
        let http = HttpGateway::new(&config.gateway)?;
        info!(url = %http.base_url(), "using http gateway");
        Ok(Self {
            client: Arc::new(http.clone()),
            http: Some(http),
            stream: Mutex::new(None),
        })
    }

    /// Open the push stream. Offline gateways push in-process.
    fn start_events(&self) {
        let Some(http) = &self.http else {
            return;
        };
        let mut stream = self.stream.lock().unwrap_or_else(|p| p.into_inner());
        if stream.is_none() {
            *stream = Some(http.spawn_event_stream());
        }
    }

    /// One-shot commands talk RPC only and treat the gateway as reachable
    /// until a request says otherwise.
    fn assume_connected(&self) {
        if let Some(http) = &self.http {
            http.set_connected(true);
        }
    }

    fn shutdown(&self) {
        let mut stream = self.stream.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = stream.take() {
            handle.abort();
        }
    }

    fn controller(&self, config: &GwchatConfig, history_limit: Option<usize>) -> ChatController {
        let mut controller = ChatController::with_history_limit(
            config.chat.default_session.clone(),
            history_limit.unwrap_or(config.chat.history_limit),
        );
        controller.set_connected(true);
        controller
    }
}

// ── Commands ────────────────────────────────────────────────────────

async fn cmd_chat(gateway: &GatewayHandle, config: &GwchatConfig) -> Result<(), CliError> {
    gateway.start_events();
    // Connection state follows the event stream once the view is up.
    let controller = ChatController::with_history_limit(
        config.chat.default_session.clone(),
        config.chat.history_limit,
    );
    let host = ChatHost::new(controller);
    let mut runtime = ChatRuntime::new(host, gateway.client.clone(), config.chat.show_thinking);
    let mut view = ChatViewState::new(config.ui.show_queue_panel);
    let tick = Duration::from_millis(config.ui.tick_ms.max(10));
    info!(session = %config.chat.default_session, "starting chat view");
    run_chat_tui(&mut runtime, &mut view, tick).await?;
    Ok(())
}

async fn cmd_send(
    gateway: &GatewayHandle,
    config: &GwchatConfig,
    args: SendArgs,
) -> Result<(), CliError> {
    let attachments = args
        .attach
        .iter()
        .map(|path| ChatAttachment::from_path(path))
        .collect::<Result<Vec<_>, _>>()?;

    let mut events = gateway.client.subscribe_events();
    if args.wait {
        gateway.start_events();
        wait_for_connection(gateway, Duration::from_secs(args.wait_secs)).await?;
    } else {
        gateway.assume_connected();
    }

    let client: &dyn GatewayClient = gateway.client.as_ref();
    let mut controller = gateway.controller(config, None);
    let Some(run_id) = controller
        .send_chat_message(client, &args.message, &attachments)
        .await
    else {
        let reason = controller
            .state()
            .last_error
            .clone()
            .unwrap_or_else(|| "nothing to send".to_string());
        return Err(CliError::SendFailed(reason));
    };

    if !args.wait {
        println!("{}", run_id);
        return Ok(());
    }

    let timeout = Duration::from_secs(args.wait_secs);
    tokio::time::timeout(timeout, wait_for_run(&mut controller, &mut events))
        .await
        .map_err(|_| CliError::WaitTimeout(args.wait_secs))?;

    if let Some(err) = controller.state().last_error.clone() {
        return Err(CliError::SendFailed(err));
    }
    controller.load_chat_history(client).await;
    let reply = controller
        .state()
        .messages
        .iter()
        .rev()
        .find(|m| normalize_role_for_grouping(&m.role) == RoleClass::Assistant)
        .and_then(extract_text);
    if let Some(reply) = reply {
        println!("{}", reply);
    }
    Ok(())
}

async fn wait_for_connection(gateway: &GatewayHandle, limit: Duration) -> Result<(), CliError> {
    let poll = async {
        while !gateway.client.is_connected() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    tokio::time::timeout(limit, poll)
        .await
        .map_err(|_| CliError::Gateway(GatewayError::Disconnected))
}

/// Feed push events into the controller until the tracked run settles.
async fn wait_for_run(
    controller: &mut ChatController,
    events: &mut tokio::sync::broadcast::Receiver<GatewayEvent>,
) {
    use tokio::sync::broadcast::error::RecvError;

    while controller.state().run_id.is_some() {
        match events.recv().await {
            Ok(event) if event.event == GatewayEvent::CHAT => {
                if let Some(state) = controller.handle_chat_event(event.payload.as_ref()) {
                    debug!(state = state.as_str(), "chat event");
                }
            }
            Ok(event) if event.event == GatewayEvent::TOOL => {
                controller.handle_tool_event(event.payload.as_ref());
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "event receiver lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn cmd_history(
    gateway: &GatewayHandle,
    config: &GwchatConfig,
    args: HistoryArgs,
) -> Result<(), CliError> {
    gateway.assume_connected();
    let mut controller = gateway.controller(config, args.limit);
    if !controller.load_chat_history(gateway.client.as_ref()).await {
        let reason = controller
            .state()
            .last_error
            .clone()
            .unwrap_or_else(|| "history unavailable".to_string());
        return Err(CliError::Gateway(GatewayError::rpc("chat.history", reason)));
    }
    for message in &controller.state().messages {
        for line in format_transcript_entry(message, config.chat.show_thinking) {
            println!("{}", line);
        }
    }
    Ok(())
}

async fn cmd_sessions(gateway: &GatewayHandle) -> Result<(), CliError> {
    gateway.assume_connected();
    let sessions = gateway.client.list_sessions().await?;
    if sessions.is_empty() {
        println!("(no sessions)");
    }
    for session in sessions {
        let label = session.label.unwrap_or_default();
        let updated = session
            .updated_at
            .map(format_timestamp)
            .unwrap_or_default();
        println!("{:<24} {:<24} {}", session.key, label, updated);
    }
    Ok(())
}

async fn cmd_abort(gateway: &GatewayHandle, config: &GwchatConfig) -> Result<(), CliError> {
    gateway.assume_connected();
    let mut controller = gateway.controller(config, None);
    if controller.abort_chat_run(gateway.client.as_ref()).await {
        println!("abort requested for {}", controller.session_key());
        return Ok(());
    }
    let reason = controller
        .state()
        .last_error
        .clone()
        .unwrap_or_else(|| "abort rejected".to_string());
    Err(CliError::Gateway(GatewayError::rpc("chat.abort", reason)))
}

// ── Output ──────────────────────────────────────────────────────────

fn format_timestamp(ms: i64) -> String {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

/// Plain-text rendering of one transcript entry for `history`.
pub(crate) fn format_transcript_entry(message: &Message, show_thinking: bool) -> Vec<String> {
    let role = normalize_role_for_grouping(&message.role);
    if role == RoleClass::Tool && !show_thinking {
        return Vec::new();
    }
    let mut lines = Vec::new();
    let stamp = if message.timestamp > 0 {
        format!("[{}] ", format_timestamp(message.timestamp))
    } else {
        String::new()
    };
    if let Some(marker) = &message.marker
        && marker.is_compaction()
    {
        lines.push(format!("{}-- compaction --", stamp));
        return lines;
    }
    if show_thinking && let Some(thinking) = extract_thinking(message) {
        for line in thinking.lines() {
            lines.push(format!("  ~ {}", line));
        }
    }
    let text = extract_text(message).unwrap_or_default();
    if text.is_empty() && lines.is_empty() {
        return lines;
    }
    lines.insert(0, format!("{}{}:", stamp, role));
    lines.extend(text.lines().map(|line| format!("  {}", line)));
    lines
}

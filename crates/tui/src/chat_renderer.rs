//! Chat Renderer: thread messages to styled terminal lines.

use chrono::{DateTime, Local};
use gwchat_core::{ToolCard, ToolCardKind};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

use crate::chat_items::ChatItem;
use crate::layout_manager::truncate_output;
use crate::runtime_adapter::{ThreadMessage, ThreadPart, ThreadRole, ThreadStatus};

const TOOL_PREVIEW_CHARS: usize = 160;
const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

#[derive(Debug, Clone, Copy)]
pub struct TuiTheme {
    pub text_strong: Color,
    pub text_base: Color,
    pub text_muted: Color,
    pub text_dim: Color,
    pub primary: Color,
    pub success: Color,
    pub warning: Color,
    pub danger: Color,
    pub user_accent: Color,
    pub assistant_accent: Color,
    pub tool_accent: Color,
    pub thinking_accent: Color,
    pub border_normal: Color,
    pub border_active: Color,
}

impl TuiTheme {
    pub fn default_dark() -> Self {
        Self {
            text_strong: Color::White,
            text_base: Color::Gray,
            text_muted: Color::DarkGray,
            text_dim: Color::Rgb(100, 100, 100),
            primary: Color::Cyan,
            success: Color::Green,
            warning: Color::Yellow,
            danger: Color::Red,
            user_accent: Color::Blue,
            assistant_accent: Color::Cyan,
            tool_accent: Color::Gray,
            thinking_accent: Color::Magenta,
            border_normal: Color::DarkGray,
            border_active: Color::Cyan,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Show only the header line of each tool card.
    pub tools_collapsed: bool,
    /// Animation frame for running messages.
    pub tick: usize,
}

pub fn spinner_frame(tick: usize) -> &'static str {
    SPINNER_FRAMES[tick % SPINNER_FRAMES.len()]
}

fn format_clock(timestamp_ms: i64) -> Option<String> {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.with_timezone(&Local).format("%H:%M").to_string())
}

/// Render a full thread to styled lines, blank line between messages.
pub fn style_thread_messages(
    messages: &[ThreadMessage],
    theme: &TuiTheme,
    options: &RenderOptions,
) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for (index, message) in messages.iter().enumerate() {
        if index > 0 {
            lines.push(Line::default());
        }
        style_thread_message(message, theme, options, &mut lines);
    }
    lines
}

pub fn style_thread_message(
    message: &ThreadMessage,
    theme: &TuiTheme,
    options: &RenderOptions,
    lines: &mut Vec<Line<'static>>,
) {
    match &message.metadata {
        ChatItem::Divider { label, .. } => {
            lines.push(Line::from(Span::styled(
                format!("  ── {} ──", label),
                Style::default()
                    .fg(theme.text_dim)
                    .add_modifier(Modifier::DIM),
            )));
            return;
        }
        ChatItem::ReadingIndicator { .. } => {
            lines.push(Line::from(vec![
                Span::styled(
                    format!("  {} ", spinner_frame(options.tick)),
                    Style::default().fg(theme.assistant_accent),
                ),
                Span::styled("Assistant is reading…", Style::default().fg(theme.text_muted)),
            ]));
            return;
        }
        _ => {}
    }
    if message.role == ThreadRole::System {
        for part in &message.parts {
            if let ThreadPart::Text(text) = part {
                for l in text.lines() {
                    lines.push(Line::from(vec![
                        Span::styled("  ◆ ", Style::default().fg(theme.warning)),
                        Span::styled(l.to_string(), Style::default().fg(theme.warning)),
                    ]));
                }
            }
        }
        return;
    }

    let (label, accent, body_color) = match message.role {
        ThreadRole::User => ("You", theme.user_accent, theme.text_strong),
        _ => ("Assistant", theme.assistant_accent, theme.text_base),
    };
    let running = message.status == ThreadStatus::Running;

    // Header: ▌ You · 12:03
    let mut header = vec![
        Span::styled("▌ ", Style::default().fg(accent)),
        Span::styled(
            label.to_string(),
            Style::default().fg(accent).add_modifier(Modifier::BOLD),
        ),
    ];
    if let Some(clock) = message.created_at.and_then(format_clock) {
        header.push(Span::styled(
            format!(" · {}", clock),
            Style::default().fg(theme.text_muted),
        ));
    }
    if running {
        header.push(Span::styled(
            format!(" {}", spinner_frame(options.tick)),
            Style::default().fg(theme.warning),
        ));
    }
    lines.push(Line::from(header));

    let gutter = || Span::styled("│ ", Style::default().fg(accent));
    let mut wrote_body = false;
    for part in &message.parts {
        match part {
            ThreadPart::Text(text) => {
                for l in text.lines() {
                    lines.push(Line::from(vec![
                        gutter(),
                        Span::styled(l.to_string(), Style::default().fg(body_color)),
                    ]));
                }
                wrote_body = true;
            }
            ThreadPart::Reasoning(text) => {
                lines.push(Line::from(vec![
                    gutter(),
                    Span::styled("▾ ", Style::default().fg(theme.thinking_accent)),
                    Span::styled(
                        "Thinking",
                        Style::default()
                            .fg(theme.thinking_accent)
                            .add_modifier(Modifier::BOLD),
                    ),
                ]));
                for l in text.lines() {
                    lines.push(Line::from(vec![
                        gutter(),
                        Span::styled("  ", Style::default()),
                        Span::styled(l.to_string(), Style::default().fg(theme.text_muted)),
                    ]));
                }
                wrote_body = true;
            }
            ThreadPart::Tool(card) => {
                style_tool_card(card, theme, options, accent, lines);
                wrote_body = true;
            }
            ThreadPart::Image { mime_type, bytes } => {
                lines.push(Line::from(vec![
                    gutter(),
                    Span::styled(
                        format!("[image {} · {}]", mime_type, format_bytes(*bytes)),
                        Style::default().fg(theme.primary),
                    ),
                ]));
                wrote_body = true;
            }
        }
    }
    if running && matches!(message.metadata, ChatItem::Stream { .. }) {
        lines.push(Line::from(vec![
            gutter(),
            Span::styled("▍", Style::default().fg(theme.assistant_accent)),
        ]));
    } else if !wrote_body {
        lines.push(Line::from(vec![gutter(), Span::styled("", Style::default())]));
    }
    lines.push(Line::from(Span::styled("└─", Style::default().fg(accent))));
}

fn style_tool_card(
    card: &ToolCard,
    theme: &TuiTheme,
    options: &RenderOptions,
    accent: Color,
    lines: &mut Vec<Line<'static>>,
) {
    let icon = if options.tools_collapsed { "▸" } else { "▾" };
    let (status_icon, status_color) = match (card.kind, card.is_error) {
        (ToolCardKind::Call, _) => ("⟳", theme.warning),
        (ToolCardKind::Result, false) => ("✓", theme.success),
        (ToolCardKind::Result, true) => ("✗", theme.danger),
    };
    // Header: │ ▸/▾ ✓/✗/⟳ name (call)
    lines.push(Line::from(vec![
        Span::styled("│ ", Style::default().fg(accent)),
        Span::styled(format!("{} ", icon), Style::default().fg(theme.tool_accent)),
        Span::styled(status_icon.to_string(), Style::default().fg(status_color)),
        Span::styled(
            format!(" {}", card.name),
            Style::default().fg(theme.text_strong),
        ),
        Span::styled(
            format!(" ({})", card.kind.label()),
            Style::default().fg(theme.text_muted),
        ),
    ]));
    if options.tools_collapsed {
        return;
    }
    let preview = |text: &str| {
        let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let (mut shown, truncated) = truncate_output(&flat, TOOL_PREVIEW_CHARS);
        if truncated {
            shown.push('…');
        }
        shown
    };
    if let Some(args) = &card.arguments {
        lines.push(Line::from(vec![
            Span::styled("│ ", Style::default().fg(accent)),
            Span::styled("  ├─ input : ", Style::default().fg(theme.text_muted)),
            Span::styled(preview(args), Style::default().fg(theme.text_base)),
        ]));
    }
    if let Some(result) = &card.result {
        let prefix = if card.is_error { "error " } else { "output" };
        lines.push(Line::from(vec![
            Span::styled("│ ", Style::default().fg(accent)),
            Span::styled(
                format!("  └─ {}: ", prefix),
                Style::default().fg(theme.text_muted),
            ),
            Span::styled(preview(result), Style::default().fg(theme.text_base)),
        ]));
    }
}

fn format_bytes(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

//! Layout Manager: TUI layout calculation and status bars.

use gwchat_core::ChatAttachment;
use gwchat_session::ChatSessionState;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

use crate::chat_renderer::{TuiTheme, spinner_frame};

pub const TUI_SCROLL_STEP: usize = 3;

#[derive(Debug, Clone)]
pub struct TuiSessionViewState {
    pub scroll_offset: usize,
    pub auto_follow: bool,
    pub body_height: usize,
}

impl Default for TuiSessionViewState {
    fn default() -> Self {
        Self {
            scroll_offset: 0,
            auto_follow: true,
            body_height: 1,
        }
    }
}

pub fn short_session_id(value: Option<&str>) -> String {
    let session = value.unwrap_or("-");
    let max = 12usize;
    if session.chars().count() <= max {
        return session.to_string();
    }
    let prefix = session.chars().take(max).collect::<String>();
    format!("{}…", prefix)
}

pub fn truncate_output(text: &str, max_chars: usize) -> (String, bool) {
    if text.len() <= max_chars {
        (text.to_string(), false)
    } else {
        let mut end = max_chars;
        while !text.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        (text[..end].to_string(), true)
    }
}

/// One-word description of what the session is doing right now.
pub fn run_state_label(state: &ChatSessionState) -> &'static str {
    if !state.connected {
        "offline"
    } else if state.loading {
        "loading"
    } else if state.stream.is_some() {
        "streaming"
    } else if state.sending || state.run_id.is_some() {
        "waiting"
    } else {
        "idle"
    }
}

pub fn build_title_bar<'a>(state: &ChatSessionState, show_thinking: bool, theme: &TuiTheme) -> Line<'a> {
    let (conn_text, conn_color) = if state.connected {
        ("●", theme.success)
    } else {
        ("○", theme.danger)
    };
    let label = run_state_label(state);
    let state_color = match label {
        "idle" => theme.text_muted,
        "offline" => theme.danger,
        _ => theme.warning,
    };
    let mut spans = vec![
        Span::styled(
            " GWCHAT ",
            Style::default()
                .fg(theme.primary)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!("{} ", conn_text), Style::default().fg(conn_color)),
        Span::styled(
            short_session_id(Some(&state.session_key)),
            Style::default().fg(theme.primary),
        ),
    ];
    if let Some(level) = state.thinking_level.as_deref() {
        spans.push(Span::styled(
            format!("  think:{}", level),
            Style::default().fg(theme.thinking_accent),
        ));
    }
    if show_thinking {
        spans.push(Span::styled(
            "  [tools]",
            Style::default().fg(theme.tool_accent),
        ));
    }
    spans.push(Span::styled(
        format!("  {}", label),
        Style::default().fg(state_color),
    ));
    Line::from(spans)
}

/// Second row: last error, else run progress.
pub fn build_run_status_line<'a>(state: &ChatSessionState, tick: usize, theme: &TuiTheme) -> Line<'a> {
    if let Some(err) = &state.last_error {
        return Line::from(vec![
            Span::styled(
                " ✗ ",
                Style::default()
                    .fg(theme.danger)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(err.clone(), Style::default().fg(theme.danger)),
        ]);
    }
    let text = match run_state_label(state) {
        "offline" => " Disconnected from gateway".to_string(),
        "loading" => format!(" {} Loading history…", spinner_frame(tick)),
        "streaming" => format!(
            " {} Streaming · {} chars",
            spinner_frame(tick),
            state.stream.as_deref().map(|s| s.chars().count()).unwrap_or(0)
        ),
        "waiting" => format!(" {} Waiting for reply…", spinner_frame(tick)),
        _ => format!(" {} messages", state.messages.len()),
    };
    Line::from(Span::styled(text, Style::default().fg(theme.text_muted)))
}

pub fn build_attachment_bar<'a>(attachments: &[ChatAttachment], theme: &TuiTheme) -> Line<'a> {
    let mut spans = vec![Span::styled(" 📎 ", Style::default().fg(theme.primary))];
    for (index, attachment) in attachments.iter().enumerate() {
        if index > 0 {
            spans.push(Span::styled("  ", Style::default()));
        }
        spans.push(Span::styled(
            format!("[{}] {}", index + 1, attachment.mime_type),
            Style::default().fg(theme.text_base),
        ));
    }
    spans.push(Span::styled(
        "  /detach N",
        Style::default().fg(theme.text_muted),
    ));
    Line::from(spans)
}

pub fn build_status_hint_bar<'a>(
    queued: usize,
    show_thinking: bool,
    is_busy: bool,
    theme: &TuiTheme,
) -> Line<'a> {
    let dim = Style::default().fg(theme.text_muted);
    let sep = Span::styled(" │ ", Style::default().fg(theme.border_normal));
    let mut spans = vec![Span::styled(" /help", dim), sep.clone()];
    spans.push(Span::styled(
        format!("thinking:{}", if show_thinking { "on" } else { "off" }),
        dim,
    ));
    spans.push(sep.clone());
    if queued > 0 {
        spans.push(Span::styled(
            format!("queue:{}", queued),
            Style::default().fg(theme.warning),
        ));
        spans.push(sep.clone());
    }
    if is_busy {
        spans.push(Span::styled(
            "Enter queue  Ctrl+C abort  PgUp/Dn scroll",
            Style::default().fg(Color::Rgb(100, 100, 100)),
        ));
    } else {
        spans.push(Span::styled(
            "Shift+Enter newline  ↑↓ history  PgUp/Dn scroll  Ctrl+C/Esc exit",
            Style::default().fg(Color::Rgb(100, 100, 100)),
        ));
    }
    Line::from(spans)
}

fn to_u16(n: usize) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}

pub fn input_line_count(input: &str) -> u16 {
    let newlines = input.chars().filter(|c| *c == '\n').count();
    to_u16(newlines).saturating_add(1).clamp(1, 4)
}

/// Cursor cell at the end of `input` inside the bordered input `area`,
/// kept within the border.
pub fn input_cursor_position(area: Rect, input: &str) -> (u16, u16) {
    let last_line = input.rsplit('\n').next().unwrap_or(input);
    let column = to_u16(last_line.chars().count());
    let row = to_u16(input.chars().filter(|c| *c == '\n').count());
    let max_x = area.x.saturating_add(area.width.saturating_sub(2));
    let max_y = area.y.saturating_add(area.height.saturating_sub(2));
    let x = area.x.saturating_add(1).saturating_add(column).min(max_x);
    let y = area.y.saturating_add(1).saturating_add(row).min(max_y);
    (x, y)
}

pub fn tui_layout_constraints(has_attachments: bool, input_lines: u16) -> Vec<Constraint> {
    let input_height = input_lines.saturating_add(2);
    let mut c = vec![
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Min(5),
    ];
    if has_attachments {
        c.push(Constraint::Length(1));
    }
    c.push(Constraint::Length(1));
    c.push(Constraint::Length(input_height));
    c
}

/// Split a conversation body area horizontally into (conversation, queue_sidebar).
///
/// When `show_queue` is true and the area is wide enough (>= 60 columns),
/// the right 28 columns are allocated to the queue sidebar.
pub fn tui_session_split(area: Rect, show_queue: bool) -> (Rect, Option<Rect>) {
    if !show_queue || area.width < 60 {
        return (area, None);
    }
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(30), Constraint::Length(28)])
        .split(area);
    (chunks[0], Some(chunks[1]))
}

pub fn calc_log_scroll_usize(line_count: usize, body_height: usize) -> usize {
    line_count.saturating_sub(body_height)
}

pub fn effective_log_scroll(line_count: usize, session_view: &TuiSessionViewState) -> usize {
    let max_scroll = calc_log_scroll_usize(line_count, session_view.body_height);
    if session_view.auto_follow {
        max_scroll
    } else {
        session_view.scroll_offset.min(max_scroll)
    }
}

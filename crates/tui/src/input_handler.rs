//! Input Handler: input history, keymaps, local slash commands, scrolling.

use std::collections::VecDeque;
use std::path::PathBuf;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use gwchat_core::parse_bool;

use crate::layout_manager::{
    TUI_SCROLL_STEP, TuiSessionViewState, calc_log_scroll_usize, effective_log_scroll,
};

/// Sent prompts, newest last. Browsing with Up/Down stashes the unsent
/// input and gives it back when walking past the newest entry.
#[derive(Debug, Clone)]
pub struct InputHistory {
    entries: VecDeque<String>,
    capacity: usize,
    position: Option<usize>,
    stash: String,
}

impl InputHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            position: None,
            stash: String::new(),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Record a sent prompt. Blank input is skipped and a repeat moves to
    /// the end.
    pub fn push(&mut self, entry: String) {
        self.position = None;
        if entry.trim().is_empty() {
            return;
        }
        self.entries.retain(|e| *e != entry);
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn up(&mut self, current_input: &str) -> Option<&str> {
        let last = self.entries.len().checked_sub(1)?;
        let next = match self.position {
            None => {
                self.stash = current_input.to_string();
                last
            }
            Some(i) => i.saturating_sub(1),
        };
        self.position = Some(next);
        self.entries.get(next).map(String::as_str)
    }

    pub fn down(&mut self) -> Option<&str> {
        let i = self.position?;
        if i + 1 < self.entries.len() {
            self.position = Some(i + 1);
            return self.entries.get(i + 1).map(String::as_str);
        }
        self.position = None;
        Some(self.stash.as_str())
    }

    pub fn reset(&mut self) {
        self.position = None;
        self.stash.clear();
    }
}

// ── Shortcuts ───────────────────────────────────────────────────────

/// Ctrl+<char> bindings, overridable through `GWCHAT_KEY_*`.
#[derive(Debug, Clone)]
pub struct ChatTuiKeymap {
    pub toggle_thinking: char,
    pub toggle_queue_panel: char,
    pub toggle_tool_cards: char,
    pub retry: char,
    pub edit_last: char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuiShortcutAction {
    ToggleThinking,
    ToggleQueuePanel,
    ToggleToolCards,
    Retry,
    EditLast,
}

impl ChatTuiKeymap {
    pub fn from_env() -> Self {
        Self {
            toggle_thinking: env_char("GWCHAT_KEY_TOGGLE_THINKING", 't'),
            toggle_queue_panel: env_char("GWCHAT_KEY_TOGGLE_QUEUE", 'b'),
            toggle_tool_cards: env_char("GWCHAT_KEY_TOGGLE_TOOL_CARDS", 'o'),
            retry: env_char("GWCHAT_KEY_RETRY", 'r'),
            edit_last: env_char("GWCHAT_KEY_EDIT_LAST", 'e'),
        }
    }

    fn bindings(&self) -> [(char, TuiShortcutAction); 5] {
        [
            (self.toggle_thinking, TuiShortcutAction::ToggleThinking),
            (self.toggle_queue_panel, TuiShortcutAction::ToggleQueuePanel),
            (self.toggle_tool_cards, TuiShortcutAction::ToggleToolCards),
            (self.retry, TuiShortcutAction::Retry),
            (self.edit_last, TuiShortcutAction::EditLast),
        ]
    }
}

pub fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().as_deref().and_then(parse_bool)
}

/// First ASCII alphanumeric char of `key`, lowercased, else `default`.
pub fn env_char(key: &str, default: char) -> char {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().chars().next())
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .unwrap_or(default)
}

pub fn key_is_ctrl_char(key: &KeyEvent, ch: char) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char(c) if c.eq_ignore_ascii_case(&ch))
}

pub fn detect_tui_shortcut(key: &KeyEvent, keymap: &ChatTuiKeymap) -> Option<TuiShortcutAction> {
    keymap
        .bindings()
        .into_iter()
        .find(|(ch, _)| key_is_ctrl_char(key, *ch))
        .map(|(_, action)| action)
}

// ── Local commands ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct SlashCommandSpec {
    pub command: &'static str,
    pub summary: &'static str,
}

pub const SLASH_COMMAND_SPECS: &[SlashCommandSpec] = &[
    SlashCommandSpec {
        command: "/session <key>",
        summary: "switch to another session",
    },
    SlashCommandSpec {
        command: "/sessions",
        summary: "list gateway sessions",
    },
    SlashCommandSpec {
        command: "/attach <path>",
        summary: "attach an image file",
    },
    SlashCommandSpec {
        command: "/detach <n>",
        summary: "remove a pending attachment",
    },
    SlashCommandSpec {
        command: "/dequeue <n>",
        summary: "drop a queued message",
    },
    SlashCommandSpec {
        command: "/thinking",
        summary: "toggle reasoning and tool output",
    },
    SlashCommandSpec {
        command: "/retry",
        summary: "resend the last prompt",
    },
    SlashCommandSpec {
        command: "/reload",
        summary: "reload history",
    },
    SlashCommandSpec {
        command: "/stop",
        summary: "abort the active run",
    },
    SlashCommandSpec {
        command: "/new",
        summary: "start a fresh session on the gateway",
    },
    SlashCommandSpec {
        command: "/quit",
        summary: "exit",
    },
];

/// A slash command handled by the TUI itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TuiCommand {
    SwitchSession(String),
    ListSessions,
    Attach(PathBuf),
    /// 1-based index into pending attachments.
    Detach(usize),
    /// 1-based index into the queue.
    Dequeue(usize),
    ToggleThinking,
    Retry,
    Reload,
    Help,
    Quit,
}

/// Parse a local command. `None` means the input goes to the composer
/// unchanged (plain text, stop commands, `/new`, unknown slash commands).
pub fn parse_tui_command(input: &str) -> Option<Result<TuiCommand, String>> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let (command, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((command, arg)) => (command, arg.trim()),
        None => (trimmed, ""),
    };
    let index = |name: &str| -> Result<usize, String> {
        arg.parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| format!("usage: {} <n>", name))
    };
    let parsed = match command.to_lowercase().as_str() {
        "/session" | "/s" => {
            if arg.is_empty() {
                Err("usage: /session <key>".to_string())
            } else {
                Ok(TuiCommand::SwitchSession(arg.to_string()))
            }
        }
        "/sessions" => Ok(TuiCommand::ListSessions),
        "/attach" | "/a" => {
            if arg.is_empty() {
                Err("usage: /attach <path>".to_string())
            } else {
                Ok(TuiCommand::Attach(PathBuf::from(arg)))
            }
        }
        "/detach" => index("/detach").map(TuiCommand::Detach),
        "/dequeue" => index("/dequeue").map(TuiCommand::Dequeue),
        "/thinking" | "/t" => Ok(TuiCommand::ToggleThinking),
        "/retry" => Ok(TuiCommand::Retry),
        "/reload" => Ok(TuiCommand::Reload),
        "/help" | "/h" => Ok(TuiCommand::Help),
        "/quit" | "/exit" | "/q" => Ok(TuiCommand::Quit),
        _ => return None,
    };
    Some(parsed)
}

pub fn help_lines() -> Vec<String> {
    SLASH_COMMAND_SPECS
        .iter()
        .map(|spec| format!("{:<16} {}", spec.command, spec.summary))
        .collect()
}

// ── Scrolling ───────────────────────────────────────────────────────

pub fn move_session_scroll(session_view: &mut TuiSessionViewState, line_count: usize, delta: isize) {
    let max_scroll = calc_log_scroll_usize(line_count, session_view.body_height);
    let current = effective_log_scroll(line_count, session_view);
    let next = current.saturating_add_signed(delta).min(max_scroll);
    session_view.scroll_offset = next;
    session_view.auto_follow = next >= max_scroll;
}

/// Scroll keys for the thread body. Returns `true` when the key was used.
pub fn handle_session_scroll_key(
    key: &KeyEvent,
    session_view: &mut TuiSessionViewState,
    line_count: usize,
) -> bool {
    let half_page = (session_view.body_height / 2).max(1) as isize;
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let delta = match key.code {
        KeyCode::Up if ctrl => -1,
        KeyCode::Down if ctrl => 1,
        KeyCode::PageUp => -half_page,
        KeyCode::PageDown => half_page,
        KeyCode::Home => {
            session_view.scroll_offset = 0;
            session_view.auto_follow = false;
            return true;
        }
        KeyCode::End => {
            session_view.scroll_offset = calc_log_scroll_usize(line_count, session_view.body_height);
            session_view.auto_follow = true;
            return true;
        }
        _ => return false,
    };
    move_session_scroll(session_view, line_count, delta);
    true
}

pub fn handle_session_scroll_mouse(
    mouse: &MouseEvent,
    session_view: &mut TuiSessionViewState,
    line_count: usize,
) -> bool {
    let step = TUI_SCROLL_STEP as isize;
    let delta = match mouse.kind {
        MouseEventKind::ScrollUp => -step,
        MouseEventKind::ScrollDown => step,
        _ => return false,
    };
    move_session_scroll(session_view, line_count, delta);
    true
}

//! Shared test helpers for TUI sub-module tests.

use ratatui::text::Line;
use std::sync::{Mutex, OnceLock};

use crate::chat_renderer::{RenderOptions, TuiTheme, style_thread_message};
use crate::runtime_adapter::ThreadMessage;

pub fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|p| p.into_inner())
}

pub fn with_env_overrides<T>(updates: &[(&str, Option<&str>)], f: impl FnOnce() -> T) -> T {
    let _guard = env_lock();
    let previous = updates
        .iter()
        .map(|(key, _)| ((*key).to_string(), std::env::var(key).ok()))
        .collect::<Vec<_>>();
    for (key, value) in updates {
        match value {
            Some(v) => unsafe { std::env::set_var(key, v) },
            None => unsafe { std::env::remove_var(key) },
        }
    }
    let result = f();
    for (key, old) in previous {
        match old {
            Some(v) => unsafe { std::env::set_var(&key, v) },
            None => unsafe { std::env::remove_var(&key) },
        }
    }
    result
}

pub fn line_plain(line: &Line<'_>) -> String {
    line.spans
        .iter()
        .map(|s| s.content.as_ref())
        .collect::<String>()
}

pub fn thread_lines_plain(message: &ThreadMessage, options: &RenderOptions) -> Vec<String> {
    let theme = TuiTheme::default_dark();
    let mut lines = Vec::new();
    style_thread_message(message, &theme, options, &mut lines);
    lines.iter().map(line_plain).collect()
}

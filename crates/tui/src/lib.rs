//! gwchat TUI: terminal chat view over a gateway session.
//!
//! This crate turns canonical session state from `gwchat-session` into
//! render items and thread messages, and drives them with a ratatui event
//! loop. `gwchat-interface` supplies the concrete gateway client.

mod app;
pub mod chat_items;
mod chat_renderer;
mod input_handler;
mod layout_manager;
pub mod queue_panel;
pub mod runtime_adapter;
#[cfg(test)]
pub(crate) mod test_helpers;

pub use app::*;
pub use chat_items::{
    CHAT_HISTORY_RENDER_LIMIT, COMPACTION_LABEL, ChatItem, ChatItemsInput, GroupedMessage,
    HISTORY_NOTICE_KEY, MessageGroup, build_chat_items,
};
pub use chat_renderer::*;
pub use input_handler::*;
pub use layout_manager::*;
pub use runtime_adapter::{
    AppendContent, AppendMessage, ChatRuntime, EditHandler, EditOutcome, EditRequest,
    ThreadMessage, ThreadPart, ThreadRole, ThreadRuntime, ThreadStatus, convert_chat_items,
    resolve_retry_prompt,
};

// ── ChatViewState ───────────────────────────────────────────────────

const MAX_NOTICES: usize = 40;

/// Presentation-only state; nothing here is sent to the gateway.
#[derive(Debug, Clone)]
pub struct ChatViewState {
    pub tools_collapsed: bool,
    pub show_queue_panel: bool,
    pub queue_scroll_offset: usize,
    /// Local notes (help, command feedback) shown under the thread.
    pub notices: Vec<String>,
    pub tick: usize,
}

impl ChatViewState {
    pub fn new(show_queue_panel: bool) -> Self {
        Self {
            tools_collapsed: env_bool("GWCHAT_TOOL_CARDS_COLLAPSED").unwrap_or(false),
            show_queue_panel: env_bool("GWCHAT_SHOW_QUEUE").unwrap_or(show_queue_panel),
            queue_scroll_offset: 0,
            notices: Vec::new(),
            tick: 0,
        }
    }

    pub fn push_notice(&mut self, text: impl Into<String>) {
        self.notices.push(text.into());
        if self.notices.len() > MAX_NOTICES {
            let overflow = self.notices.len() - MAX_NOTICES;
            self.notices.drain(0..overflow);
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            tools_collapsed: self.tools_collapsed,
            tick: self.tick,
        }
    }
}

/// Apply a shortcut that only changes presentation. Returns `false` for
/// actions that need the runtime.
pub fn apply_view_shortcut(
    action: TuiShortcutAction,
    view: &mut ChatViewState,
    show_thinking: &mut bool,
) -> bool {
    match action {
        TuiShortcutAction::ToggleThinking => {
            *show_thinking = !*show_thinking;
            true
        }
        TuiShortcutAction::ToggleQueuePanel => {
            view.show_queue_panel = !view.show_queue_panel;
            true
        }
        TuiShortcutAction::ToggleToolCards => {
            view.tools_collapsed = !view.tools_collapsed;
            true
        }
        TuiShortcutAction::Retry | TuiShortcutAction::EditLast => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;

    #[test]
    fn test_view_state_env_defaults() {
        with_env_overrides(
            &[
                ("GWCHAT_TOOL_CARDS_COLLAPSED", None),
                ("GWCHAT_SHOW_QUEUE", Some("off")),
            ],
            || {
                let view = ChatViewState::new(true);
                assert!(!view.tools_collapsed);
                assert!(!view.show_queue_panel);
                assert!(view.notices.is_empty());
            },
        );
    }

    #[test]
    fn test_notices_are_capped() {
        let mut view = ChatViewState::new(true);
        for i in 0..(MAX_NOTICES + 5) {
            view.push_notice(format!("note {}", i));
        }
        assert_eq!(view.notices.len(), MAX_NOTICES);
        assert_eq!(view.notices[0], "note 5");
    }

    #[test]
    fn test_apply_view_shortcut() {
        let mut view = ChatViewState::new(true);
        let mut show_thinking = false;
        assert!(apply_view_shortcut(
            TuiShortcutAction::ToggleThinking,
            &mut view,
            &mut show_thinking
        ));
        assert!(show_thinking);
        let queue_before = view.show_queue_panel;
        assert!(apply_view_shortcut(
            TuiShortcutAction::ToggleQueuePanel,
            &mut view,
            &mut show_thinking
        ));
        assert_ne!(view.show_queue_panel, queue_before);
        assert!(!apply_view_shortcut(
            TuiShortcutAction::Retry,
            &mut view,
            &mut show_thinking
        ));
    }
}

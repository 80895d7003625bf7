//! TUI application loop: the ratatui event loop for an interactive chat.

use std::io;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use gwchat_core::{GatewayError, RoleClass, extract_text};
use gwchat_session::{GatewayClient, GatewayEvent, HistoryResponse, HistoryTicket, SubmitOutcome};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap,
};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::chat_items::ChatItem;
use crate::queue_panel::render_queue_sidebar;
use crate::runtime_adapter::{AppendMessage, ChatRuntime, EditOutcome, ThreadRuntime};

use super::*;

type HistoryResult = (HistoryTicket, Result<HistoryResponse, GatewayError>);

/// Issue a history load without blocking the UI; the result comes back
/// through `tx` and is applied only if still current.
pub fn spawn_history_load(runtime: &mut ChatRuntime, tx: &mpsc::UnboundedSender<HistoryResult>) {
    let Some(ticket) = runtime.host.controller.begin_history_load() else {
        return;
    };
    let request = runtime.host.controller.history_request(&ticket);
    let client = runtime.client();
    let tx = tx.clone();
    debug!(session = %ticket.session_key, seq = ticket.seq, "loading history");
    tokio::spawn(async move {
        let result = client.chat_history(request).await;
        let _ = tx.send((ticket, result));
    });
}

pub fn apply_history_results(
    runtime: &mut ChatRuntime,
    rx: &mut mpsc::UnboundedReceiver<HistoryResult>,
) -> bool {
    let mut applied = false;
    while let Ok((ticket, result)) = rx.try_recv() {
        applied |= runtime.host.controller.apply_history(ticket, result);
    }
    applied
}

/// Route pending push frames into the runtime. Returns `false` once the
/// event stream has closed.
pub async fn drain_gateway_events(
    runtime: &mut ChatRuntime,
    events: &mut broadcast::Receiver<GatewayEvent>,
    history_tx: &mpsc::UnboundedSender<HistoryResult>,
) -> bool {
    let client = runtime.client();
    loop {
        match events.try_recv() {
            Ok(event) => {
                runtime
                    .host
                    .handle_gateway_event(client.as_ref(), &event)
                    .await;
            }
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "gateway events lagged; reloading history");
                spawn_history_load(runtime, history_tx);
            }
            Err(TryRecvError::Closed) => {
                warn!("gateway event stream closed");
                runtime.host.controller.set_connected(false);
                return false;
            }
        }
    }
}

/// Key and text of the newest user prompt.
pub fn last_user_prompt(items: &[ChatItem]) -> Option<(String, String)> {
    items
        .iter()
        .rev()
        .filter_map(ChatItem::as_group)
        .filter(|group| group.role == RoleClass::User)
        .flat_map(|group| group.messages.iter().rev())
        .find_map(|member| extract_text(&member.message).map(|text| (member.key.clone(), text)))
}

fn describe_outcome(outcome: &SubmitOutcome, queued: usize) -> Option<String> {
    match outcome {
        SubmitOutcome::Sent { .. } | SubmitOutcome::Ignored => None,
        SubmitOutcome::Queued { .. } => Some(format!("queued ({} waiting)", queued)),
        SubmitOutcome::Aborted { ok: true } => Some("run aborted".to_string()),
        SubmitOutcome::Aborted { ok: false } => Some("abort failed".to_string()),
        SubmitOutcome::Failed => Some("send failed; draft restored".to_string()),
    }
}

/// Apply a local command. Returns `true` when the TUI should exit.
pub async fn apply_tui_command(
    command: TuiCommand,
    runtime: &mut ChatRuntime,
    view: &mut ChatViewState,
    history_tx: &mpsc::UnboundedSender<HistoryResult>,
) -> bool {
    match command {
        TuiCommand::SwitchSession(key) => {
            info!(session = %key, "switching session");
            runtime.switch_session(&key);
            view.notices.clear();
            view.queue_scroll_offset = 0;
            spawn_history_load(runtime, history_tx);
        }
        TuiCommand::ListSessions => {
            let client = runtime.client();
            if runtime.host.refresh_sessions(client.as_ref()).await {
                if runtime.host.sessions.is_empty() {
                    view.push_notice("no sessions");
                }
                let active = runtime.host.controller.session_key().to_string();
                let listing: Vec<String> = runtime
                    .host
                    .sessions
                    .iter()
                    .map(|s| {
                        let marker = if s.key == active { "*" } else { " " };
                        match &s.label {
                            Some(label) => format!("{} {}  {}", marker, s.key, label),
                            None => format!("{} {}", marker, s.key),
                        }
                    })
                    .collect();
                for line in listing {
                    view.push_notice(line);
                }
            } else {
                view.push_notice("could not list sessions");
            }
        }
        TuiCommand::Attach(path) => match runtime.attach_file(&path) {
            Ok(()) => view.push_notice(format!("attached {}", path.display())),
            Err(err) => view.push_notice(format!("attach failed: {}", err)),
        },
        TuiCommand::Detach(n) => {
            let id = n
                .checked_sub(1)
                .and_then(|i| runtime.host.attachments.get(i))
                .map(|a| a.id.clone());
            match id {
                Some(id) => {
                    runtime.remove_attachment(&id);
                }
                None => view.push_notice(format!("no attachment #{}", n)),
            }
        }
        TuiCommand::Dequeue(n) => {
            let id = n
                .checked_sub(1)
                .and_then(|i| runtime.host.queue.get(i))
                .map(|q| q.id.clone());
            match id {
                Some(id) => {
                    runtime.host.remove_queued_message(&id);
                }
                None => view.push_notice(format!("no queued message #{}", n)),
            }
        }
        TuiCommand::ToggleThinking => {
            runtime.show_thinking = !runtime.show_thinking;
        }
        TuiCommand::Retry => match runtime.on_reload(None).await {
            Some(outcome) => {
                if let Some(note) = describe_outcome(&outcome, runtime.host.queue.len()) {
                    view.push_notice(note);
                }
            }
            None => view.push_notice("nothing to retry"),
        },
        TuiCommand::Reload => spawn_history_load(runtime, history_tx),
        TuiCommand::Help => {
            for line in help_lines() {
                view.push_notice(line);
            }
        }
        TuiCommand::Quit => return true,
    }
    false
}

fn notice_lines(notices: &[String], theme: &TuiTheme) -> Vec<Line<'static>> {
    notices
        .iter()
        .map(|note| {
            Line::from(vec![
                Span::styled("  · ", Style::default().fg(theme.text_muted)),
                Span::styled(note.clone(), Style::default().fg(theme.text_muted)),
            ])
        })
        .collect()
}

pub async fn run_chat_tui(
    runtime: &mut ChatRuntime,
    view: &mut ChatViewState,
    tick: Duration,
) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let client = runtime.client();
    let mut events = client.subscribe_events();
    let mut events_open = true;
    let (history_tx, mut history_rx) = mpsc::unbounded_channel::<HistoryResult>();
    let keymap = ChatTuiKeymap::from_env();

    let mut input = String::new();
    let mut input_history = InputHistory::new(100);
    let mut editing: Option<String> = None;
    let mut session_view = TuiSessionViewState::default();
    let mut line_count: usize;
    let mut last_tick = Instant::now();
    let mut should_quit = false;
    view.push_notice("Enter sends, /help lists commands");

    while !should_quit {
        let connected = events_open && client.is_connected();
        if connected != runtime.host.connected() {
            runtime.host.controller.set_connected(connected);
            if connected {
                info!(session = %runtime.host.controller.session_key(), "gateway connected");
                spawn_history_load(runtime, &history_tx);
                runtime.host.refresh_sessions(client.as_ref()).await;
            } else {
                warn!("gateway disconnected");
            }
        }
        if events_open {
            events_open = drain_gateway_events(runtime, &mut events, &history_tx).await;
        }
        if apply_history_results(runtime, &mut history_rx) {
            session_view.auto_follow = true;
        }
        if last_tick.elapsed() >= tick {
            view.tick = view.tick.wrapping_add(1);
            last_tick = Instant::now();
        }

        let theme = TuiTheme::default_dark();
        let thread = runtime.thread_messages();
        let mut styled_lines = style_thread_messages(&thread, &theme, &view.render_options());
        if !view.notices.is_empty() {
            styled_lines.push(Line::default());
            styled_lines.extend(notice_lines(&view.notices, &theme));
        }
        line_count = styled_lines.len();
        let show_thinking = runtime.show_thinking;
        let is_busy = runtime.host.is_busy();
        let state = runtime.host.controller.state();
        let attachments = &runtime.host.attachments;
        let queue = &runtime.host.queue;

        terminal.draw(|f| {
            let il = input_line_count(&input);
            let constraints = tui_layout_constraints(!attachments.is_empty(), il);
            let areas = Layout::default()
                .direction(Direction::Vertical)
                .constraints(constraints)
                .split(f.area());

            let n = areas.len();
            let body_idx = 2;
            let hint_idx = n - 2;
            let input_idx = n - 1;

            // [0] Title bar
            f.render_widget(
                Paragraph::new(build_title_bar(state, show_thinking, &theme))
                    .style(Style::default().bg(Color::Rgb(30, 30, 30))),
                areas[0],
            );

            // [1] Run status
            f.render_widget(
                Paragraph::new(build_run_status_line(state, view.tick, &theme)),
                areas[1],
            );

            // [2] Conversation body (with optional queue sidebar)
            let (conv_area, queue_area) =
                tui_session_split(areas[body_idx], view.show_queue_panel && !queue.is_empty());
            let body_block = Block::default()
                .title(Span::styled(
                    format!(" {} ", state.session_key),
                    Style::default().fg(theme.primary),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.border_normal));
            let inner = body_block.inner(conv_area);
            session_view.body_height = (inner.height as usize).max(1);
            let scroll = effective_log_scroll(line_count, &session_view);
            let body = Paragraph::new(Text::from(styled_lines))
                .block(body_block)
                .wrap(Wrap { trim: false })
                .scroll((scroll.min(u16::MAX as usize) as u16, 0));
            f.render_widget(body, conv_area);
            if line_count > session_view.body_height {
                let mut scrollbar_state = ScrollbarState::new(line_count).position(scroll);
                let scrollbar = Scrollbar::default()
                    .orientation(ScrollbarOrientation::VerticalRight)
                    .thumb_style(Style::default().fg(theme.text_muted));
                f.render_stateful_widget(scrollbar, conv_area, &mut scrollbar_state);
            }
            if let Some(sidebar) = queue_area {
                render_queue_sidebar(f, sidebar, queue, view.queue_scroll_offset, &theme);
            }

            // [3] Attachment bar (conditional)
            if !attachments.is_empty() {
                f.render_widget(
                    Paragraph::new(build_attachment_bar(attachments, &theme)),
                    areas[3],
                );
            }

            // [n-2] Status / hint bar
            f.render_widget(
                Paragraph::new(build_status_hint_bar(queue.len(), show_thinking, is_busy, &theme))
                    .style(Style::default().bg(Color::Rgb(25, 25, 25))),
                areas[hint_idx],
            );

            // [n-1] Input area (multiline)
            let input_title = match (&editing, input.contains('\n')) {
                (Some(_), _) => " edit > ".to_string(),
                (None, true) => " > (multiline) ".to_string(),
                (None, false) => " > ".to_string(),
            };
            let input_block = Block::default()
                .title(Span::styled(
                    input_title,
                    Style::default()
                        .fg(theme.primary)
                        .add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.border_active));
            let input_lines: Vec<Line<'_>> = input
                .split('\n')
                .map(|l| Line::from(l.to_string()))
                .collect();
            f.render_widget(
                Paragraph::new(Text::from(input_lines)).block(input_block),
                areas[input_idx],
            );
            f.set_cursor_position(input_cursor_position(areas[input_idx], &input));
        })?;

        if !event::poll(Duration::from_millis(20))? {
            continue;
        }
        match event::read()? {
            Event::Key(key) => {
                if key.kind != KeyEventKind::Press {
                    continue;
                }

                let interrupt = key.code == KeyCode::Esc
                    || (key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL));
                if interrupt {
                    if key.code == KeyCode::Esc && editing.take().is_some() {
                        input.clear();
                        continue;
                    }
                    if runtime.host.controller.can_abort() {
                        let ok = runtime.on_cancel().await;
                        view.push_notice(if ok { "run aborted" } else { "abort failed" });
                    } else {
                        should_quit = true;
                    }
                    continue;
                }

                if handle_session_scroll_key(&key, &mut session_view, line_count) {
                    continue;
                }

                if let Some(action) = detect_tui_shortcut(&key, &keymap) {
                    if apply_view_shortcut(action, view, &mut runtime.show_thinking) {
                        continue;
                    }
                    match action {
                        TuiShortcutAction::Retry => {
                            apply_tui_command(TuiCommand::Retry, runtime, view, &history_tx).await;
                        }
                        TuiShortcutAction::EditLast => {
                            match last_user_prompt(&runtime.chat_items()) {
                                Some((key, text)) => {
                                    input = text;
                                    editing = Some(key);
                                }
                                None => view.push_notice("nothing to edit"),
                            }
                        }
                        _ => {}
                    }
                    continue;
                }

                match key.code {
                    KeyCode::Up => {
                        if let Some(prev) = input_history.up(&input) {
                            input = prev.to_string();
                        }
                    }
                    KeyCode::Down => {
                        if let Some(next) = input_history.down() {
                            input = next.to_string();
                        }
                    }
                    KeyCode::Enter
                        if key.modifiers.contains(KeyModifiers::SHIFT)
                            || key.modifiers.contains(KeyModifiers::ALT) =>
                    {
                        input.push('\n');
                    }
                    KeyCode::Enter => {
                        let text = input.trim().to_string();
                        input.clear();
                        input_history.push(text.clone());
                        input_history.reset();
                        if text.is_empty() && runtime.host.attachments.is_empty() {
                            continue;
                        }
                        match parse_tui_command(&text) {
                            Some(Ok(command)) => {
                                if apply_tui_command(command, runtime, view, &history_tx).await {
                                    should_quit = true;
                                }
                                continue;
                            }
                            Some(Err(usage)) => {
                                view.push_notice(usage);
                                continue;
                            }
                            None => {}
                        }
                        session_view.auto_follow = true;
                        let outcome = match editing.take() {
                            Some(source_id) => {
                                let message = AppendMessage {
                                    source_id: Some(source_id),
                                    ..AppendMessage::text(text)
                                };
                                match runtime.on_edit(message).await {
                                    Ok(EditOutcome::Submitted(outcome)) => outcome,
                                    Ok(EditOutcome::Delegated) => SubmitOutcome::Ignored,
                                    Err(err) => {
                                        view.push_notice(format!("edit failed: {}", err));
                                        continue;
                                    }
                                }
                            }
                            None => runtime.on_new(AppendMessage::text(text)).await,
                        };
                        if outcome == SubmitOutcome::Failed {
                            input = std::mem::take(&mut runtime.host.draft);
                        }
                        if outcome == SubmitOutcome::Ignored && !runtime.host.connected() {
                            view.push_notice("not connected to gateway");
                        }
                        if let Some(note) = describe_outcome(&outcome, runtime.host.queue.len()) {
                            view.push_notice(note);
                        }
                    }
                    KeyCode::Backspace => {
                        input.pop();
                    }
                    KeyCode::Char(ch) => {
                        if !key.modifiers.contains(KeyModifiers::CONTROL) {
                            input.push(ch);
                        }
                    }
                    _ => {}
                }
            }
            Event::Mouse(mouse) => {
                let _ = handle_session_scroll_mouse(&mouse, &mut session_view, line_count);
            }
            _ => {}
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

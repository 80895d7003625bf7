//! Queue sidebar panel: messages waiting for the active run to finish.

use gwchat_core::QueuedMessage;
use ratatui::{
    Frame,
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

use crate::chat_renderer::TuiTheme;

/// First line of the queued text, cut to `width` columns.
fn preview_title(text: &str, width: usize) -> String {
    let first = text.lines().next().unwrap_or("").trim();
    if first.chars().count() > width && width > 1 {
        let truncated: String = first.chars().take(width - 1).collect();
        format!("{}…", truncated)
    } else {
        first.to_string()
    }
}

pub fn queue_panel_lines(
    queue: &[QueuedMessage],
    scroll_offset: usize,
    max_width: usize,
    max_lines: usize,
    theme: &TuiTheme,
) -> Vec<Line<'static>> {
    if queue.is_empty() {
        return vec![Line::from(Span::styled(
            "(empty)",
            Style::default().fg(theme.text_muted),
        ))];
    }
    let visible: Vec<(usize, &QueuedMessage)> =
        queue.iter().enumerate().skip(scroll_offset).collect();
    let remaining_after_view = visible.len().saturating_sub(max_lines);
    let take = if remaining_after_view > 0 {
        max_lines.saturating_sub(1)
    } else {
        max_lines
    };

    let mut lines = Vec::new();
    for (index, item) in visible.into_iter().take(take) {
        let prefix = format!("{}. ", index + 1);
        let badge = if item.attachments.is_empty() {
            String::new()
        } else {
            format!(" +{}img", item.attachments.len())
        };
        let title_width = max_width.saturating_sub(prefix.chars().count() + badge.chars().count());
        let mut spans = vec![
            Span::styled(prefix, Style::default().fg(theme.warning)),
            Span::styled(
                preview_title(&item.text, title_width),
                Style::default().fg(theme.text_base),
            ),
        ];
        if !badge.is_empty() {
            spans.push(Span::styled(badge, Style::default().fg(theme.primary)));
        }
        lines.push(Line::from(spans));
    }
    if remaining_after_view > 0 {
        lines.push(Line::from(Span::styled(
            format!("  ...+{} more", remaining_after_view),
            Style::default()
                .fg(theme.text_muted)
                .add_modifier(Modifier::ITALIC),
        )));
    }
    lines
}

/// Render the queue sidebar into the given area.
pub fn render_queue_sidebar(
    frame: &mut Frame,
    area: Rect,
    queue: &[QueuedMessage],
    scroll_offset: usize,
    theme: &TuiTheme,
) {
    let block = Block::default()
        .title(Span::styled(
            format!(" Queue ({}) ", queue.len()),
            Style::default()
                .fg(theme.primary)
                .add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border_normal));
    let inner = block.inner(area);
    let lines = queue_panel_lines(
        queue,
        scroll_offset,
        inner.width as usize,
        inner.height as usize,
        theme,
    );
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::line_plain;
    use gwchat_core::ChatAttachment;

    fn make_queue(n: usize) -> Vec<QueuedMessage> {
        (0..n)
            .map(|i| QueuedMessage::new(format!("message {}", i + 1), Vec::new()))
            .collect()
    }

    fn plain(lines: &[Line<'_>]) -> Vec<String> {
        lines.iter().map(line_plain).collect()
    }

    #[test]
    fn test_empty_queue() {
        let theme = TuiTheme::default_dark();
        assert_eq!(plain(&queue_panel_lines(&[], 0, 20, 5, &theme)), vec!["(empty)"]);
    }

    #[test]
    fn test_numbering_and_overflow() {
        let theme = TuiTheme::default_dark();
        let lines = plain(&queue_panel_lines(&make_queue(5), 0, 30, 3, &theme));
        assert_eq!(lines, vec!["1. message 1", "2. message 2", "  ...+3 more"]);
        let scrolled = plain(&queue_panel_lines(&make_queue(5), 3, 30, 3, &theme));
        assert_eq!(scrolled, vec!["4. message 4", "5. message 5"]);
    }

    #[test]
    fn test_truncation_and_attachment_badge() {
        let theme = TuiTheme::default_dark();
        let attachment = ChatAttachment::from_data_url("data:image/png;base64,QUJD").expect("png");
        let queue = vec![QueuedMessage::new(
            "a very long queued prompt\nsecond line",
            vec![attachment],
        )];
        let lines = plain(&queue_panel_lines(&queue, 0, 16, 4, &theme));
        assert_eq!(lines[0], "1. a very… +1img");
    }
}

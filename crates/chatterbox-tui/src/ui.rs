use ratatui::{
    Frame,
    layout::{Constraint, Flex, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use crate::app::{App, InputMode};
use chatterbox_core::{ChatRole, Provider};

const CODE_STYLE: Style = Style::new().fg(Color::Green);

/// Convert a reply to styled lines: fenced code blocks, `inline code`, and **bold**.
fn markdown_lines(text: &str) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let mut in_fence = false;

    for raw in text.lines() {
        let trimmed = raw.trim_start();
        if let Some(lang) = trimmed.strip_prefix("```") {
            in_fence = !in_fence;
            if in_fence && !lang.trim().is_empty() {
                lines.push(Line::from(Span::styled(
                    format!("── {} ──", lang.trim()),
                    Style::default().fg(Color::DarkGray),
                )));
            }
            continue;
        }

        if in_fence {
            lines.push(Line::from(Span::styled(format!("  {}", raw), CODE_STYLE)));
        } else {
            lines.push(parse_markdown_line(raw));
        }
    }
    lines
}

/// Parse a line of text and convert **bold** and `code` markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                // Consume the second *
                chars.next();

                // Find closing **
                let mut bold_text = String::new();
                let mut found_close = false;
                while let Some(c) = chars.next() {
                    if c == '*' && chars.peek() == Some(&'*') {
                        chars.next();
                        found_close = true;
                        break;
                    }
                    bold_text.push(c);
                }

                if found_close && !bold_text.is_empty() {
                    if !current_text.is_empty() {
                        spans.push(Span::raw(std::mem::take(&mut current_text)));
                    }
                    spans.push(Span::styled(
                        bold_text,
                        Style::default().add_modifier(Modifier::BOLD),
                    ));
                } else {
                    // No closing **, treat as literal
                    current_text.push_str("**");
                    current_text.push_str(&bold_text);
                    if found_close {
                        current_text.push_str("**");
                    }
                }
            }
            '`' => {
                let mut code = String::new();
                let mut found_close = false;
                for c in chars.by_ref() {
                    if c == '`' {
                        found_close = true;
                        break;
                    }
                    code.push(c);
                }

                if found_close {
                    if !current_text.is_empty() {
                        spans.push(Span::raw(std::mem::take(&mut current_text)));
                    }
                    spans.push(Span::styled(code, CODE_STYLE));
                } else {
                    current_text.push('`');
                    current_text.push_str(&code);
                }
            }
            _ => current_text.push(c),
        }
    }

    // Push any remaining text
    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat_screen(app, frame, body_area);
    render_footer(app, frame, footer_area);

    // Render popups (in order of priority)
    if app.show_api_key_input {
        render_api_key_input(app, frame, area);
    } else if app.show_provider_picker {
        render_provider_picker(app, frame, area);
    } else if app.show_model_picker {
        render_model_picker(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let turns = app.session.messages().len();
    let window = match app.session.transcript().window() {
        Some(w) => format!(" [{}/{} turns]", turns, w),
        None => format!(" [{} turns]", turns),
    };

    let title = Line::from(vec![
        Span::styled(" chatterbox ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(window, Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
    };

    let hints = match app.input_mode {
        InputMode::Normal => " i:type  j/k:scroll  g/G:top/bottom  C:clear  M:model  P:provider  q:quit",
        InputMode::Editing => " Enter:send  Esc:normal mode  ↑/↓:scroll  Ctrl-C:quit",
    };

    let footer = Line::from(vec![
        Span::styled(mode_text, mode_style),
        Span::styled(hints, Style::default().fg(Color::DarkGray)),
    ]);
    frame.render_widget(Paragraph::new(footer), area);
}

fn render_chat_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    // Chat history on top, notice line, input at bottom
    let notice_height = if app.notice.is_some() { 1 } else { 0 };
    let [chat_area, notice_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(notice_height),
        Constraint::Length(3),
    ])
    .areas(area);

    // Store area for mouse hit-testing and inner size for scroll calculations
    app.chat_area = Some(chat_area);
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    render_chat(app, frame, chat_area);

    if let Some(notice) = &app.notice {
        let line = Line::from(Span::styled(
            format!(" {}", notice),
            Style::default().fg(Color::Red).add_modifier(Modifier::ITALIC),
        ));
        frame.render_widget(Paragraph::new(line), notice_area);
    }

    render_input(app, frame, input_area);
}

fn render_chat(app: &App, frame: &mut Frame, area: Rect) {
    let border_color = if app.input_mode == InputMode::Normal {
        Color::Cyan
    } else {
        Color::DarkGray
    };

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(" {}: {} ", app.current_provider.display_name(), app.selected_model));

    let chat_text = if app.session.messages().is_empty() && !app.is_busy() {
        Text::from(Span::styled(
            "Ask anything...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for msg in app.session.messages() {
            match msg.role {
                ChatRole::User => {
                    lines.push(role_line(ChatRole::User));
                    lines.extend(msg.content.lines().map(|l| Line::from(l.to_string())));
                }
                ChatRole::Assistant => {
                    lines.push(role_line(ChatRole::Assistant));
                    lines.extend(markdown_lines(&msg.content));
                }
            }
            lines.push(Line::default());
        }

        if app.is_busy() {
            lines.push(role_line(ChatRole::Assistant));
            match app.live_reply.as_deref() {
                Some(partial) if !partial.is_empty() => {
                    lines.extend(markdown_lines(partial));
                }
                _ => {
                    // Animated ellipsis: cycles through ".", "..", "..."
                    let dots = ".".repeat((app.animation_frame as usize) + 1);
                    lines.push(Line::from(Span::styled(
                        format!("Thinking{}", dots),
                        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                    )));
                }
            }
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn role_line(role: ChatRole) -> Line<'static> {
    match role {
        ChatRole::User => Line::from(Span::styled(
            "You:",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        ChatRole::Assistant => Line::from(Span::styled(
            "AI:",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
    }
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let max = app.session.options().max_message_chars;
    let count = app.input.chars().count();

    let counter_style = if count > max {
        Style::default().fg(Color::Red)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let title = if app.is_busy() {
        " Waiting for reply... "
    } else {
        " Message (Enter to send) "
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if editing { Color::Yellow } else { Color::DarkGray }))
        .title(title)
        .title_bottom(Line::from(Span::styled(format!(" {}/{} ", count, max), counter_style)).right_aligned());

    // Calculate visible portion of input with horizontal scrolling
    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.cursor;

    // Calculate scroll offset to keep cursor visible
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    // Get the visible slice of the input
    let visible_text: String = app
        .input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, area);

    // Show cursor when editing
    if editing {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

/// Centered rectangle of fixed size, clamped to `area`.
fn popup_area(area: Rect, width: u16, height: u16) -> Rect {
    let [row] = Layout::vertical([Constraint::Length(height.min(area.height))])
        .flex(Flex::Center)
        .areas(area);
    let [popup] = Layout::horizontal([Constraint::Length(width.min(area.width))])
        .flex(Flex::Center)
        .areas(row);
    popup
}

fn render_model_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    let height = (app.available_models.len() as u16).min(12) + 2;
    let popup = popup_area(area, 50, height);

    let items: Vec<ListItem> = app
        .available_models
        .iter()
        .map(|m| {
            let marker = if *m == app.selected_model { "● " } else { "  " };
            ListItem::new(format!("{}{}", marker, m))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan))
                .title(" Select Model (Enter to choose, Esc to cancel) "),
        )
        .highlight_style(
            Style::default()
                .bg(Color::Cyan)
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_widget(Clear, popup);
    frame.render_stateful_widget(list, popup, &mut app.model_picker_state);
}

fn render_provider_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    let providers = Provider::all();
    let popup = popup_area(area, 50, providers.len() as u16 + 2);

    let items: Vec<ListItem> = providers
        .iter()
        .map(|p| {
            let source = match app.config.key_source(*p) {
                Some(source) => format!("({})", source),
                None => "(no key)".to_string(),
            };
            ListItem::new(format!("{} {}", p.display_name(), source))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Magenta))
                .title(" Select Provider "),
        )
        .highlight_style(
            Style::default()
                .bg(Color::Magenta)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_widget(Clear, popup);
    frame.render_stateful_widget(list, popup, &mut app.provider_picker_state);
}

fn render_api_key_input(app: &App, frame: &mut Frame, area: Rect) {
    let popup = popup_area(area, 60, 3);
    let provider_name = app
        .api_key_target_provider
        .map(|p| p.display_name())
        .unwrap_or("provider");

    // Never echo the key itself
    let masked = "•".repeat(app.api_key_input.chars().count());
    let input = Paragraph::new(masked).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title(format!(" {} API key (Enter to save, Esc to cancel) ", provider_name)),
    );

    frame.render_widget(Clear, popup);
    frame.render_widget(input, popup);

    let max_x = popup.width.saturating_sub(2);
    let cursor_x = (app.api_key_input_cursor as u16).min(max_x);
    frame.set_cursor_position((popup.x + cursor_x + 1, popup.y + 1));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_bold_and_code_spans() {
        let line = parse_markdown_line("use **this** or `that` now");
        let contents: Vec<&str> = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(contents, vec!["use ", "this", " or ", "that", " now"]);
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(line.spans[3].style, CODE_STYLE);
    }

    #[test]
    fn test_unclosed_markers_stay_literal() {
        assert_eq!(plain(&parse_markdown_line("a **b")), "a **b");
        assert_eq!(plain(&parse_markdown_line("a `b")), "a `b");
        assert_eq!(plain(&parse_markdown_line("2 * 3")), "2 * 3");
    }

    #[test]
    fn test_fenced_block_is_styled_as_code() {
        let lines = markdown_lines("Here:\n```rust\nfn main() {}\n```\nDone **now**");
        let texts: Vec<String> = lines.iter().map(plain).collect();
        assert_eq!(texts, vec!["Here:", "── rust ──", "  fn main() {}", "Done now"]);
        assert_eq!(lines[2].spans[0].style, CODE_STYLE);
    }

    #[test]
    fn test_unterminated_fence_still_renders() {
        // A streamed reply can stop mid-block
        let lines = markdown_lines("```\nlet x = 1;");
        assert_eq!(lines.len(), 1);
        assert_eq!(plain(&lines[0]), "  let x = 1;");
    }

    #[test]
    fn test_popup_is_centered_and_clamped() {
        let area = Rect::new(0, 0, 100, 40);
        let popup = popup_area(area, 50, 10);
        assert_eq!((popup.x, popup.y, popup.width, popup.height), (25, 15, 50, 10));

        let small = popup_area(Rect::new(0, 0, 20, 5), 50, 10);
        assert_eq!((small.width, small.height), (20, 5));
    }
}

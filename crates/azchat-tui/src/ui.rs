use ratatui::{
    Frame,
    layout::{Constraint, Layout, Position, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use azchat_core::{ChatRole, ConversationMessage};
use crate::app::{App, InputMode};

/// Parse a line for **bold** markdown, returning styled spans.
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            // Consume the second *
            chars.next();

            // Push any accumulated plain text
            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;

            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next(); // consume second *
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // No closing ** (possibly still typing), treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
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

    // Main layout: header, chat, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" Azyasaxi ", Style::default().fg(Color::Cyan).bold()),
        Span::styled("beta", Style::default().fg(Color::White).italic()),
        Span::raw(" "),
        Span::styled(
            format!("{} v{}", app.session.model(), env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn sender_style(role: ChatRole) -> Style {
    let color = match role {
        ChatRole::User => Color::Cyan,
        ChatRole::Assistant => Color::Yellow,
        ChatRole::System => Color::Red,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

fn message_lines(msg: &ConversationMessage, animation_frame: u8, lines: &mut Vec<Line<'static>>) {
    let mut label = vec![Span::styled(format!("{}:", msg.sender()), sender_style(msg.role))];
    if msg.failed() {
        label.push(Span::styled(" (failed)", Style::default().fg(Color::Red)));
    }
    lines.push(Line::from(label));

    let text = msg.display_content();
    if text.is_empty() && !msg.is_settled() {
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    } else if msg.role == ChatRole::Assistant {
        // Dim the reply while it is still being typed out
        let style = if msg.is_streaming() {
            Style::default().add_modifier(Modifier::DIM)
        } else {
            Style::default()
        };
        for line in text.lines() {
            lines.push(parse_markdown_line(line).patch_style(style));
        }
    } else {
        for line in text.lines() {
            lines.push(Line::from(line.to_string()));
        }
    }
    lines.push(Line::default());
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Chat ");

    let conversation = app.session.conversation();
    let chat_text = if conversation.is_empty() {
        Text::from(Span::styled(
            "Ask anything...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();
        for msg in conversation.messages() {
            message_lines(msg, app.animation_frame, &mut lines);
        }
        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };
    let title = if app.session.is_busy() {
        " Waiting for reply (Ctrl+X to stop) "
    } else {
        " Message "
    };

    let input = Paragraph::new(app.input.as_str())
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border_color))
                .title(title),
        );
    frame.render_widget(input, area);

    if editing {
        frame.set_cursor_position(input_cursor(area, app.cursor));
    }
}

/// Terminal position of the input cursor, kept inside the box borders.
fn input_cursor(area: Rect, cursor: usize) -> Position {
    let last_column = area.right().saturating_sub(2);
    let offset = u16::try_from(cursor).unwrap_or(u16::MAX);
    let x = area.x.saturating_add(1).saturating_add(offset).min(last_column);
    Position::new(x, area.y.saturating_add(1))
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };
    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " INSERT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints: &[(&str, &str)] = match app.input_mode {
        InputMode::Normal => &[
            ("i", "type"),
            ("j/k", "scroll"),
            ("c", "clear"),
            ("q", "quit"),
        ],
        InputMode::Editing => &[
            ("Enter", "send"),
            ("Esc", "normal"),
            ("Ctrl+L", "clear"),
            ("Ctrl+C", "quit"),
        ],
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    for (key, label) in hints {
        spans.push(Span::styled(format!(" {} ", key), key_style));
        spans.push(Span::styled(format!(" {} ", label), label_style));
        spans.push(Span::raw(" "));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

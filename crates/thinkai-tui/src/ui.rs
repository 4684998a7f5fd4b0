use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
    Frame,
};
use thinkai_core::{Message, Provider, Sender};

use crate::app::{App, FocusPane, InputMode, SettingsField, EXAMPLE_PROMPTS};

const SETTINGS_WIDTH: u16 = 38;

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str, base: Style) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            // Consume the second *
            chars.next();

            // Push any accumulated plain text
            if !current_text.is_empty() {
                spans.push(Span::styled(std::mem::take(&mut current_text), base));
            }

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
                spans.push(Span::styled(bold_text, base.add_modifier(Modifier::BOLD)));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::styled(current_text, base));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

/// Message text as display lines: fenced code blocks indented, **bold** elsewhere
fn body_lines(text: &str, base: Style) -> Vec<Line<'static>> {
    let code_style = Style::default().fg(Color::Green);
    let fence_style = Style::default().fg(Color::DarkGray);
    let mut lines = Vec::new();
    let mut in_code = false;

    for line in text.lines() {
        if let Some(lang) = line.trim_start().strip_prefix("```") {
            if in_code {
                lines.push(Line::from(Span::styled("  └────", fence_style)));
            } else {
                let label = lang.trim();
                let label = if label.is_empty() { "code" } else { label };
                lines.push(Line::from(Span::styled(format!("  ┌─ {}", label), fence_style)));
            }
            in_code = !in_code;
        } else if in_code {
            lines.push(Line::from(vec![
                Span::styled("  │ ", fence_style),
                Span::styled(line.to_string(), code_style),
            ]));
        } else {
            lines.push(parse_markdown_line(line, base));
        }
    }

    // Streaming output may stop inside an open fence
    if in_code {
        lines.push(Line::from(Span::styled("  └────", fence_style)));
    }

    lines
}

fn message_lines(msg: &Message, thinking_frame: Option<u8>) -> Vec<Line<'static>> {
    let timestamp = Span::styled(
        format!("  {}", msg.timestamp),
        Style::default().fg(Color::DarkGray),
    );
    let mut lines = Vec::new();

    match msg.sender {
        Sender::System => {
            lines.push(
                Line::from(Span::styled(
                    msg.text.clone(),
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                ))
                .centered(),
            );
        }
        Sender::User => {
            lines.push(Line::from(vec![
                Span::styled("You:", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
                timestamp,
            ]));
            lines.extend(body_lines(&msg.text, Style::default()));
        }
        Sender::Bot => {
            lines.push(Line::from(vec![
                Span::styled(
                    "ThinkAI:",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                ),
                timestamp,
            ]));
            if msg.error {
                lines.extend(body_lines(&msg.text, Style::default().fg(Color::Red)));
                lines.push(Line::from(vec![
                    Span::styled(" r ", Style::default().bg(Color::DarkGray).fg(Color::White)),
                    Span::styled(" Retry", Style::default().fg(Color::Red)),
                ]));
            } else if let Some(frame) = thinking_frame.filter(|_| msg.text.is_empty()) {
                // Animated ellipsis: cycles through ".", "..", "..."
                let dots = ".".repeat((frame as usize) + 1);
                lines.push(Line::from(Span::styled(
                    format!("Thinking{}", dots),
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
            } else {
                lines.extend(body_lines(&msg.text, Style::default()));
            }
        }
    }

    lines.push(Line::default());
    lines
}

fn welcome_lines() -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::default(),
        Line::from(Span::styled(
            "Welcome to ThinkAI",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
        .centered(),
        Line::from(Span::styled(
            "What can I help you with?",
            Style::default().fg(Color::DarkGray),
        ))
        .centered(),
        Line::default(),
    ];

    for (i, (title, _)) in EXAMPLE_PROMPTS.iter().enumerate() {
        lines.push(
            Line::from(vec![
                Span::styled(
                    format!(" {} ", i + 1),
                    Style::default().bg(Color::DarkGray).fg(Color::White),
                ),
                Span::raw(format!(" {}", title)),
            ])
            .centered(),
        );
    }

    lines
}

/// Rows the lines occupy once word-wrapped to `width`, as the chat paragraph renders them
fn wrapped_height(lines: &[Line], width: u16) -> u16 {
    let rows = Paragraph::new(lines.to_vec())
        .wrap(Wrap { trim: false })
        .line_count(width.max(1));
    rows.min(u16::MAX as usize) as u16
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(4));
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

/// Show only the last four characters of a key
fn mask_key(key: &str) -> String {
    let count = key.chars().count();
    if count <= 4 {
        "*".repeat(count)
    } else {
        let masked_len = count - 4;
        let last_four: String = key.chars().skip(masked_len).collect();
        format!("{}...{}", "*".repeat(masked_len.min(20)), last_four)
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

    let chat_column = if app.show_settings {
        let [settings_area, chat_column] =
            Layout::horizontal([Constraint::Length(SETTINGS_WIDTH), Constraint::Min(0)])
                .areas(body_area);
        render_settings(app, frame, settings_area);
        chat_column
    } else {
        body_area
    };

    render_chat_column(app, frame, chat_column);
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
    let settings = app.chat.settings();
    let status = if app.chat.is_loading() {
        Span::styled(" ● streaming ", Style::default().fg(Color::Yellow))
    } else {
        Span::styled(" ● ready ", Style::default().fg(Color::Green))
    };

    let title = Line::from(vec![
        Span::styled(" ThinkAI ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw("  "),
        Span::styled(
            format!("{}: {}", settings.provider.label(), settings.model),
            Style::default().fg(Color::White),
        ),
        status,
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_chat_column(app: &mut App, frame: &mut Frame, area: Rect) {
    let banner_height = if app.chat.last_error().is_some() { 3 } else { 0 };
    let [chat_area, banner_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(banner_height),
        Constraint::Length(3),
    ])
    .areas(area);

    render_chat(app, frame, chat_area);
    if banner_height > 0 {
        render_error_banner(app, frame, banner_area);
    }
    render_input(app, frame, input_area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Chat;
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if focused { Color::Cyan } else { Color::DarkGray }))
        .title(" Chat ");

    let lines = if app.chat.messages().is_empty() {
        welcome_lines()
    } else {
        let streaming_id = app.chat.streaming_message().map(|m| m.id.clone());
        app.chat
            .messages()
            .iter()
            .flat_map(|msg| {
                let thinking = (Some(&msg.id) == streaming_id.as_ref()).then_some(app.animation_frame);
                message_lines(msg, thinking)
            })
            .collect()
    };

    // Store areas and dimensions for scrolling and mouse hit-testing
    let inner = block.inner(area);
    app.chat_area = Some(area);
    app.chat_height = inner.height;
    app.chat_max_scroll = wrapped_height(&lines, inner.width).saturating_sub(inner.height);
    if app.follow_output {
        app.chat_scroll = app.chat_max_scroll;
    } else {
        app.chat_scroll = app.chat_scroll.min(app.chat_max_scroll);
    }

    let chat = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_error_banner(app: &App, frame: &mut Frame, area: Rect) {
    let message = app.chat.last_error().unwrap_or_default();
    let banner = Paragraph::new(Line::from(vec![
        Span::styled(message.to_string(), Style::default().fg(Color::Red)),
        Span::styled("  (press r in normal mode to retry)", Style::default().fg(Color::DarkGray)),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Red))
            .title(" Error "),
    );
    frame.render_widget(banner, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing && app.focus == FocusPane::Chat;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };
    let title = if app.chat.is_loading() {
        " Waiting for reply... "
    } else {
        " Message (Enter to send) "
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Calculate visible portion of input with horizontal scrolling
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.input.cursor();
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .input
        .value()
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, area);

    let popup_open = app.show_api_key_input || app.show_provider_picker || app.show_model_picker;
    if editing && !popup_open {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn setting_value(app: &App, field: SettingsField) -> String {
    let settings = app.chat.settings();
    match field {
        SettingsField::Provider => format!("< {} >", settings.provider.label()),
        SettingsField::Model => settings.model.clone(),
        SettingsField::Temperature => format!("< {:.1} >", settings.temperature),
        SettingsField::SystemPrompt => {
            if settings.system_prompt.trim().is_empty() {
                "(none)".to_string()
            } else {
                "Enter to edit".to_string()
            }
        }
        SettingsField::ClearChat | SettingsField::Summarize => String::new(),
    }
}

fn render_settings(app: &mut App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Settings;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };

    let fields = SettingsField::all();
    let [list_area, prompt_area] = Layout::vertical([
        Constraint::Length(fields.len() as u16 + 2),
        Constraint::Min(0),
    ])
    .areas(area);

    let items: Vec<ListItem> = fields
        .iter()
        .map(|field| match field {
            SettingsField::ClearChat | SettingsField::Summarize => {
                ListItem::new(format!("[ {} ]", field.label())).style(Style::default().fg(Color::Magenta))
            }
            _ => ListItem::new(Line::from(vec![
                Span::styled(format!("{:<12}", field.label()), Style::default().fg(Color::DarkGray)),
                Span::raw(setting_value(app, *field)),
            ])),
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border_color))
                .title(" Settings "),
        )
        .highlight_style(
            Style::default()
                .bg(if focused { Color::Blue } else { Color::Reset })
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, list_area, &mut app.settings_state);

    let (title, text, color) = if app.editing_prompt {
        (
            " System prompt (Enter save, Esc cancel) ",
            app.prompt_input.value().to_string(),
            Color::Yellow,
        )
    } else {
        (" System prompt ", app.chat.settings().system_prompt.clone(), border_color)
    };

    let prompt = Paragraph::new(text)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(color))
                .title(title),
        );
    frame.render_widget(prompt, prompt_area);

    // Cursor on the wrapped prompt text
    if app.editing_prompt {
        let inner_width = prompt_area.width.saturating_sub(2).max(1);
        let cursor = app.prompt_input.cursor() as u16;
        frame.set_cursor_position((
            prompt_area.x + 1 + cursor % inner_width,
            prompt_area.y + 1 + cursor / inner_width,
        ));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);
    let hint = |key: &'static str, label: &'static str| {
        [
            Span::styled(format!(" {} ", key), key_style),
            Span::styled(format!(" {} ", label), label_style),
        ]
    };

    let hints: Vec<Span> = if app.show_api_key_input || app.editing_prompt {
        [hint("Enter", "save"), hint("Esc", "cancel")].concat()
    } else if app.show_provider_picker || app.show_model_picker {
        [hint("j/k", "nav"), hint("Enter", "select"), hint("Esc", "cancel")].concat()
    } else {
        match app.input_mode {
            InputMode::Editing => {
                [hint("Enter", "send"), hint("Esc", "stop typing"), hint("^S", "settings")].concat()
            }
            InputMode::Normal if app.focus == FocusPane::Settings => [
                hint("j/k", "field"),
                hint("h/l", "change"),
                hint("Enter", "edit"),
                hint("Tab", "chat"),
                hint("Esc", "close"),
            ]
            .concat(),
            InputMode::Normal => [
                hint("i", "type"),
                hint("r", "retry"),
                hint("S", "summarize"),
                hint("^L", "clear"),
                hint("P", "provider"),
                hint("M", "model"),
                hint("^S", "settings"),
                hint("q", "quit"),
            ]
            .concat(),
        }
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::styled(" ", label_style)];
    spans.extend(hints);
    if let Some(notice) = &app.notice {
        spans.push(Span::styled(format!("  {}", notice), Style::default().fg(Color::Yellow)));
    }

    let footer = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_model_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    let popup_area = centered_rect(40, app.available_models.len() as u16 + 2, area);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Select Model ");

    let current = &app.chat.settings().model;
    let items: Vec<ListItem> = app
        .available_models
        .iter()
        .map(|model| {
            let style = if model == current {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", model)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.model_picker_state);
}

fn render_provider_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    let providers = Provider::all();
    let popup_area = centered_rect(45, providers.len() as u16 + 2, area);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Select Provider ");

    let current = app.chat.settings().provider;
    let items: Vec<ListItem> = providers
        .iter()
        .map(|provider| {
            let key_source = app.key_source(*provider);
            let is_current = *provider == current;

            let status = match key_source {
                Some("env") => "(env var)",
                Some("config") => "(configured)",
                Some("local") => "(local)",
                _ => "(needs key)",
            };
            let prefix = if is_current { "* " } else { "  " };

            let style = if is_current {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else if key_source.is_some() {
                Style::default()
            } else {
                Style::default().fg(Color::DarkGray)
            };

            ListItem::new(format!("{}{} {}", prefix, provider.display_name(), status)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.provider_picker_state);
}

fn render_api_key_input(app: &App, frame: &mut Frame, area: Rect) {
    let provider_name = app
        .api_key_target_provider
        .map(|p| p.display_name())
        .unwrap_or("Provider");

    let popup_area = centered_rect(60, 7, area);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(format!(" Enter API Key for {} ", provider_name));

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Paste your API key below. Press Enter to save, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let input = Paragraph::new(mask_key(app.api_key_input.value()))
        .style(Style::default().fg(Color::Cyan));
    frame.render_widget(input, input_area);

    let cursor_x = app.api_key_input.cursor().min(input_area.width as usize) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));

    let status = Paragraph::new(format!("{} characters", app.api_key_input.char_count()))
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(status, Rect::new(inner.x, inner.y + 4, inner.width, 1));
}

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;

use crate::app::{App, FocusPane, InputMode, TextInput};
use crate::tui::AppEvent;

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key).await?,
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => {
            app.tick_animation();
        }
        AppEvent::Stream { reply_id, event } => {
            app.apply_stream_event(&reply_id, event);
        }
    }
    Ok(())
}

async fn handle_key(app: &mut App, key: KeyEvent) -> Result<()> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && ctrl {
        app.should_quit = true;
        return Ok(());
    }

    app.notice = None;

    // Popups take every key while open
    if app.show_api_key_input {
        handle_api_key_input(app, key);
        return Ok(());
    }
    if app.show_provider_picker {
        handle_provider_picker(app, key);
        return Ok(());
    }
    if app.show_model_picker {
        handle_model_picker(app, key);
        return Ok(());
    }
    if app.editing_prompt {
        handle_prompt_editing(app, key);
        return Ok(());
    }

    if key.code == KeyCode::F(2) || (key.code == KeyCode::Char('s') && ctrl) {
        app.toggle_settings();
        return Ok(());
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key).await?,
        InputMode::Editing => handle_editing_mode(app, key),
    }

    Ok(())
}

async fn handle_normal_mode(app: &mut App, key: KeyEvent) -> Result<()> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let in_settings = app.show_settings && app.focus == FocusPane::Settings;
    let half_page = (app.chat_height / 2).max(1);

    match key.code {
        KeyCode::Char('l') if ctrl => app.clear_chat(),
        KeyCode::Char('d') if ctrl => app.scroll_down(half_page),
        KeyCode::Char('u') if ctrl => app.scroll_up(half_page),

        // Quit
        KeyCode::Char('q') => app.should_quit = true,

        // Start typing (Enter activates the field when the settings panel has focus)
        KeyCode::Enter if in_settings => app.activate_setting().await,
        KeyCode::Char('i') | KeyCode::Enter => {
            app.focus = FocusPane::Chat;
            app.input_mode = InputMode::Editing;
        }

        // Conversation actions
        KeyCode::Char('r') => app.retry(),
        KeyCode::Char('S') => app.summarize_chat(),

        // Pickers
        KeyCode::Char('P') => app.open_provider_picker(),
        KeyCode::Char('M') => app.open_model_picker().await,

        // Welcome screen prompts
        KeyCode::Char(c @ '1'..='4') if app.chat.messages().is_empty() => {
            app.use_example_prompt(c as usize - '1' as usize);
        }

        // Tab switches between settings and chat when the panel is open
        KeyCode::Tab if app.show_settings => {
            app.focus = match app.focus {
                FocusPane::Chat => FocusPane::Settings,
                FocusPane::Settings => FocusPane::Chat,
            };
        }

        KeyCode::Char('j') | KeyCode::Down => {
            if in_settings {
                app.settings_nav_down();
            } else {
                app.scroll_down(1);
            }
        }
        KeyCode::Char('k') | KeyCode::Up => {
            if in_settings {
                app.settings_nav_up();
            } else {
                app.scroll_up(1);
            }
        }
        KeyCode::Char('h') | KeyCode::Left if in_settings => app.adjust_setting(false),
        KeyCode::Char('l') | KeyCode::Right if in_settings => app.adjust_setting(true),

        KeyCode::PageDown => app.scroll_down(half_page),
        KeyCode::PageUp => app.scroll_up(half_page),
        KeyCode::Char('g') => app.scroll_to_top(),
        KeyCode::Char('G') => app.scroll_to_bottom(),

        KeyCode::Esc if app.show_settings => app.toggle_settings(),

        _ => {}
    }
    Ok(())
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => {
            app.send_input();
        }
        _ => edit_text(&mut app.input, key.code),
    }
}

fn handle_prompt_editing(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.cancel_system_prompt(),
        KeyCode::Enter => app.save_system_prompt(),
        _ => edit_text(&mut app.prompt_input, key.code),
    }
}

fn handle_api_key_input(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.cancel_api_key(),
        KeyCode::Enter => app.save_api_key(),
        _ => edit_text(&mut app.api_key_input, key.code),
    }
}

fn handle_provider_picker(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.show_provider_picker = false;
        }
        KeyCode::Char('j') | KeyCode::Down => {
            app.provider_picker_nav_down();
        }
        KeyCode::Char('k') | KeyCode::Up => {
            app.provider_picker_nav_up();
        }
        KeyCode::Enter => {
            app.select_provider();
        }
        _ => {}
    }
}

fn handle_model_picker(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.show_model_picker = false;
        }
        KeyCode::Char('j') | KeyCode::Down => {
            app.model_picker_nav_down();
        }
        KeyCode::Char('k') | KeyCode::Up => {
            app.model_picker_nav_up();
        }
        KeyCode::Enter => {
            app.select_model();
        }
        _ => {}
    }
}

/// Cursor movement and character editing shared by every text field
fn edit_text(input: &mut TextInput, code: KeyCode) {
    match code {
        KeyCode::Backspace => input.backspace(),
        KeyCode::Delete => input.delete(),
        KeyCode::Left => input.left(),
        KeyCode::Right => input.right(),
        KeyCode::Home => input.home(),
        KeyCode::End => input.end(),
        KeyCode::Char(c) => input.insert(c),
        _ => {}
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let in_chat = app
        .chat_area
        .map(|r| point_in_rect(mouse.column, mouse.row, r))
        .unwrap_or(false);
    if !in_chat {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(3),
        MouseEventKind::ScrollUp => app.scroll_up(3),
        _ => {}
    }
}

use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use thinkai_core::{
    ChatController, Config, MessageId, PendingReply, Provider, ProviderRouter,
    SettingsPatch, StreamEvent,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::tui::AppEvent;

pub const TEMPERATURE_MIN: f64 = 0.0;
pub const TEMPERATURE_MAX: f64 = 2.0;
pub const TEMPERATURE_STEP: f64 = 0.1;

/// Prompts offered on the empty chat screen: (title, text copied into the input)
pub const EXAMPLE_PROMPTS: [(&str, &str); 4] = [
    (
        "Coding & Debugging Help",
        "Help me debug this code and explain what is going wrong.",
    ),
    (
        "Career & Learning Guidance",
        "What skills should I learn next to grow in my career?",
    ),
    (
        "Academic & Concept Explanations",
        "Explain this concept in simple terms with an example.",
    ),
    (
        "Summarize key points",
        "Summarize the key points of the following text.",
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Chat,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    Provider,
    Model,
    Temperature,
    SystemPrompt,
    ClearChat,
    Summarize,
}

impl SettingsField {
    pub fn all() -> [SettingsField; 6] {
        [
            SettingsField::Provider,
            SettingsField::Model,
            SettingsField::Temperature,
            SettingsField::SystemPrompt,
            SettingsField::ClearChat,
            SettingsField::Summarize,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            SettingsField::Provider => "Provider",
            SettingsField::Model => "Model",
            SettingsField::Temperature => "Temperature",
            SettingsField::SystemPrompt => "System prompt",
            SettingsField::ClearChat => "Clear chat",
            SettingsField::Summarize => "Summarize chat",
        }
    }
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Single-line text field with a character-based cursor
#[derive(Debug, Default, Clone)]
pub struct TextInput {
    value: String,
    cursor: usize,
}

impl TextInput {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn char_count(&self) -> usize {
        self.value.chars().count()
    }

    /// Replace the contents, cursor at the end
    pub fn set(&mut self, text: impl Into<String>) {
        self.value = text.into();
        self.cursor = self.char_count();
    }

    pub fn clear(&mut self) {
        self.value.clear();
        self.cursor = 0;
    }

    pub fn insert(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.value, self.cursor);
        self.value.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.value, self.cursor);
            self.value.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.char_count() {
            let byte_pos = char_to_byte_index(&self.value, self.cursor);
            self.value.remove(byte_pos);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.char_count());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.char_count();
    }
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub focus: FocusPane,

    // Conversation
    pub chat: ChatController,
    pub router: ProviderRouter,
    pub config: Config,
    events: UnboundedSender<AppEvent>,

    // Input box
    pub input: TextInput,

    // Chat window scroll; max and height are refreshed during render
    pub chat_scroll: u16,
    pub chat_max_scroll: u16,
    pub chat_height: u16,
    pub follow_output: bool,
    pub chat_area: Option<Rect>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // One-line notice shown in the footer until the next key press
    pub notice: Option<String>,

    // Settings panel state
    pub show_settings: bool,
    pub settings_state: ListState,
    pub editing_prompt: bool,
    pub prompt_input: TextInput,

    // Model picker state
    pub show_model_picker: bool,
    pub available_models: Vec<String>,
    pub model_picker_state: ListState,

    // Provider picker state
    pub show_provider_picker: bool,
    pub provider_picker_state: ListState,

    // API key input state
    pub show_api_key_input: bool,
    pub api_key_input: TextInput,
    pub api_key_target_provider: Option<Provider>,
}

impl App {
    pub fn new(config: Config, router: ProviderRouter, events: UnboundedSender<AppEvent>) -> Self {
        let chat = ChatController::new(config.chat_settings());
        let mut settings_state = ListState::default();
        settings_state.select(Some(0));

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            focus: FocusPane::Chat,
            chat,
            router,
            config,
            events,
            input: TextInput::default(),
            chat_scroll: 0,
            chat_max_scroll: 0,
            chat_height: 0,
            follow_output: true,
            chat_area: None,
            animation_frame: 0,
            notice: None,
            show_settings: false,
            settings_state,
            editing_prompt: false,
            prompt_input: TextInput::default(),
            show_model_picker: false,
            available_models: Vec::new(),
            model_picker_state: ListState::default(),
            show_provider_picker: false,
            provider_picker_state: ListState::default(),
            show_api_key_input: false,
            api_key_input: TextInput::default(),
            api_key_target_provider: None,
        }
    }

    /// Send the input box contents as a new user message
    pub fn send_input(&mut self) {
        let text = self.input.value().trim().to_string();
        if text.is_empty() {
            return;
        }

        match self.chat.send_message(text, &self.router) {
            Ok(pending) => {
                self.input.clear();
                self.follow_output = true;
                self.forward_reply(pending);
            }
            Err(err) => self.notice = Some(err.to_string()),
        }
    }

    pub fn retry(&mut self) {
        match self.chat.retry_last_message(&self.router) {
            Ok(Some(pending)) => {
                self.follow_output = true;
                self.forward_reply(pending);
            }
            Ok(None) => self.notice = Some("Nothing to retry yet".to_string()),
            Err(err) => self.notice = Some(err.to_string()),
        }
    }

    /// Pump a reply's events into the app event loop
    fn forward_reply(&self, pending: PendingReply) {
        let (reply_id, mut events) = pending.into_parts();
        let tx = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let forwarded = AppEvent::Stream {
                    reply_id: reply_id.clone(),
                    event,
                };
                if tx.send(forwarded).is_err() {
                    break;
                }
            }
        });
    }

    pub fn apply_stream_event(&mut self, reply_id: &MessageId, event: StreamEvent) {
        self.chat.apply_event(reply_id, event);
        if !self.chat.is_loading() {
            self.animation_frame = 0;
        }
    }

    pub fn clear_chat(&mut self) {
        self.chat.clear_chat();
        self.chat_scroll = 0;
        self.follow_output = true;
    }

    pub fn summarize_chat(&mut self) {
        self.chat.summarize_chat();
        self.follow_output = true;
    }

    /// Copy one of the welcome-screen prompts into the input box
    pub fn use_example_prompt(&mut self, idx: usize) {
        if let Some((_, text)) = EXAMPLE_PROMPTS.get(idx) {
            self.input.set(*text);
            self.input_mode = InputMode::Editing;
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.chat.is_loading() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Chat scrolling
    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(self.chat_max_scroll);
        if self.chat_scroll >= self.chat_max_scroll {
            self.follow_output = true;
        }
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        if self.chat_scroll < self.chat_max_scroll {
            self.follow_output = false;
        }
    }

    pub fn scroll_to_top(&mut self) {
        self.chat_scroll = 0;
        self.follow_output = self.chat_max_scroll == 0;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.chat_scroll = self.chat_max_scroll;
        self.follow_output = true;
    }

    pub fn toggle_settings(&mut self) {
        self.show_settings = !self.show_settings;
        self.editing_prompt = false;
        if self.show_settings {
            self.focus = FocusPane::Settings;
            self.input_mode = InputMode::Normal;
        } else {
            self.focus = FocusPane::Chat;
        }
    }

    // Settings panel methods
    pub fn selected_setting(&self) -> SettingsField {
        let fields = SettingsField::all();
        let i = self.settings_state.selected().unwrap_or(0);
        fields[i.min(fields.len() - 1)]
    }

    pub fn settings_nav_down(&mut self) {
        let len = SettingsField::all().len();
        let i = self.settings_state.selected().unwrap_or(0);
        self.settings_state.select(Some((i + 1).min(len - 1)));
    }

    pub fn settings_nav_up(&mut self) {
        let i = self.settings_state.selected().unwrap_or(0);
        self.settings_state.select(Some(i.saturating_sub(1)));
    }

    /// Left/right on the selected settings field
    pub fn adjust_setting(&mut self, forward: bool) {
        match self.selected_setting() {
            SettingsField::Provider => {
                let current = self.chat.settings().provider;
                let provider = if forward { current.next() } else { current.prev() };
                self.switch_provider(provider);
            }
            SettingsField::Temperature => {
                let delta = if forward { TEMPERATURE_STEP } else { -TEMPERATURE_STEP };
                let temperature = step_temperature(self.chat.settings().temperature, delta);
                self.chat.update_settings(SettingsPatch::temperature(temperature));
            }
            _ => {}
        }
    }

    /// Enter on the selected settings field
    pub async fn activate_setting(&mut self) {
        match self.selected_setting() {
            SettingsField::Provider => self.open_provider_picker(),
            SettingsField::Model => self.open_model_picker().await,
            SettingsField::Temperature => {}
            SettingsField::SystemPrompt => {
                let current = self.chat.settings().system_prompt.clone();
                self.prompt_input.set(current);
                self.editing_prompt = true;
            }
            SettingsField::ClearChat => self.clear_chat(),
            SettingsField::Summarize => self.summarize_chat(),
        }
    }

    pub fn save_system_prompt(&mut self) {
        let prompt = self.prompt_input.value().to_string();
        self.chat.update_settings(SettingsPatch::system_prompt(prompt));
        self.prompt_input.clear();
        self.editing_prompt = false;
    }

    pub fn cancel_system_prompt(&mut self) {
        self.prompt_input.clear();
        self.editing_prompt = false;
    }

    /// Switch provider and reset the model to that provider's default
    pub fn switch_provider(&mut self, provider: Provider) {
        self.chat.update_settings(SettingsPatch {
            provider: Some(provider),
            model: Some(provider.default_model().to_string()),
            ..Default::default()
        });
        self.available_models.clear();
    }

    // Model picker methods
    pub async fn open_model_picker(&mut self) {
        let provider = self.chat.settings().provider;
        self.available_models = self.router.list_models(provider).await;
        if self.available_models.is_empty() {
            self.notice = Some(format!("No models available for {}", provider.label()));
            return;
        }

        // Select current model if in list, otherwise first
        let current_idx = self
            .available_models
            .iter()
            .position(|m| m == &self.chat.settings().model)
            .unwrap_or(0);
        self.model_picker_state.select(Some(current_idx));
        self.show_model_picker = true;
    }

    pub fn model_picker_nav_down(&mut self) {
        let len = self.available_models.len();
        if len > 0 {
            let i = self.model_picker_state.selected().unwrap_or(0);
            self.model_picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn model_picker_nav_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn select_model(&mut self) {
        if let Some(i) = self.model_picker_state.selected() {
            if let Some(model) = self.available_models.get(i) {
                self.chat.update_settings(SettingsPatch::model(model.clone()));
                self.show_model_picker = false;
            }
        }
    }

    // Provider picker methods
    pub fn open_provider_picker(&mut self) {
        let current = self.chat.settings().provider;
        let current_idx = Provider::all()
            .iter()
            .position(|p| *p == current)
            .unwrap_or(0);
        self.provider_picker_state.select(Some(current_idx));
        self.show_provider_picker = true;
    }

    pub fn provider_picker_nav_down(&mut self) {
        let len = Provider::all().len();
        let i = self.provider_picker_state.selected().unwrap_or(0);
        self.provider_picker_state.select(Some((i + 1).min(len - 1)));
    }

    pub fn provider_picker_nav_up(&mut self) {
        let i = self.provider_picker_state.selected().unwrap_or(0);
        self.provider_picker_state.select(Some(i.saturating_sub(1)));
    }

    /// Choose the highlighted provider, asking for a key first if it has none
    pub fn select_provider(&mut self) {
        let Some(i) = self.provider_picker_state.selected() else {
            return;
        };
        let Some(&provider) = Provider::all().get(i) else {
            return;
        };

        self.show_provider_picker = false;
        if provider.needs_api_key() && !self.router.is_configured(provider) {
            self.api_key_target_provider = Some(provider);
            self.api_key_input.clear();
            self.show_api_key_input = true;
        } else {
            self.switch_provider(provider);
        }
    }

    /// Returns the source of the API key for a provider: "env", "config", "local" or None
    pub fn key_source(&self, provider: Provider) -> Option<&'static str> {
        self.config.key_source(provider)
    }

    pub fn cancel_api_key(&mut self) {
        self.show_api_key_input = false;
        self.api_key_input.clear();
        self.api_key_target_provider = None;
    }

    /// Store the entered key, rebuild the provider clients and switch to the provider
    pub fn save_api_key(&mut self) {
        let key = self.api_key_input.value().trim().to_string();
        let target = self.api_key_target_provider;
        self.cancel_api_key();

        let Some(provider) = target else {
            return;
        };
        if key.is_empty() {
            return;
        }

        self.config.set_api_key(provider, &key);
        self.config.provider = Some(provider.as_str().to_string());
        if let Err(err) = self.config.save() {
            warn!(error = %format!("{:#}", err), "could not save config");
            self.notice = Some(format!("Key not saved to disk: {}", err));
        }

        match ProviderRouter::from_config(&self.config) {
            Ok(router) => {
                self.router = router;
                info!(provider = provider.as_str(), "API key configured");
                self.switch_provider(provider);
            }
            Err(err) => self.notice = Some(format!("{:#}", err)),
        }
    }
}

/// Step a temperature, clamped to the allowed range and rounded to one decimal
pub fn step_temperature(current: f64, delta: f64) -> f64 {
    let next = ((current + delta) * 10.0).round() / 10.0;
    next.clamp(TEMPERATURE_MIN, TEMPERATURE_MAX)
}

/// App with no hosted provider keys, plus the receiving end of its event channel
#[cfg(test)]
pub(crate) fn test_app() -> (App, tokio::sync::mpsc::UnboundedReceiver<AppEvent>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let router = ProviderRouter::new(None, None, thinkai_core::OllamaClient::default());
    (App::new(Config::new(), router, tx), rx)
}

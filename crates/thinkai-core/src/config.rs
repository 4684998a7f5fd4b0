use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result, anyhow};

use crate::provider::Provider;
use crate::state::ChatSettings;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

pub const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";
pub const GEMINI_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub provider: Option<String>,
    pub default_model: Option<String>,
    pub temperature: Option<f64>,
    pub system_prompt: Option<String>,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub gemini_base_url: Option<String>,
    pub ollama_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = serde_json::from_str(&config_content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("thinkai").join("config.json"))
    }

    /// Initial chat settings: built-in defaults overlaid with config values
    pub fn chat_settings(&self) -> ChatSettings {
        let mut settings = ChatSettings::default();

        if let Some(provider) = self.provider.as_deref().and_then(|p| p.parse::<Provider>().ok()) {
            settings.provider = provider;
            settings.model = provider.default_model().to_string();
        }
        if let Some(model) = &self.default_model {
            settings.model = model.clone();
        }
        if let Some(temperature) = self.temperature {
            settings.temperature = temperature;
        }
        if let Some(system_prompt) = &self.system_prompt {
            settings.system_prompt = system_prompt.clone();
        }

        settings
    }

    /// API key for a provider, environment first, then config file
    pub fn api_key(&self, provider: Provider) -> Option<String> {
        let (env_var, configured) = match provider {
            Provider::OpenAI => (OPENAI_KEY_ENV, &self.openai_api_key),
            Provider::Gemini => (GEMINI_KEY_ENV, &self.gemini_api_key),
            Provider::Ollama => return None,
        };

        std::env::var(env_var)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| configured.clone().filter(|k| !k.is_empty()))
    }

    /// Where a provider's key comes from: "env", "config", "local", or None
    pub fn key_source(&self, provider: Provider) -> Option<&'static str> {
        let (env_var, configured) = match provider {
            Provider::OpenAI => (OPENAI_KEY_ENV, &self.openai_api_key),
            Provider::Gemini => (GEMINI_KEY_ENV, &self.gemini_api_key),
            Provider::Ollama => return Some("local"),
        };

        if std::env::var(env_var).map(|k| !k.is_empty()).unwrap_or(false) {
            Some("env")
        } else if configured.as_deref().map(|k| !k.is_empty()).unwrap_or(false) {
            Some("config")
        } else {
            None
        }
    }

    pub fn set_api_key(&mut self, provider: Provider, key: &str) {
        match provider {
            Provider::OpenAI => self.openai_api_key = Some(key.to_string()),
            Provider::Gemini => self.gemini_api_key = Some(key.to_string()),
            Provider::Ollama => {}
        }
    }

    pub fn openai_base_url(&self) -> &str {
        self.openai_base_url.as_deref().unwrap_or(DEFAULT_OPENAI_BASE_URL)
    }

    pub fn gemini_base_url(&self) -> &str {
        self.gemini_base_url.as_deref().unwrap_or(DEFAULT_GEMINI_BASE_URL)
    }

    pub fn ollama_url(&self) -> &str {
        self.ollama_url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE};

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::new());
        assert_eq!(config.chat_settings(), ChatSettings::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::new();
        config.provider = Some("ollama".to_string());
        config.set_api_key(Provider::Gemini, "g-key");
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.gemini_api_key.as_deref(), Some("g-key"));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_chat_settings_overlay() {
        let config = Config {
            provider: Some("Ollama".to_string()),
            temperature: Some(1.2),
            ..Default::default()
        };
        let settings = config.chat_settings();
        assert_eq!(settings.provider, Provider::Ollama);
        assert_eq!(settings.model, Provider::Ollama.default_model());
        assert_eq!(settings.temperature, 1.2);
        assert_eq!(settings.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_chat_settings_explicit_model_wins() {
        let config = Config {
            provider: Some("gemini".to_string()),
            default_model: Some("gemini-1.5-pro".to_string()),
            ..Default::default()
        };
        let settings = config.chat_settings();
        assert_eq!(settings.provider, Provider::Gemini);
        assert_eq!(settings.model, "gemini-1.5-pro");
    }

    #[test]
    fn test_unknown_provider_falls_back() {
        let config = Config {
            provider: Some("dialogflow".to_string()),
            ..Default::default()
        };
        let settings = config.chat_settings();
        assert_eq!(settings.provider, ChatSettings::default().provider);
        assert_eq!(settings.temperature, DEFAULT_TEMPERATURE);
    }

    #[test]
    fn test_ollama_is_local() {
        let config = Config::new();
        assert_eq!(config.key_source(Provider::Ollama), Some("local"));
        assert_eq!(config.api_key(Provider::Ollama), None);
    }

    #[test]
    fn test_endpoint_defaults() {
        let config = Config::new();
        assert_eq!(config.openai_base_url(), DEFAULT_OPENAI_BASE_URL);
        assert_eq!(config.gemini_base_url(), DEFAULT_GEMINI_BASE_URL);
        assert_eq!(config.ollama_url(), DEFAULT_OLLAMA_URL);
        assert_eq!(
            config.request_timeout(),
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
    }
}

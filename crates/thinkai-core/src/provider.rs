use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Gemini,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Gemini => "gemini",
            Provider::Ollama => "ollama",
        }
    }

    pub fn all() -> Vec<Provider> {
        vec![Provider::OpenAI, Provider::Gemini, Provider::Ollama]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::OpenAI => "ChatGPT (OpenAI)",
            Provider::Gemini => "Gemini (Google)",
            Provider::Ollama => "Ollama (Local)",
        }
    }

    /// Short label used in titles and the settings panel
    pub fn label(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::Gemini => "Gemini",
            Provider::Ollama => "Ollama",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAI => "gpt-4o-mini",
            Provider::Gemini => "gemini-1.5-flash",
            Provider::Ollama => "llama3.2:latest",
        }
    }

    pub fn needs_api_key(&self) -> bool {
        !matches!(self, Provider::Ollama)
    }

    /// Next provider in `all()` order, wrapping around
    pub fn next(&self) -> Provider {
        let all = Provider::all();
        let i = all.iter().position(|p| p == self).unwrap_or(0);
        all[(i + 1) % all.len()]
    }

    pub fn prev(&self) -> Provider {
        let all = Provider::all();
        let i = all.iter().position(|p| p == self).unwrap_or(0);
        all[(i + all.len() - 1) % all.len()]
    }
}

impl FromStr for Provider {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "gemini" => Ok(Provider::Gemini),
            "ollama" => Ok(Provider::Ollama),
            _ => Err(ChatError::UnknownProvider(s.to_string())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_is_case_insensitive() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAI);
        assert_eq!(" gemini ".parse::<Provider>().unwrap(), Provider::Gemini);
        assert_eq!("OLLAMA".parse::<Provider>().unwrap(), Provider::Ollama);
    }

    #[test]
    fn test_from_str_unknown() {
        let err = "dialogflow".parse::<Provider>().unwrap_err();
        assert!(matches!(err, ChatError::UnknownProvider(name) if name == "dialogflow"));
    }

    #[test]
    fn test_as_str_round_trips() {
        for provider in Provider::all() {
            assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
    }

    #[test]
    fn test_next_and_prev_wrap() {
        assert_eq!(Provider::Ollama.next(), Provider::OpenAI);
        assert_eq!(Provider::OpenAI.prev(), Provider::Ollama);
        assert_eq!(Provider::OpenAI.next().prev(), Provider::OpenAI);
    }

    #[test]
    fn test_only_ollama_runs_without_key() {
        assert!(Provider::OpenAI.needs_api_key());
        assert!(Provider::Gemini.needs_api_key());
        assert!(!Provider::Ollama.needs_api_key());
    }
}

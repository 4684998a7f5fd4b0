use anyhow::{Context, Result};
use reqwest::Client;
use tracing::info;

use super::{GeminiClient, OllamaClient, OpenAIClient};
use crate::config::Config;
use crate::provider::Provider;
use crate::stream::{event_channel, ChatEventStream, ChatStreamer, StreamRequest};

/// Dispatches each request to the client for `settings.provider`.
///
/// Hosted providers are optional; a request for one without a key fails
/// through the event stream like any other stream error.
#[derive(Clone)]
pub struct ProviderRouter {
    openai: Option<OpenAIClient>,
    gemini: Option<GeminiClient>,
    ollama: OllamaClient,
}

impl ProviderRouter {
    pub fn new(
        openai: Option<OpenAIClient>,
        gemini: Option<GeminiClient>,
        ollama: OllamaClient,
    ) -> Self {
        Self {
            openai,
            gemini,
            ollama,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        // Streams may run for minutes, so only connecting and each read are bounded
        let timeout = config.request_timeout();
        let http = Client::builder()
            .connect_timeout(timeout)
            .build()
            .context("building HTTP client")?;

        let openai = config.api_key(Provider::OpenAI).map(|key| {
            OpenAIClient::new(&key)
                .with_base_url(config.openai_base_url())
                .with_http_client(http.clone())
                .with_idle_timeout(timeout)
        });
        let gemini = config.api_key(Provider::Gemini).map(|key| {
            GeminiClient::new(&key)
                .with_base_url(config.gemini_base_url())
                .with_http_client(http.clone())
                .with_idle_timeout(timeout)
        });
        let ollama = OllamaClient::new(config.ollama_url())
            .with_http_client(http)
            .with_idle_timeout(timeout);

        info!(
            openai = openai.is_some(),
            gemini = gemini.is_some(),
            ollama_url = config.ollama_url(),
            "provider clients ready"
        );

        Ok(Self::new(openai, gemini, ollama))
    }

    pub fn is_configured(&self, provider: Provider) -> bool {
        match provider {
            Provider::OpenAI => self.openai.is_some(),
            Provider::Gemini => self.gemini.is_some(),
            Provider::Ollama => true,
        }
    }

    /// Model choices for a provider; Ollama asks the local server
    pub async fn list_models(&self, provider: Provider) -> Vec<String> {
        match provider {
            Provider::OpenAI => OpenAIClient::list_models(),
            Provider::Gemini => GeminiClient::list_models(),
            Provider::Ollama => self.ollama.list_models().await.unwrap_or_default(),
        }
    }
}

impl ChatStreamer for ProviderRouter {
    fn stream(&self, request: StreamRequest) -> ChatEventStream {
        let provider = request.settings.provider;
        match provider {
            Provider::OpenAI => match &self.openai {
                Some(client) => client.stream(request),
                None => missing_key(provider),
            },
            Provider::Gemini => match &self.gemini {
                Some(client) => client.stream(request),
                None => missing_key(provider),
            },
            Provider::Ollama => self.ollama.stream(request),
        }
    }
}

pub fn missing_key_message(provider: Provider) -> String {
    format!(
        "{} API key not configured. Press 'P' to set one up.",
        provider.label()
    )
}

fn missing_key(provider: Provider) -> ChatEventStream {
    let (tx, rx) = event_channel();
    tx.fail(missing_key_message(provider));
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ChatSettings, Message};
    use crate::stream::StreamEvent;

    fn request_for(provider: Provider) -> StreamRequest {
        StreamRequest {
            messages: vec![Message::user("hi")],
            settings: ChatSettings {
                provider,
                model: provider.default_model().to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_missing_key_fails_immediately() {
        let router = ProviderRouter::new(None, None, OllamaClient::default());

        for provider in [Provider::OpenAI, Provider::Gemini] {
            let mut events = router.stream(request_for(provider));
            assert_eq!(
                events.try_recv(),
                Some(StreamEvent::Error(missing_key_message(provider)))
            );
            assert_eq!(events.try_recv(), None);
            assert!(events.is_finished());
        }
    }

    #[test]
    fn test_is_configured() {
        let router = ProviderRouter::new(
            Some(OpenAIClient::new("sk-test")),
            None,
            OllamaClient::default(),
        );
        assert!(router.is_configured(Provider::OpenAI));
        assert!(!router.is_configured(Provider::Gemini));
        assert!(router.is_configured(Provider::Ollama));
    }

    #[tokio::test]
    async fn test_static_model_lists() {
        let router = ProviderRouter::new(None, None, OllamaClient::default());
        assert!(router
            .list_models(Provider::OpenAI)
            .await
            .contains(&"gpt-4o-mini".to_string()));
        assert!(router
            .list_models(Provider::Gemini)
            .await
            .contains(&"gemini-1.5-flash".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_ollama_reports_error() {
        // Port 9 (discard) is closed on test machines, so the connection is refused
        let router = ProviderRouter::new(None, None, OllamaClient::new("http://127.0.0.1:9"));
        let mut events = router.stream(request_for(Provider::Ollama));

        match events.recv().await {
            Some(StreamEvent::Error(message)) => assert!(message.contains("Ollama request failed")),
            other => panic!("expected error event, got {:?}", other),
        }
    }
}

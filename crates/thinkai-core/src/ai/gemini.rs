use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use anyhow::{anyhow, Context, Result};

use super::{ensure_success, pump_lines, send_within, spawn_worker, Frame, DEFAULT_STREAM_IDLE};
use crate::config::DEFAULT_GEMINI_BASE_URL;
use crate::provider::Provider;
use crate::state::Sender;
use crate::stream::{ChatEventStream, ChatStreamer, StreamRequest, StreamSender};

#[derive(Serialize, Debug)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize, Debug)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
struct GeminiChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiChunkContent>,
}

#[derive(Deserialize)]
struct GeminiChunkContent {
    #[serde(default)]
    parts: Vec<GeminiChunkPart>,
}

#[derive(Deserialize)]
struct GeminiChunkPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    idle_timeout: Duration,
}

impl GeminiClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            idle_timeout: DEFAULT_STREAM_IDLE,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Longest gap allowed between two reads of a response body
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    async fn run(self, request: StreamRequest, tx: StreamSender) -> Result<()> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, request.settings.model
        );
        let body = build_request(&request);

        let builder = self.client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body);

        let response = send_within(builder, self.idle_timeout)
            .await
            .context("Gemini request failed")?;

        let response = ensure_success(response, "Gemini").await?;
        pump_lines(response, &tx, self.idle_timeout, parse_line).await
    }

    pub fn list_models() -> Vec<String> {
        vec![
            "gemini-1.5-flash".to_string(),
            "gemini-1.5-pro".to_string(),
            "gemini-2.0-flash".to_string(),
        ]
    }
}

impl ChatStreamer for GeminiClient {
    fn stream(&self, request: StreamRequest) -> ChatEventStream {
        let client = self.clone();
        spawn_worker(Provider::Gemini, move |tx| client.run(request, tx))
    }
}

fn build_request(request: &StreamRequest) -> GeminiRequest {
    let settings = &request.settings;

    let contents = request
        .messages
        .iter()
        .filter(|m| m.is_prompt_content())
        .map(|m| GeminiContent {
            role: Some(if m.sender == Sender::User { "user" } else { "model" }),
            parts: vec![GeminiPart { text: m.text.clone() }],
        })
        .collect();

    let system_instruction = (!settings.system_prompt.trim().is_empty()).then(|| GeminiContent {
        role: None,
        parts: vec![GeminiPart {
            text: settings.system_prompt.clone(),
        }],
    });

    GeminiRequest {
        contents,
        system_instruction,
        generation_config: GenerationConfig {
            temperature: settings.temperature,
        },
    }
}

/// Server-sent events carrying full `GenerateContentResponse` objects.
/// There is no end marker; the body simply ends.
fn parse_line(line: &str) -> Result<Frame> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(Frame::skip());
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(Frame::skip());
    }

    let chunk: GeminiChunk = serde_json::from_str(data)
        .with_context(|| format!("unexpected Gemini stream payload: {}", data))?;
    if let Some(error) = chunk.error {
        return Err(anyhow!("Gemini error: {}", error.message));
    }

    let text: String = chunk
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    Ok(Frame::text(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ChatSettings, Message};

    fn request(messages: Vec<Message>, system_prompt: &str) -> StreamRequest {
        StreamRequest {
            messages,
            settings: ChatSettings {
                provider: Provider::Gemini,
                model: "gemini-1.5-flash".to_string(),
                temperature: 0.9,
                system_prompt: system_prompt.to_string(),
            },
        }
    }

    #[test]
    fn test_build_request_uses_model_role() {
        let mut reply = Message::bot_placeholder();
        reply.text = "Hi there".to_string();
        let body = build_request(&request(
            vec![Message::user("hi"), reply, Message::user("how are you?")],
            "Be brief.",
        ));

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][2]["parts"][0]["text"], "how are you?");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["generationConfig"]["temperature"], 0.9);
    }

    #[test]
    fn test_build_request_omits_empty_system_instruction() {
        let body = build_request(&request(vec![Message::user("hi")], ""));
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_parse_joins_parts() {
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}],"role":"model"}}]}"#;
        assert_eq!(parse_line(line).unwrap(), Frame::text("Hello"));
    }

    #[test]
    fn test_parse_finish_chunk_without_content() {
        let line = r#"data: {"candidates":[{"finishReason":"STOP"}],"usageMetadata":{"totalTokenCount":12}}"#;
        assert_eq!(parse_line(line).unwrap(), Frame::skip());
    }

    #[test]
    fn test_parse_non_data_lines() {
        assert_eq!(parse_line("").unwrap(), Frame::skip());
        assert_eq!(parse_line("event: ping").unwrap(), Frame::skip());
    }

    #[test]
    fn test_parse_error_line() {
        let line = r#"data: {"error":{"code":429,"message":"Resource exhausted","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = parse_line(line).unwrap_err();
        assert_eq!(err.to_string(), "Gemini error: Resource exhausted");
    }
}

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use anyhow::{Context, Result};

use super::{ensure_success, pump_lines, send_within, spawn_worker, Frame, DEFAULT_STREAM_IDLE};
use crate::config::DEFAULT_OPENAI_BASE_URL;
use crate::provider::Provider;
use crate::state::Sender;
use crate::stream::{ChatEventStream, ChatStreamer, StreamRequest, StreamSender};

#[derive(Serialize, Debug, PartialEq)]
struct OpenAIMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize, Debug)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f64,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIChunk {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    #[serde(default)]
    delta: OpenAIDelta,
}

#[derive(Deserialize, Default)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    base_url: String,
    idle_timeout: Duration,
}

impl OpenAIClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
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
        let url = format!("{}/chat/completions", self.base_url);
        let body = build_request(&request);

        let builder = self.client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);

        let response = send_within(builder, self.idle_timeout)
            .await
            .context("OpenAI request failed")?;

        let response = ensure_success(response, "OpenAI").await?;
        pump_lines(response, &tx, self.idle_timeout, parse_line).await
    }

    pub fn list_models() -> Vec<String> {
        vec![
            "gpt-4o-mini".to_string(),
            "gpt-4o".to_string(),
            "gpt-4-turbo".to_string(),
            "gpt-3.5-turbo".to_string(),
        ]
    }
}

impl ChatStreamer for OpenAIClient {
    fn stream(&self, request: StreamRequest) -> ChatEventStream {
        let client = self.clone();
        spawn_worker(Provider::OpenAI, move |tx| client.run(request, tx))
    }
}

fn build_request(request: &StreamRequest) -> OpenAIRequest {
    let settings = &request.settings;
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if !settings.system_prompt.trim().is_empty() {
        messages.push(OpenAIMessage {
            role: "system",
            content: settings.system_prompt.clone(),
        });
    }

    messages.extend(
        request
            .messages
            .iter()
            .filter(|m| m.is_prompt_content())
            .map(|m| OpenAIMessage {
                role: if m.sender == Sender::User { "user" } else { "assistant" },
                content: m.text.clone(),
            }),
    );

    OpenAIRequest {
        model: settings.model.clone(),
        messages,
        temperature: settings.temperature,
        stream: true,
    }
}

/// Server-sent events: `data: {json}` lines, terminated by `data: [DONE]`
fn parse_line(line: &str) -> Result<Frame> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(Frame::skip());
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(Frame::skip());
    }
    if data == "[DONE]" {
        return Ok(Frame::finished());
    }

    let chunk: OpenAIChunk = serde_json::from_str(data)
        .with_context(|| format!("unexpected OpenAI stream payload: {}", data))?;
    let text = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .unwrap_or_default();
    Ok(Frame::text(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ChatSettings, Message};

    fn request(messages: Vec<Message>) -> StreamRequest {
        StreamRequest {
            messages,
            settings: ChatSettings {
                provider: Provider::OpenAI,
                model: "gpt-4o".to_string(),
                temperature: 0.3,
                system_prompt: "Be nice.".to_string(),
            },
        }
    }

    #[test]
    fn test_build_request_maps_roles() {
        let mut reply = Message::bot_placeholder();
        reply.text = "Hello!".to_string();
        let mut failed = Message::bot_placeholder();
        failed.text = "Error: boom".to_string();
        failed.error = true;

        let body = build_request(&request(vec![
            Message::user("hi"),
            reply,
            Message::system("Conversation has been summarized by the user."),
            failed,
            Message::user("again"),
        ]));

        let roles: Vec<&str> = body.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(body.messages[0].content, "Be nice.");
        assert_eq!(body.model, "gpt-4o");
        assert_eq!(body.temperature, 0.3);
        assert!(body.stream);
    }

    #[test]
    fn test_build_request_skips_blank_system_prompt() {
        let mut req = request(vec![Message::user("hi")]);
        req.settings.system_prompt = "  ".to_string();
        let body = build_request(&req);
        assert_eq!(body.messages.len(), 1);
        assert_eq!(body.messages[0].role, "user");
    }

    #[test]
    fn test_request_serializes_stream_flag() {
        let body = build_request(&request(vec![Message::user("hi")]));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_parse_delta() {
        let line = r#"data: {"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_line(line).unwrap(), Frame::text("Hel"));
    }

    #[test]
    fn test_parse_role_only_delta_is_skipped() {
        let line = r#"data: {"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_line(line).unwrap(), Frame::skip());
    }

    #[test]
    fn test_parse_done_marker() {
        assert_eq!(parse_line("data: [DONE]").unwrap(), Frame::finished());
    }

    #[test]
    fn test_parse_ignores_comments_and_blank_lines() {
        assert_eq!(parse_line("").unwrap(), Frame::skip());
        assert_eq!(parse_line(": keep-alive").unwrap(), Frame::skip());
        assert_eq!(parse_line("event: message").unwrap(), Frame::skip());
    }

    #[test]
    fn test_parse_garbage_is_an_error() {
        assert!(parse_line("data: {oops").is_err());
    }
}

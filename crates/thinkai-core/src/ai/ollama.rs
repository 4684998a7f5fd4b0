use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use anyhow::{Context, Result, anyhow};

use super::{ensure_success, pump_lines, send_within, spawn_worker, Frame, DEFAULT_STREAM_IDLE};
use crate::config::DEFAULT_OLLAMA_URL;
use crate::provider::Provider;
use crate::state::Sender;
use crate::stream::{ChatEventStream, ChatStreamer, StreamRequest, StreamSender};

#[derive(Serialize, Debug)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize, Debug)]
struct OllamaOptions {
    temperature: f64,
}

#[derive(Serialize, Debug)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Deserialize)]
struct OllamaChatChunk {
    #[serde(default)]
    message: Option<OllamaChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    idle_timeout: Duration,
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_URL)
    }
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            idle_timeout: DEFAULT_STREAM_IDLE,
        }
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
        let url = format!("{}/api/chat", self.base_url);
        let body = build_request(&request);

        let builder = self.client
            .post(&url)
            .json(&body);

        let response = send_within(builder, self.idle_timeout)
            .await
            .context("Ollama request failed. Make sure Ollama is running with: ollama serve")?;

        let response = ensure_success(response, "Ollama").await?;
        pump_lines(response, &tx, self.idle_timeout, parse_line).await
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!("Failed to list models: {}", response.status()));
        }

        let models_response: OllamaModelsResponse = response.json().await?;
        let model_names: Vec<String> = models_response
            .models
            .into_iter()
            .map(|model| model.name)
            .collect();

        Ok(model_names)
    }
}

impl ChatStreamer for OllamaClient {
    fn stream(&self, request: StreamRequest) -> ChatEventStream {
        let client = self.clone();
        spawn_worker(Provider::Ollama, move |tx| client.run(request, tx))
    }
}

fn build_request(request: &StreamRequest) -> OllamaChatRequest {
    let settings = &request.settings;
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if !settings.system_prompt.trim().is_empty() {
        messages.push(OllamaMessage {
            role: "system",
            content: settings.system_prompt.clone(),
        });
    }

    for msg in request.messages.iter().filter(|m| m.is_prompt_content()) {
        messages.push(OllamaMessage {
            role: if msg.sender == Sender::User { "user" } else { "assistant" },
            content: msg.text.clone(),
        });
    }

    OllamaChatRequest {
        model: settings.model.clone(),
        messages,
        stream: true,
        options: OllamaOptions {
            temperature: settings.temperature,
        },
    }
}

/// Newline-delimited JSON, one object per line, last one has `done: true`
fn parse_line(line: &str) -> Result<Frame> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Frame::skip());
    }

    let chunk: OllamaChatChunk = serde_json::from_str(line)
        .with_context(|| format!("unexpected Ollama stream payload: {}", line))?;
    if let Some(error) = chunk.error {
        return Err(anyhow!("Ollama error: {}", error));
    }

    let mut frame = Frame::text(chunk.message.map(|m| m.content).unwrap_or_default());
    frame.finished = chunk.done;
    Ok(frame)
}

pub mod gemini;
pub mod lines;
pub mod ollama;
pub mod openai;
pub mod router;

pub use gemini::GeminiClient;
pub use lines::LineBuffer;
pub use ollama::OllamaClient;
pub use openai::OpenAIClient;
pub use router::ProviderRouter;

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::config::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::provider::Provider;
use crate::stream::{event_channel, ChatEventStream, StreamSender};

pub(crate) const DEFAULT_STREAM_IDLE: Duration = Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS);

/// One parsed line of a streaming response body
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Frame {
    pub text: Option<String>,
    pub finished: bool,
}

impl Frame {
    pub fn skip() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            text: (!text.is_empty()).then_some(text),
            finished: false,
        }
    }

    pub fn finished() -> Self {
        Self {
            text: None,
            finished: true,
        }
    }
}

/// Run a provider request on a background task, reporting any failure as the
/// stream's terminal error event.
pub(crate) fn spawn_worker<F, Fut>(provider: Provider, work: F) -> ChatEventStream
where
    F: FnOnce(StreamSender) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (tx, rx) = event_channel();
    let job = work(tx.clone());
    tokio::spawn(async move {
        if let Err(err) = job.await {
            warn!(provider = provider.as_str(), error = %format!("{:#}", err), "stream failed");
            tx.fail(format!("{:#}", err));
        }
    });
    rx
}

/// Feed a streaming HTTP body through `parse` line by line, forwarding text as
/// chunks. The end of the body counts as completion. A body that sends nothing
/// for `idle` fails the stream; total duration is unbounded.
pub(crate) async fn pump_lines(
    response: reqwest::Response,
    tx: &StreamSender,
    idle: Duration,
    parse: fn(&str) -> Result<Frame>,
) -> Result<()> {
    let mut body = response.bytes_stream();
    let mut buffer = LineBuffer::default();

    loop {
        let next = tokio::time::timeout(idle, body.next())
            .await
            .map_err(|_| anyhow!("response stream stalled for more than {}s", idle.as_secs_f32()))?;
        let Some(bytes) = next else { break };
        if tx.is_closed() {
            debug!("reader dropped, abandoning response");
            return Ok(());
        }

        let bytes = bytes.context("reading response stream")?;
        for line in buffer.push(&bytes) {
            if forward(parse(&line)?, tx) {
                return Ok(());
            }
        }
    }

    if let Some(line) = buffer.finish() {
        if forward(parse(&line)?, tx) {
            return Ok(());
        }
    }

    debug!("response body ended");
    tx.done();
    Ok(())
}

/// Returns true when the stream is over, either finished or abandoned by the reader
fn forward(frame: Frame, tx: &StreamSender) -> bool {
    if let Some(text) = frame.text {
        if !tx.chunk(text) {
            debug!("reader dropped, abandoning response");
            return true;
        }
    }
    if frame.finished {
        tx.done();
        return true;
    }
    false
}

/// Send a request, failing if the server has not answered within `idle`
pub(crate) async fn send_within(request: reqwest::RequestBuilder, idle: Duration) -> Result<reqwest::Response> {
    let response = tokio::time::timeout(idle, request.send())
        .await
        .map_err(|_| anyhow!("no response within {}s", idle.as_secs_f32()))??;
    Ok(response)
}

/// Turn a non-success response into an error carrying status and body
pub(crate) async fn ensure_success(response: reqwest::Response, api: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(anyhow!("{} API error {}: {}", api, status, text.trim()))
}

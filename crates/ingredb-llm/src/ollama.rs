//! Ollama `/api/chat` client.
//!
//! Whole-text generation posts `stream: false` and reads `message.content`.
//! Streaming generation reads the NDJSON body chunk by chunk and hands each
//! decoded fragment to the caller as soon as its line is complete.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use ingredb_core::config::LlmSettings;
use ingredb_core::traits::TextGenerator;
use ingredb_core::Error;

pub struct OllamaClient {
    rt: Runtime,
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    message: Option<ReplyMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            rt,
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
        })
    }

    pub fn model(&self) -> &str { &self.model }

    fn request<'a>(&'a self, system: &'a str, user: &'a str, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "system", content: system }, ChatMessage { role: "user", content: user }],
            stream,
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Ollama HTTP error at {url}"))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!("Ollama returned {status}: {text}")).into());
        }
        Ok(response)
    }
}

impl TextGenerator for OllamaClient {
    fn generate(&self, system: &str, user: &str) -> Result<String> {
        let start = Instant::now();
        let body = self.request(system, user, false);
        let reply: ChatReply = self.rt.block_on(async {
            let response = self.send(&body).await?;
            response.json::<ChatReply>().await.context("Ollama JSON parse error")
        })?;
        if let Some(error) = reply.error {
            return Err(Error::Generation(error).into());
        }
        let text = reply.message.map(|m| m.content).unwrap_or_default();
        debug!(model = %self.model, chars = text.len(), elapsed_ms = start.elapsed().as_millis(), "generation done");
        Ok(text)
    }

    fn generate_stream(&self, system: &str, user: &str, on_fragment: &mut dyn FnMut(&str)) -> Result<String> {
        let start = Instant::now();
        let body = self.request(system, user, true);
        let text = self.rt.block_on(async {
            let mut response = self.send(&body).await?;
            let mut lines = LineBuffer::default();
            let mut text = String::new();
            while let Some(chunk) = response.chunk().await.context("reading Ollama stream")? {
                for line in lines.push(&chunk) {
                    if decode_line(&line, &mut text, on_fragment)? { return Ok(text); }
                }
            }
            if let Some(line) = lines.finish() {
                decode_line(&line, &mut text, on_fragment)?;
            }
            Ok::<_, anyhow::Error>(text)
        })?;
        debug!(model = %self.model, chars = text.len(), elapsed_ms = start.elapsed().as_millis(), "streamed generation done");
        Ok(text)
    }
}

/// Decodes one NDJSON line, forwarding its fragment. Returns `true` once the
/// server marks the stream done.
fn decode_line(line: &str, text: &mut String, on_fragment: &mut dyn FnMut(&str)) -> Result<bool> {
    let line = line.trim();
    if line.is_empty() { return Ok(false); }
    let reply: ChatReply = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "skipping undecodable stream line");
            return Ok(false);
        }
    };
    if let Some(error) = reply.error {
        return Err(Error::Generation(error).into());
    }
    if let Some(message) = reply.message {
        if !message.content.is_empty() {
            on_fragment(&message.content);
            text.push_str(&message.content);
        }
    }
    Ok(reply.done)
}

/// Splits a byte stream into lines. Chunk boundaries may fall anywhere,
/// including inside a multi-byte character.
#[derive(Default)]
struct LineBuffer { pending: Vec<u8> }

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() { return None; }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

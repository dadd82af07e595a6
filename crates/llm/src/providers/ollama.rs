//! Ollama LLM provider implementation.
//!
//! This module provides integration with Ollama, a local LLM runtime.
//! Ollama API: https://github.com/ollama/ollama/blob/main/docs/api.md

use crate::client::{ChatMessage, LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage};
use futures::StreamExt;
use inkchat_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Ollama `/api/chat` request format.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize, Default)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// Ollama `/api/chat` response format (one line when streaming).
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    model: String,
    #[serde(default)]
    message: Option<OllamaMessage>,
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChatResponse {
    fn usage(&self) -> LlmUsage {
        LlmUsage::new(
            self.prompt_eval_count.unwrap_or(0),
            self.eval_count.unwrap_or(0),
        )
    }

    fn into_chunk(self) -> LlmStreamChunk {
        let usage = self.done.then(|| self.usage());
        LlmStreamChunk {
            content: self.message.map(|m| m.content).unwrap_or_default(),
            model: self.model,
            done: self.done,
            usage,
        }
    }
}

/// Ollama LLM client.
pub struct OllamaClient {
    /// Base URL for Ollama API
    base_url: String,

    /// HTTP client
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new Ollama client with default settings.
    ///
    /// Default URL: http://localhost:11434
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_OLLAMA_URL)
    }

    /// Create a new Ollama client with a custom base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn to_ollama_request<'a>(&self, request: &'a LlmRequest, stream: bool) -> OllamaChatRequest<'a> {
        let options = if request.temperature.is_some()
            || request.top_p.is_some()
            || request.max_tokens.is_some()
        {
            Some(OllamaOptions {
                temperature: request.temperature,
                top_p: request.top_p,
                num_predict: request.max_tokens,
            })
        } else {
            None
        };

        OllamaChatRequest {
            model: &request.model,
            messages: &request.messages,
            stream,
            options,
        }
    }

    async fn send(&self, body: &OllamaChatRequest<'_>) -> AppResult<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Generation(format!("Failed to send request to Ollama: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Generation(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Split complete lines off the front of `buffer`, leaving any partial line.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line).trim().to_string();
        if !text.is_empty() {
            lines.push(text);
        }
    }
    lines
}

fn parse_line(line: &str) -> AppResult<LlmStreamChunk> {
    let response: OllamaChatResponse = serde_json::from_str(line)
        .map_err(|e| AppError::Generation(format!("Failed to parse chunk: {}", e)))?;
    Ok(response.into_chunk())
}

#[async_trait::async_trait]
impl LlmClient for OllamaClient {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        tracing::info!(model = %request.model, "Sending completion request to Ollama");

        let body = self.to_ollama_request(request, false);
        let response = self.send(&body).await?;

        let chat: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::Generation(format!("Failed to parse Ollama response: {}", e)))?;

        tracing::info!("Received completion from Ollama");

        let usage = chat.usage();
        Ok(LlmResponse {
            content: chat.message.map(|m| m.content).unwrap_or_default(),
            model: chat.model,
            usage,
            done: chat.done,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        tracing::info!(model = %request.model, "Starting streaming request to Ollama");

        let body = self.to_ollama_request(request, true);
        let response = self.send(&body).await?;

        // Ollama sends newline-delimited JSON; a line can span several reads.
        let stream = response
            .bytes_stream()
            .scan(Vec::<u8>::new(), |buffer, result| {
                let items: Vec<AppResult<LlmStreamChunk>> = match result {
                    Ok(bytes) => {
                        buffer.extend_from_slice(&bytes);
                        drain_lines(buffer).iter().map(|l| parse_line(l)).collect()
                    }
                    Err(e) => vec![Err(AppError::Generation(format!("Stream error: {}", e)))],
                };
                futures::future::ready(Some(futures::stream::iter(items)))
            })
            .flatten();

        Ok(Box::pin(stream))
    }
}

//! OpenAI chat completion provider.
//!
//! Talks to `/v1/chat/completions`; streaming uses server-sent events that
//! end with a `data: [DONE]` line.

use crate::client::{ChatMessage, LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use inkchat_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Default OpenAI API base URL.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<Usage> for LlmUsage {
    fn from(usage: Usage) -> Self {
        LlmUsage::new(usage.prompt_tokens, usage.completion_tokens)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// OpenAI chat client.
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create a client for the public OpenAI API.
    pub fn new(api_key: impl Into<String>) -> AppResult<Self> {
        Self::with_base_url(api_key, DEFAULT_OPENAI_URL)
    }

    /// Create a client for an OpenAI-compatible endpoint.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> AppResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AppError::MissingCredential(
                "OpenAI API key must not be empty".to_string(),
            ));
        }
        if !api_key.starts_with("sk-") {
            tracing::warn!("OpenAI API key does not start with 'sk-'; requests may be rejected");
        }

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        })
    }

    fn to_openai_request<'a>(&self, request: &'a LlmRequest, stream: bool) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stream,
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
        }
    }

    async fn send(&self, body: &ChatCompletionRequest<'_>) -> AppResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Generation(format!("Failed to send request to OpenAI: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(AppError::MissingCredential(format!(
                    "OpenAI rejected the API key: {}",
                    detail
                )));
            }
            return Err(AppError::Generation(format!(
                "OpenAI API error ({}): {}",
                status, detail
            )));
        }

        Ok(response)
    }
}

/// Turn one SSE `data:` payload into a stream chunk.
///
/// Returns `None` for payloads that carry nothing (e.g. the initial role delta).
fn parse_stream_event(data: &str, model: &str) -> AppResult<Option<LlmStreamChunk>> {
    if data.trim() == DONE_MARKER {
        return Ok(Some(LlmStreamChunk {
            content: String::new(),
            model: model.to_string(),
            done: true,
            usage: None,
        }));
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(data)
        .map_err(|e| AppError::Generation(format!("Failed to parse stream chunk: {}", e)))?;

    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .unwrap_or_default();
    let usage = chunk.usage.map(LlmUsage::from);

    if content.is_empty() && usage.is_none() {
        return Ok(None);
    }

    Ok(Some(LlmStreamChunk {
        content,
        model: if chunk.model.is_empty() {
            model.to_string()
        } else {
            chunk.model
        },
        done: false,
        usage,
    }))
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        tracing::info!(model = %request.model, messages = request.messages.len(), "Sending completion request to OpenAI");

        let body = self.to_openai_request(request, false);
        let response = self.send(&body).await?;

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Generation(format!("Failed to parse OpenAI response: {}", e)))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Generation("OpenAI returned no choices".to_string()))?;

        tracing::debug!(finish_reason = ?choice.finish_reason, "Received completion from OpenAI");

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            model: completion.model,
            usage: completion.usage.map(LlmUsage::from).unwrap_or_default(),
            done: true,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        tracing::info!(model = %request.model, messages = request.messages.len(), "Starting streaming request to OpenAI");

        let body = self.to_openai_request(request, true);
        let response = self.send(&body).await?;

        let model = request.model.clone();
        let stream = response.bytes_stream().eventsource().filter_map(move |event| {
            let item = match event {
                Ok(event) => parse_stream_event(&event.data, &model).transpose(),
                Err(e) => Some(Err(AppError::Generation(format!("Stream error: {}", e)))),
            };
            futures::future::ready(item)
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_is_missing_credential() {
        let result = OpenAiClient::new("  ");
        assert!(matches!(result, Err(AppError::MissingCredential(_))));
    }

    #[test]
    fn test_request_conversion() {
        let client = OpenAiClient::with_base_url("sk-test", "http://localhost:8080/v1/").unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/v1");

        let request = LlmRequest::from_prompt("Hello", "gpt-3.5-turbo").with_temperature(0.0);
        let body = client.to_openai_request(&request, true);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_parse_content_delta() {
        let data = r#"{"model":"gpt-3.5-turbo","choices":[{"delta":{"content":"Hel"}}]}"#;
        let chunk = parse_stream_event(data, "fallback").unwrap().unwrap();
        assert_eq!(chunk.content, "Hel");
        assert_eq!(chunk.model, "gpt-3.5-turbo");
        assert!(!chunk.done);
    }

    #[test]
    fn test_parse_role_delta_is_skipped() {
        let data = r#"{"model":"gpt-3.5-turbo","choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(parse_stream_event(data, "gpt-3.5-turbo").unwrap().is_none());
    }

    #[test]
    fn test_parse_usage_chunk() {
        let data = r#"{"model":"gpt-3.5-turbo","choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}"#;
        let chunk = parse_stream_event(data, "gpt-3.5-turbo").unwrap().unwrap();
        assert_eq!(chunk.usage, Some(LlmUsage::new(12, 3)));
    }

    #[test]
    fn test_parse_done_marker() {
        let chunk = parse_stream_event("[DONE]", "gpt-3.5-turbo").unwrap().unwrap();
        assert!(chunk.done);
        assert!(chunk.content.is_empty());
    }

    #[test]
    fn test_parse_garbage_is_generation_error() {
        let result = parse_stream_event("{not json", "gpt-3.5-turbo");
        assert!(matches!(result, Err(AppError::Generation(_))));
    }
}

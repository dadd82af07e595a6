//! Ollama Embedding Provider
//!
//! Provides semantic embeddings via Ollama's local API using models like nomic-embed-text.
//! Requests are sent one text at a time with retry and exponential backoff.

use crate::embeddings::EmbeddingProvider;
use async_trait::async_trait;
use inkchat_core::{AppError, AppResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Ollama API endpoint for embeddings
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const EMBEDDING_ENDPOINT: &str = "/api/embeddings";

/// Maximum retry attempts for failed requests
const MAX_RETRIES: u32 = 3;

/// Initial backoff duration in milliseconds
const INITIAL_BACKOFF_MS: u64 = 100;

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Ollama embedding provider using local API
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    /// Ollama API base URL
    base_url: String,
    /// Model name (e.g., "nomic-embed-text")
    model: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl OllamaProvider {
    /// Create a provider for `model`.
    ///
    /// No request is made here; an unreachable server surfaces on the first
    /// embedding call as an `EmbeddingService` error.
    pub fn new(model: impl Into<String>) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                AppError::EmbeddingService(format!(
                    "Failed to create HTTP client for Ollama: {}",
                    e
                ))
            })?;

        Ok(Self {
            client,
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: model.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[instrument(skip(self, text), fields(text_len = text.len(), model = %self.model))]
    async fn embed_with_retries(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut attempt = 0;

        loop {
            match self.embed_single(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        return Err(e);
                    }
                    let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                    warn!(
                        "Embedding failed (attempt {}/{}), retrying in {}ms",
                        attempt, MAX_RETRIES, backoff_ms
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    }

    async fn embed_single(&self, text: &str) -> AppResult<Vec<f32>> {
        let url = format!("{}{}", self.base_url, EMBEDDING_ENDPOINT);
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                AppError::EmbeddingService(format!(
                    "Ollama not reachable at {} ({}). Ensure it is running and run: ollama pull {}",
                    self.base_url, e, self.model
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let detail = serde_json::from_str::<ErrorResponse>(&error_text)
                .map(|e| e.error)
                .unwrap_or(error_text);

            return Err(AppError::EmbeddingService(format!(
                "Ollama API error ({}): {}",
                status, detail
            )));
        }

        let body: EmbeddingResponse = response.json().await.map_err(|e| {
            AppError::EmbeddingService(format!("Failed to parse Ollama response: {}", e))
        })?;

        if body.embedding.is_empty() {
            return Err(AppError::EmbeddingService(format!(
                "Ollama model '{}' returned an empty embedding",
                self.model
            )));
        }

        Ok(body.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> Option<usize> {
        None
    }

    #[instrument(skip(self, texts), fields(batch_size = texts.len(), provider = "ollama", model = %self.model))]
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        // No batch endpoint; embed sequentially.
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_with_retries(text).await?);
        }

        debug!("Embedded {} texts", embeddings.len());
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_metadata() {
        let provider = OllamaProvider::new("nomic-embed-text")
            .unwrap()
            .with_base_url("http://gpu-box:11434/");

        assert_eq!(provider.provider_name(), "ollama");
        assert_eq!(provider.model_name(), "nomic-embed-text");
        assert_eq!(provider.dimensions(), None);
        assert_eq!(provider.base_url, "http://gpu-box:11434");
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let provider = OllamaProvider::new("nomic-embed-text").unwrap();
        assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_embedding_error() {
        let provider = OllamaProvider::new("nomic-embed-text")
            .unwrap()
            .with_base_url("http://127.0.0.1:9");

        let err = provider.embed("hello").await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingService(_)));
        assert!(err.to_string().contains("ollama pull nomic-embed-text"));
    }
}

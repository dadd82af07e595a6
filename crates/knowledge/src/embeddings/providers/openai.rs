//! OpenAI embedding provider using the `/v1/embeddings` API.

use crate::embeddings::config::DEFAULT_OPENAI_EMBEDDING_MODEL;
use crate::embeddings::EmbeddingProvider;
use async_trait::async_trait;
use inkchat_core::{AppError, AppResult};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Default OpenAI API base URL.
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Maximum attempts for rate-limited or failing requests
const MAX_RETRIES: u32 = 3;

/// Initial backoff duration in milliseconds
const INITIAL_BACKOFF_MS: u64 = 200;

/// An [`EmbeddingProvider`] backed by the OpenAI embeddings API.
#[derive(Debug)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Whether a failed request is worth another attempt.
fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

impl OpenAiProvider {
    /// Create a new provider with the given API key and the default model.
    pub fn new(api_key: impl Into<String>) -> AppResult<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(AppError::MissingCredential(
                "OpenAI API key must not be empty".to_string(),
            ));
        }
        if !api_key.starts_with("sk-") {
            warn!("OpenAI API key does not start with 'sk-'; requests may be rejected");
        }

        Ok(Self {
            client: Client::new(),
            base_url: DEFAULT_OPENAI_URL.to_string(),
            api_key,
            model: DEFAULT_OPENAI_EMBEDDING_MODEL.to_string(),
        })
    }

    /// Set the model name (e.g. `text-embedding-3-large`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the provider at an OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// One request; the flag tells whether a retry makes sense.
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, (AppError, bool)> {
        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                (
                    AppError::EmbeddingService(format!("OpenAI request failed: {}", e)),
                    e.is_timeout() || e.is_connect(),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            if status == StatusCode::UNAUTHORIZED {
                return Err((
                    AppError::MissingCredential(format!("OpenAI rejected the API key: {}", detail)),
                    false,
                ));
            }
            return Err((
                AppError::EmbeddingService(format!("OpenAI API returned {}: {}", status, detail)),
                is_transient(status),
            ));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            (
                AppError::EmbeddingService(format!("Failed to parse OpenAI response: {}", e)),
                false,
            )
        })?;

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> Option<usize> {
        match self.model.as_str() {
            "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
            "text-embedding-3-large" => Some(3072),
            _ => None,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(batch_size = texts.len(), model = %self.model, "Embedding batch with OpenAI");

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.request(texts).await {
                Ok(vectors) => {
                    if vectors.len() != texts.len() {
                        return Err(AppError::EmbeddingService(format!(
                            "OpenAI returned {} embeddings for {} texts",
                            vectors.len(),
                            texts.len()
                        )));
                    }
                    return Ok(vectors);
                }
                Err((e, retry)) if retry && attempt < MAX_RETRIES => {
                    let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                    warn!(
                        "Embedding failed (attempt {}/{}), retrying in {}ms: {}",
                        attempt, MAX_RETRIES, backoff_ms, e
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
                Err((e, _)) => return Err(e),
            }
        }
    }
}

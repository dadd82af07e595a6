//! Embedding provider trait and factory.

use crate::embeddings::config::EmbeddingConfig;
use crate::embeddings::providers::{OllamaProvider, OpenAiProvider, TrigramProvider};
use inkchat_core::{AppError, AppResult};
use std::sync::Arc;

/// Trait for embedding providers.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Get provider name (e.g., "openai", "ollama", "trigram")
    fn provider_name(&self) -> &str;

    /// Get model identifier
    fn model_name(&self) -> &str;

    /// Expected embedding dimensions, if known before the first call.
    fn dimensions(&self) -> Option<usize>;

    /// Generate embeddings for multiple texts in a batch.
    ///
    /// Returns exactly one vector per input text, in input order.
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    /// Generate embedding for a single text (convenience method).
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| AppError::EmbeddingService("No embedding returned".to_string()))
    }
}

/// Create an embedding provider based on configuration.
///
/// Hosted providers without an API key fail with `MissingCredential`.
pub fn create_provider(config: &EmbeddingConfig) -> AppResult<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "trigram" => {
            let dimensions = config
                .dimensions
                .unwrap_or(super::config::DEFAULT_TRIGRAM_DIMENSIONS);
            Ok(Arc::new(TrigramProvider::new(dimensions)))
        }

        "openai" => {
            let api_key = config
                .api_key
                .as_deref()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    AppError::MissingCredential(
                        "OpenAI embeddings require an API key (set OPENAI_API_KEY or --api-key)"
                            .to_string(),
                    )
                })?;
            let mut provider = OpenAiProvider::new(api_key)?.with_model(&config.model);
            if let Some(endpoint) = &config.endpoint {
                provider = provider.with_base_url(endpoint);
            }
            Ok(Arc::new(provider))
        }

        "ollama" => {
            let mut provider = OllamaProvider::new(&config.model)?;
            if let Some(endpoint) = &config.endpoint {
                provider = provider.with_base_url(endpoint);
            }
            Ok(Arc::new(provider))
        }

        _ => Err(AppError::Config(format!(
            "Unknown embedding provider: '{}'. Supported providers: openai, ollama, trigram",
            config.provider
        ))),
    }
}

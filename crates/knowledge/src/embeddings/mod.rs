//! Embedding generation for document chunks and queries.
//!
//! Providers live in [`providers`]; [`embed_in_batches`] drives a provider
//! over a whole upload.

pub mod config;
pub mod provider;
pub mod providers;

pub use config::EmbeddingConfig;
pub use provider::{create_provider, EmbeddingProvider};

use crate::progress::ProgressReporter;
use inkchat_core::{AppError, AppResult};

/// Embed `texts` in batches of at most `batch_size`.
///
/// The first failing batch aborts the whole run. A provider that returns the
/// wrong number of vectors, or vectors whose length differs from the first
/// one, fails with `EmbeddingService`.
pub async fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
    progress: &ProgressReporter,
) -> AppResult<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let total = texts.len() as u64;
    let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
    let mut dimensions = provider.dimensions();

    tracing::info!(
        "Embedding {} chunks with provider '{}' (model: {}, batch size {})",
        texts.len(),
        provider.provider_name(),
        provider.model_name(),
        batch_size
    );

    for batch in texts.chunks(batch_size) {
        let vectors = provider.embed_batch(batch).await?;
        if vectors.len() != batch.len() {
            return Err(AppError::EmbeddingService(format!(
                "Provider '{}' returned {} embeddings for a batch of {}",
                provider.provider_name(),
                vectors.len(),
                batch.len()
            )));
        }

        for vector in vectors {
            let expected = *dimensions.get_or_insert(vector.len());
            if vector.len() != expected {
                return Err(AppError::EmbeddingService(format!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    expected,
                    vector.len()
                )));
            }
            embeddings.push(vector);
        }

        progress.embed(embeddings.len() as u64, total, provider.model_name());
    }

    tracing::debug!(
        "Generated {} embeddings of dimension {:?}",
        embeddings.len(),
        dimensions
    );

    Ok(embeddings)
}

//! Query-time retrieval: embed the question, search the index.

use crate::embeddings::EmbeddingProvider;
use crate::types::ScoredChunk;
use crate::vector_index::VectorIndex;
use inkchat_core::{AppError, AppResult};
use std::sync::Arc;

/// Default number of chunks retrieved per question.
pub const DEFAULT_TOP_K: usize = 4;

/// Embeds queries with the same provider that built the index.
#[derive(Debug, Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    top_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, top_k: usize) -> Self {
        Self {
            embedder,
            top_k: top_k.max(1),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Most similar chunks first.
    ///
    /// A missing or empty index and any embedding failure are `Retrieval`
    /// errors.
    pub async fn retrieve(
        &self,
        index: Option<&dyn VectorIndex>,
        query: &str,
    ) -> AppResult<Vec<ScoredChunk>> {
        let index = index.ok_or_else(|| {
            AppError::Retrieval("No documents have been uploaded yet".to_string())
        })?;
        if index.is_empty() {
            return Err(AppError::Retrieval(
                "The document index is empty".to_string(),
            ));
        }

        let query_embedding = self.embedder.embed(query).await.map_err(|e| {
            AppError::Retrieval(format!("Failed to embed the question: {}", e))
        })?;

        let results = index.search(&query_embedding, self.top_k)?;

        if let (Some(first), Some(last)) = (results.first(), results.last()) {
            tracing::info!(
                "Retrieved {} chunks (top score: {:.3}, lowest: {:.3})",
                results.len(),
                first.score,
                last.score
            );
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;
    use crate::embeddings::providers::TrigramProvider;
    use crate::vector_index::InMemoryIndex;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn provider_name(&self) -> &str {
            "failing"
        }

        fn model_name(&self) -> &str {
            "none"
        }

        fn dimensions(&self) -> Option<usize> {
            None
        }

        async fn embed_batch(&self, _texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            Err(AppError::EmbeddingService("service unavailable".to_string()))
        }
    }

    async fn build_index(provider: &TrigramProvider, texts: &[&str]) -> InMemoryIndex {
        let mut index = InMemoryIndex::new();
        for (position, text) in texts.iter().enumerate() {
            let chunk = Chunk {
                document: "notes.txt".to_string(),
                position,
                text: text.to_string(),
                char_range: 0..text.chars().count(),
                location: None,
            };
            let embedding = provider.embed(text).await.unwrap();
            index.insert(chunk, embedding).unwrap();
        }
        index
    }

    #[tokio::test]
    async fn test_no_index_is_retrieval_error() {
        let retriever = Retriever::new(Arc::new(TrigramProvider::new(64)), 4);
        let err = retriever
            .retrieve(None, "What is the title?")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_empty_index_is_retrieval_error() {
        let retriever = Retriever::new(Arc::new(TrigramProvider::new(64)), 4);
        let index = InMemoryIndex::new();
        let err = retriever.retrieve(Some(&index), "anything").await.unwrap_err();
        assert!(matches!(err, AppError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_embedding_failure_is_retrieval_error() {
        let provider = TrigramProvider::new(64);
        let index = build_index(&provider, &["some text"]).await;

        let retriever = Retriever::new(Arc::new(FailingProvider), 4);
        let err = retriever.retrieve(Some(&index), "query").await.unwrap_err();
        assert!(matches!(err, AppError::Retrieval(_)));
        assert!(err.to_string().contains("service unavailable"));
    }

    #[tokio::test]
    async fn test_retrieve_ranks_relevant_chunk_first() {
        let provider = TrigramProvider::new(384);
        let index = build_index(
            &provider,
            &[
                "Bananas ripen quickly in warm kitchens.",
                "The lighthouse keeper logged every passing steamship.",
                "Copper kettles need polishing twice a year.",
            ],
        )
        .await;

        let retriever = Retriever::new(Arc::new(provider), 2);
        let results = retriever
            .retrieve(Some(&index), "Which steamship passed the lighthouse?")
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.position, 1);
    }
}

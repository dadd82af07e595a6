//! Vector index abstraction and the exact in-memory implementation.
//!
//! An index is filled once during an upload and then frozen behind an `Arc`;
//! searching only needs `&self`, so a frozen index can be shared by any number
//! of concurrent questions.

use crate::chunker::Chunk;
use crate::types::ScoredChunk;
use inkchat_core::{AppError, AppResult};

/// Trait for vector index backends.
pub trait VectorIndex: Send + Sync + std::fmt::Debug {
    /// Add a chunk with its embedding.
    ///
    /// The first insert fixes the dimensionality; later vectors of a
    /// different length are rejected with `EmbeddingService`.
    fn insert(&mut self, chunk: Chunk, embedding: Vec<f32>) -> AppResult<()>;

    /// Top-k chunks by cosine similarity, most similar first.
    ///
    /// Equal scores keep insertion order.
    fn search(&self, query: &[f32], top_k: usize) -> AppResult<Vec<ScoredChunk>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector size, once known.
    fn dimensions(&self) -> Option<usize>;
}

#[derive(Debug)]
struct IndexEntry {
    embedding: Vec<f32>,
    chunk: Chunk,
}

/// Exact nearest-neighbour index over a `Vec`, scanned on every query.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    entries: Vec<IndexEntry>,
    dimensions: Option<usize>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            dimensions: None,
        }
    }
}

/// Cosine similarity between two vectors of equal length.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorIndex for InMemoryIndex {
    fn insert(&mut self, chunk: Chunk, embedding: Vec<f32>) -> AppResult<()> {
        if embedding.is_empty() {
            return Err(AppError::EmbeddingService(format!(
                "Empty embedding for chunk {} of {}",
                chunk.position, chunk.document
            )));
        }

        match self.dimensions {
            Some(dims) if dims != embedding.len() => {
                return Err(AppError::EmbeddingService(format!(
                    "Embedding dimension mismatch: index has {}, got {} for chunk {} of {}",
                    dims,
                    embedding.len(),
                    chunk.position,
                    chunk.document
                )));
            }
            Some(_) => {}
            None => self.dimensions = Some(embedding.len()),
        }

        self.entries.push(IndexEntry { embedding, chunk });
        Ok(())
    }

    fn search(&self, query: &[f32], top_k: usize) -> AppResult<Vec<ScoredChunk>> {
        if let Some(dims) = self.dimensions {
            if dims != query.len() {
                return Err(AppError::Retrieval(format!(
                    "Query embedding has {} dimensions, index has {}",
                    query.len(),
                    dims
                )));
            }
        }

        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(&entry.embedding, query),
            })
            .collect();

        // Stable sort: ties stay in insertion order.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(position: usize) -> Chunk {
        Chunk {
            document: "doc.txt".to_string(),
            position,
            text: format!("chunk {}", position),
            char_range: 0..7,
            location: None,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let mut index = InMemoryIndex::new();
        index.insert(chunk(0), vec![0.0, 1.0]).unwrap();
        index.insert(chunk(1), vec![1.0, 0.0]).unwrap();
        index.insert(chunk(2), vec![0.7, 0.7]).unwrap();

        let results = index.search(&[1.0, 0.1], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.position, 1);
        assert_eq!(results[1].chunk.position, 2);
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut index = InMemoryIndex::new();
        for i in 0..5 {
            index.insert(chunk(i), vec![1.0, 1.0]).unwrap();
        }

        let positions: Vec<usize> = index
            .search(&[1.0, 1.0], 5)
            .unwrap()
            .into_iter()
            .map(|s| s.chunk.position)
            .collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_search_is_deterministic() {
        let mut index = InMemoryIndex::new();
        index.insert(chunk(0), vec![0.2, 0.9, 0.1]).unwrap();
        index.insert(chunk(1), vec![0.8, 0.1, 0.3]).unwrap();
        index.insert(chunk(2), vec![0.5, 0.5, 0.5]).unwrap();

        let first = index.search(&[0.4, 0.6, 0.2], 3).unwrap();
        let second = index.search(&[0.4, 0.6, 0.2], 3).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_insert_dimension_mismatch() {
        let mut index = InMemoryIndex::new();
        index.insert(chunk(0), vec![1.0, 0.0]).unwrap();

        let err = index.insert(chunk(1), vec![1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, AppError::EmbeddingService(_)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let mut index = InMemoryIndex::new();
        index.insert(chunk(0), vec![1.0, 0.0]).unwrap();

        let err = index.search(&[1.0], 1).unwrap_err();
        assert!(matches!(err, AppError::Retrieval(_)));
    }

    #[test]
    fn test_empty_index() {
        let index = InMemoryIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.dimensions(), None);
        assert!(index.search(&[1.0], 3).unwrap().is_empty());
    }
}

//! Document question answering for InkChat.
//!
//! Documents are loaded, chunked and embedded into an in-memory vector
//! index owned by a [`Session`]; questions are answered by retrieving the
//! closest chunks and asking the chat model with them as context.

pub mod chunker;
pub mod embeddings;
pub mod loader;
pub mod memory;
pub mod progress;
pub mod qa;
pub mod retriever;
pub mod session;
pub mod types;
pub mod vector_index;

#[cfg(test)]
mod tests;

pub use chunker::{chunk_segments, Chunk, ChunkLocation, ChunkerConfig};
pub use embeddings::{create_provider, EmbeddingConfig, EmbeddingProvider};
pub use loader::{read_document, Document, DocumentFormat, Segment, SegmentLocation};
pub use memory::{ConversationMemory, ConversationTurn};
pub use progress::{ProgressCallback, ProgressEvent, ProgressPhase, ProgressReporter};
pub use qa::{AnswerEvent, AnswerStream, QaPipeline, QaSettings, QaState};
pub use retriever::Retriever;
pub use session::{Session, SessionSettings};
pub use types::{Answer, DocumentSummary, ScoredChunk, SourceRef, UploadSummary};
pub use vector_index::{InMemoryIndex, VectorIndex};

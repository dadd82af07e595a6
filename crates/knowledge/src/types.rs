//! Result types shared by retrieval, answering and upload.

use crate::chunker::Chunk;
use crate::loader::DocumentFormat;
use inkchat_llm::LlmUsage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Maximum snippet length for source references, in characters.
pub const MAX_SNIPPET_LENGTH: usize = 150;

/// A chunk returned from the index with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity in [-1.0, 1.0]
    pub score: f32,
}

/// Where part of an answer came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Document file name
    pub document: String,

    /// Human-readable location, e.g. "p. 3" or "paragraphs 2-5"
    pub location: String,

    /// Short excerpt of the chunk (truncated at a word boundary)
    pub snippet: String,
}

impl SourceRef {
    /// Build deduplicated references, in retrieval order.
    pub fn from_chunks(chunks: &[ScoredChunk]) -> Vec<SourceRef> {
        let mut seen = HashSet::new();
        let mut sources = Vec::new();

        for scored in chunks {
            let chunk = &scored.chunk;
            let location = chunk
                .location
                .map(|l| l.describe())
                .unwrap_or_else(|| format!("chunk {}", chunk.position + 1));

            if seen.insert((chunk.document.clone(), location.clone())) {
                sources.push(SourceRef {
                    document: chunk.document.clone(),
                    location,
                    snippet: truncate_snippet(&chunk.text, MAX_SNIPPET_LENGTH),
                });
            }
        }

        sources
    }
}

/// Shorten text to at most `max_chars` characters, breaking at whitespace.
pub fn truncate_snippet(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text.to_string();
    };

    let truncated = &text[..cut];
    match truncated.rfind(char::is_whitespace) {
        Some(space) if space > 0 => format!("{}...", truncated[..space].trim_end()),
        _ => format!("{}...", truncated),
    }
}

/// A completed answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    /// Full generated text
    pub text: String,

    /// Documents the retrieved context came from
    pub sources: Vec<SourceRef>,

    /// The rephrased question used for retrieval, when condensing ran
    pub standalone_question: Option<String>,

    /// Token usage reported by the chat model, if any
    pub usage: Option<LlmUsage>,
}

/// Per-document outcome of an upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub name: String,
    pub format: DocumentFormat,
    /// Pages (PDF) or paragraphs (DOCX, TXT) with text
    pub segments: usize,
    pub chunks: usize,
    /// Characters of extracted text
    pub chars: usize,
}

/// Outcome of building a new index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadSummary {
    pub documents: Vec<DocumentSummary>,
    pub total_chunks: usize,
    pub dimensions: usize,
}

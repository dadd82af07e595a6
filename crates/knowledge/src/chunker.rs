//! Text chunking with configurable size and overlap.
//!
//! A document's segments are joined with `\n` and cut into char windows
//! `[start, min(start + size, n))`; each window after the first starts
//! `overlap` chars before the previous one ended. Text is never trimmed, so
//! every char lands in at least one chunk.

use crate::loader::{joined_text, Segment, SegmentLocation};
use inkchat_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Chunk size and overlap, in chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkerConfig {
    /// Create a validated chunker configuration.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> AppResult<Self> {
        if chunk_size == 0 {
            return Err(AppError::Config("chunk size must be greater than 0".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(AppError::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Span of pages or paragraphs a chunk was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ChunkLocation {
    Pages { first: u32, last: u32 },
    Paragraphs { first: u32, last: u32 },
}

impl ChunkLocation {
    /// Short human-readable form, e.g. "p. 3" or "paragraphs 2-4".
    pub fn describe(&self) -> String {
        match *self {
            Self::Pages { first, last } if first == last => format!("p. {}", first),
            Self::Pages { first, last } => format!("pp. {}-{}", first, last),
            Self::Paragraphs { first, last } if first == last => format!("paragraph {}", first),
            Self::Paragraphs { first, last } => format!("paragraphs {}-{}", first, last),
        }
    }
}

/// A bounded window of one document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Name of the document the chunk belongs to
    pub document: String,

    /// 0-based position among the document's chunks
    pub position: usize,

    /// Chunk text
    pub text: String,

    /// Char range in the document's joined text
    pub char_range: Range<usize>,

    /// Pages or paragraphs the chunk overlaps
    pub location: Option<ChunkLocation>,
}

/// Split one document's segments into overlapping chunks.
pub fn chunk_segments(document: &str, segments: &[Segment], config: ChunkerConfig) -> Vec<Chunk> {
    let text = joined_text(segments);
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();

    let mut chunks = Vec::new();
    if n == 0 {
        return chunks;
    }

    let mut start = 0;
    loop {
        let end = (start + config.chunk_size).min(n);
        chunks.push(Chunk {
            document: document.to_string(),
            position: chunks.len(),
            text: chars[start..end].iter().collect(),
            char_range: start..end,
            location: locate(segments, start..end),
        });

        if end == n {
            break;
        }
        start = end - config.chunk_overlap;
    }

    tracing::debug!(
        "Chunked {} ({} chars) into {} chunks",
        document,
        n,
        chunks.len()
    );

    chunks
}

/// Find the first and last segment overlapping `range`.
fn locate(segments: &[Segment], range: Range<usize>) -> Option<ChunkLocation> {
    let mut hits = segments.iter().filter(|s| {
        let seg_end = s.offset + s.text.chars().count();
        s.offset < range.end && range.start < seg_end
    });

    let first = hits.next()?.location;
    let last = hits.last().map(|s| s.location).unwrap_or(first);

    match (first, last) {
        (SegmentLocation::Page(a), SegmentLocation::Page(b)) => {
            Some(ChunkLocation::Pages { first: a, last: b })
        }
        (SegmentLocation::Paragraph(a), SegmentLocation::Paragraph(b)) => {
            Some(ChunkLocation::Paragraphs { first: a, last: b })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(text: &str, index: u32, offset: usize) -> Segment {
        Segment {
            text: text.to_string(),
            location: SegmentLocation::Paragraph(index),
            offset,
        }
    }

    fn single(text: &str) -> Vec<Segment> {
        vec![paragraph(text, 1, 0)]
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkerConfig::new(1000, 200).is_ok());
        assert!(matches!(ChunkerConfig::new(0, 0), Err(AppError::Config(_))));
        assert!(matches!(ChunkerConfig::new(100, 100), Err(AppError::Config(_))));
        assert!(matches!(ChunkerConfig::new(100, 150), Err(AppError::Config(_))));
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunk_segments("empty.txt", &[], ChunkerConfig::default()).is_empty());
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = chunk_segments("a.txt", &single("  padded  "), ChunkerConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "  padded  ");
        assert_eq!(chunks[0].char_range, 0..10);
    }

    #[test]
    fn test_three_thousand_chars() {
        let text: String = (0..3000)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect();
        let chunks = chunk_segments("long.txt", &single(&text), ChunkerConfig::new(1000, 200).unwrap());

        // windows start at 0, 800, 1600, 2400
        assert_eq!(chunks.len(), 4);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 1000);
        }
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let next: Vec<char> = pair[1].text.chars().collect();
            assert_eq!(&prev[prev.len() - 200..], &next[..200]);
        }
        assert_eq!(chunks.last().unwrap().char_range, 2400..3000);
    }

    #[test]
    fn test_coverage_and_overlap() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(37);
        let config = ChunkerConfig::new(97, 13).unwrap();
        let chunks = chunk_segments("fox.txt", &single(&text), config);
        let n = text.chars().count();

        // Every char is covered, windows are contiguous with the overlap.
        assert_eq!(chunks[0].char_range.start, 0);
        assert_eq!(chunks.last().unwrap().char_range.end, n);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].char_range.start, pair[0].char_range.end - 13);
        }

        // Reassembling the non-overlapping parts gives back the text.
        let mut rebuilt: String = chunks[0].text.clone();
        for chunk in &chunks[1..] {
            rebuilt.extend(chunk.text.chars().skip(13));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_multibyte_chars_are_counted_as_chars() {
        let text = "é".repeat(25);
        let chunks = chunk_segments("accents.txt", &single(&text), ChunkerConfig::new(10, 2).unwrap());
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 10));
        assert_eq!(chunks.last().unwrap().char_range.end, 25);
    }

    #[test]
    fn test_deterministic() {
        let text = "lorem ipsum dolor sit amet ".repeat(100);
        let config = ChunkerConfig::new(120, 30).unwrap();
        assert_eq!(
            chunk_segments("x.txt", &single(&text), config),
            chunk_segments("x.txt", &single(&text), config)
        );
    }

    #[test]
    fn test_locations_follow_segments() {
        let segments = vec![
            Segment {
                text: "a".repeat(10),
                location: SegmentLocation::Page(1),
                offset: 0,
            },
            Segment {
                text: "b".repeat(10),
                location: SegmentLocation::Page(2),
                offset: 11,
            },
            Segment {
                text: "c".repeat(10),
                location: SegmentLocation::Page(4),
                offset: 22,
            },
        ];

        let chunks = chunk_segments("doc.pdf", &segments, ChunkerConfig::new(15, 5).unwrap());
        assert_eq!(chunks[0].location, Some(ChunkLocation::Pages { first: 1, last: 2 }));
        assert_eq!(chunks.last().unwrap().location, Some(ChunkLocation::Pages { first: 2, last: 4 }));
        assert!(chunks.iter().all(|c| c.document == "doc.pdf"));
        assert_eq!(ChunkLocation::Pages { first: 2, last: 4 }.describe(), "pp. 2-4");
        assert_eq!(ChunkLocation::Paragraphs { first: 3, last: 3 }.describe(), "paragraph 3");
    }
}

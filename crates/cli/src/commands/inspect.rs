//! Inspect command handler.
//!
//! Shows what a document turns into before anything is embedded: extracted
//! segments and the chunks cut from them.

use clap::Args;
use inkchat_core::{config::AppConfig, AppError, AppResult};
use inkchat_knowledge::loader::{expand_paths, extract_segments, joined_text};
use inkchat_knowledge::{chunk_segments, read_document, Chunk, ChunkerConfig};
use std::path::PathBuf;

/// Load and chunk a document without embedding it
#[derive(Args, Debug)]
pub struct InspectCommand {
    /// Documents or directories to inspect
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Override the chunk size (characters)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Override the chunk overlap (characters)
    #[arg(long)]
    pub chunk_overlap: Option<usize>,

    /// Print every chunk
    #[arg(long)]
    pub show_chunks: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl InspectCommand {
    pub fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing inspect command");

        let chunker = ChunkerConfig::new(
            self.chunk_size.unwrap_or(config.rag.chunk_size),
            self.chunk_overlap.unwrap_or(config.rag.chunk_overlap),
        )?;

        let mut reports = Vec::new();
        for path in expand_paths(&self.paths)? {
            let document = read_document(&path, config.rag.max_upload_bytes)?;
            let segments = extract_segments(&document)?;
            let chunks = chunk_segments(&document.name, &segments, chunker);

            if self.json {
                reports.push(serde_json::json!({
                    "name": document.name,
                    "format": document.format,
                    "bytes": document.bytes.len(),
                    "segments": segments.len(),
                    "chars": joined_text(&segments).chars().count(),
                    "chunks": if self.show_chunks {
                        serde_json::to_value(&chunks)
                            .map_err(|e| AppError::Serialization(e.to_string()))?
                    } else {
                        serde_json::json!(chunks.len())
                    },
                }));
                continue;
            }

            println!("{} ({})", document.name, document.format.as_str());
            println!("  Bytes: {}", document.bytes.len());
            println!("  Segments: {}", segments.len());
            println!("  Characters: {}", joined_text(&segments).chars().count());
            println!(
                "  Chunks: {} (size {}, overlap {})",
                chunks.len(),
                chunker.chunk_size,
                chunker.chunk_overlap
            );

            if self.show_chunks {
                for chunk in &chunks {
                    println!("{}", describe_chunk(chunk));
                }
            }
        }

        if self.json {
            let json = serde_json::to_string_pretty(&reports)
                .map_err(|e| AppError::Serialization(e.to_string()))?;
            println!("{}", json);
        }

        Ok(())
    }
}

fn describe_chunk(chunk: &Chunk) -> String {
    let location = chunk
        .location
        .map(|l| l.describe())
        .unwrap_or_else(|| "-".to_string());
    let preview: String = chunk.text.chars().take(60).collect();
    format!(
        "  #{} [{}..{}] {}: {}",
        chunk.position,
        chunk.char_range.start,
        chunk.char_range.end,
        location,
        preview.replace('\n', " ")
    )
}

//! Command handlers for the InkChat CLI.
//!
//! Answers go to stdout; progress, notices and logs go to stderr.

pub mod ask;
pub mod chat;
pub mod inspect;

pub use ask::AskCommand;
pub use chat::ChatCommand;
pub use inspect::InspectCommand;

use futures::StreamExt;
use inkchat_core::{AppResult, HistoryPolicy};
use inkchat_knowledge::{Answer, AnswerEvent, AnswerStream, ProgressReporter, UploadSummary};
use std::io::Write;
use std::sync::Arc;

/// Progress lines on stderr.
pub fn stderr_progress() -> ProgressReporter {
    ProgressReporter::new(Arc::new(|event| {
        eprintln!("{}", event.format_simple());
    }))
}

/// The history policy for an upload: the flag wins over config.
pub fn history_policy(keep_history: bool, configured: HistoryPolicy) -> HistoryPolicy {
    if keep_history {
        HistoryPolicy::Keep
    } else {
        configured
    }
}

/// Confirmation lines for a finished upload.
pub fn upload_report(summary: &UploadSummary) -> Vec<String> {
    let mut lines: Vec<String> = summary
        .documents
        .iter()
        .map(|doc| {
            format!(
                "File: `{}` processed successfully! ({} chunks from {} {})",
                doc.name,
                doc.chunks,
                doc.segments,
                segment_noun(doc.format.as_str(), doc.segments)
            )
        })
        .collect();
    lines.push(format!(
        "Indexed {} chunks ({} dimensions).",
        summary.total_chunks, summary.dimensions
    ));
    lines
}

fn segment_noun(format: &str, count: usize) -> &'static str {
    match (format, count) {
        ("pdf", 1) => "page",
        ("pdf", _) => "pages",
        (_, 1) => "paragraph",
        _ => "paragraphs",
    }
}

/// Source lines printed under an answer.
pub fn format_sources(answer: &Answer) -> Vec<String> {
    answer
        .sources
        .iter()
        .map(|source| format!("- {} ({})", source.document, source.location))
        .collect()
}

/// Print increments to stdout as they arrive and return the final answer.
pub async fn print_stream(mut stream: AnswerStream, echo: bool) -> AppResult<Answer> {
    let mut stdout = std::io::stdout();

    while let Some(event) = stream.next().await {
        match event {
            AnswerEvent::Token(text) => {
                if echo {
                    print!("{}", text);
                    stdout.flush().ok();
                }
            }
            AnswerEvent::Done(answer) => {
                if echo {
                    println!();
                }
                return Ok(answer);
            }
            AnswerEvent::Failed(err) => {
                if echo {
                    println!();
                }
                return Err(err);
            }
        }
    }

    Err(inkchat_core::AppError::Cancelled(
        "The answer stream closed early".to_string(),
    ))
}

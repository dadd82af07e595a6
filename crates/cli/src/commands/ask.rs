//! Ask command handler.
//!
//! Loads the given documents into a fresh session, answers one question and
//! exits.

use super::{format_sources, print_stream, stderr_progress, upload_report};
use clap::Args;
use inkchat_core::{config::AppConfig, AppError, AppResult, HistoryPolicy};
use inkchat_knowledge::{ProgressReporter, Session};
use std::path::PathBuf;

/// Answer a single question about the given documents
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub question: String,

    /// Document or directory to load (repeatable)
    #[arg(short, long = "file", required = true)]
    pub files: Vec<PathBuf>,

    /// Number of chunks to retrieve
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Disable token streaming
    #[arg(long)]
    pub no_stream: bool,

    /// Do not print upload progress
    #[arg(short, long)]
    pub quiet: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, mut config: AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command");
        tracing::debug!("Ask command options: {:?}", self);

        if self.no_stream {
            config.rag.streaming = false;
        }
        if let Some(top_k) = self.top_k {
            config.rag.top_k = top_k;
        }

        let session = Session::from_config(&config)?;
        let progress = if self.quiet || self.json {
            ProgressReporter::noop()
        } else {
            stderr_progress()
        };

        let summary = session
            .upload(&self.files, HistoryPolicy::Clear, &progress)
            .await?;
        if !self.json && !self.quiet {
            for line in upload_report(&summary) {
                eprintln!("{}", line);
            }
        }

        let stream = session.ask_streaming(&self.question).await?;
        let answer = print_stream(stream, !self.json).await;
        session.close().await;
        let answer = answer?;

        if self.json {
            let output = serde_json::json!({
                "question": self.question,
                "answer": answer.text,
                "standaloneQuestion": answer.standalone_question,
                "sources": answer.sources,
                "documents": summary.documents,
                "provider": config.provider,
                "model": config.model,
                "usage": answer.usage.as_ref().map(|u| serde_json::json!({
                    "promptTokens": u.prompt_tokens,
                    "completionTokens": u.completion_tokens,
                    "totalTokens": u.total_tokens,
                })),
            });

            let json = serde_json::to_string_pretty(&output)
                .map_err(|e| AppError::Serialization(e.to_string()))?;
            println!("{}", json);
        } else {
            let sources = format_sources(&answer);
            if !sources.is_empty() {
                println!();
                println!("Sources:");
                for line in sources {
                    println!("{}", line);
                }
            }

            if let Some(usage) = &answer.usage {
                tracing::debug!(
                    "Token usage - Prompt: {}, Completion: {}, Total: {}",
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    usage.total_tokens
                );
            }
        }

        Ok(())
    }
}

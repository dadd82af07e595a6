//! Chat command handler.
//!
//! Line-oriented conversation over one session. Lines starting with `/` are
//! commands; anything else is a question.

use super::{format_sources, history_policy, print_stream, stderr_progress, upload_report};
use clap::Args;
use inkchat_core::{config::AppConfig, AppError, AppResult};
use inkchat_knowledge::{ProgressReporter, Session};
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

const GREETING: &str =
    "Hello, you can upload a document and chat with me to ask questions related to its content.";

const HELP: &str = "\
Commands:
  /upload <path>...  Load documents (replaces the current ones)
  /history           Show the conversation so far
  /clear             Forget the conversation, keep the documents
  /reset             Forget the documents and the conversation
  /help              Show this help
  /quit, /exit       Leave
Press Ctrl-C while an answer is printing to stop it, or at the prompt to leave.";

/// Interactive chat session over uploaded documents
#[derive(Args, Debug)]
pub struct ChatCommand {
    /// Document or directory to load before the first question (repeatable)
    #[arg(short, long = "file")]
    pub files: Vec<PathBuf>,

    /// Keep the conversation when new documents are uploaded
    #[arg(long)]
    pub keep_history: bool,

    /// Disable token streaming
    #[arg(long)]
    pub no_stream: bool,

    /// Do not print upload progress
    #[arg(short, long)]
    pub quiet: bool,
}

/// One parsed input line.
#[derive(Debug, PartialEq)]
enum Input<'a> {
    Question(&'a str),
    Upload(Vec<PathBuf>),
    History,
    Clear,
    Reset,
    Help,
    Quit,
    Empty,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Question(line);
    };

    let mut parts = command.split_whitespace();
    match parts.next().unwrap_or_default() {
        "upload" => Input::Upload(parts.map(PathBuf::from).collect()),
        "history" => Input::History,
        "clear" => Input::Clear,
        "reset" => Input::Reset,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => Input::Unknown(other),
    }
}

impl ChatCommand {
    pub async fn execute(&self, mut config: AppConfig) -> AppResult<()> {
        tracing::info!("Executing chat command");

        if self.no_stream {
            config.rag.streaming = false;
        }
        let policy = history_policy(self.keep_history, config.rag.history_on_upload);
        let progress = if self.quiet {
            ProgressReporter::noop()
        } else {
            stderr_progress()
        };

        let session = Session::from_config(&config)?;
        tracing::debug!(session = %session.id(), ?policy, "Chat session started");

        println!("{}", GREETING);
        if !self.files.is_empty() {
            self.upload(&session, &self.files, policy, &progress).await;
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush().ok();

            let line = match read_line(&mut lines, tokio::signal::ctrl_c()).await? {
                Prompt::Line(line) => line,
                Prompt::Eof | Prompt::Interrupted => {
                    println!();
                    break;
                }
            };

            match parse_input(&line) {
                Input::Empty => {}
                Input::Quit => break,
                Input::Help => println!("{}", HELP),
                Input::Unknown(name) => {
                    eprintln!("Unknown command `/{}`. Type /help for the list.", name)
                }
                Input::Upload(paths) if paths.is_empty() => {
                    eprintln!("Usage: /upload <path>...")
                }
                Input::Upload(paths) => self.upload(&session, &paths, policy, &progress).await,
                Input::History => print_history(&session),
                Input::Clear => {
                    session.clear_history();
                    println!("Conversation cleared.");
                }
                Input::Reset => {
                    session.reset().await;
                    println!("Session reset. Upload a document to continue.");
                }
                Input::Question(question) => {
                    if let Err(e) = answer(&session, question).await {
                        report_error(&e);
                    }
                }
            }
        }

        session.close().await;
        Ok(())
    }

    async fn upload(
        &self,
        session: &Session,
        paths: &[PathBuf],
        policy: inkchat_core::HistoryPolicy,
        progress: &ProgressReporter,
    ) {
        match session.upload(paths, policy, progress).await {
            Ok(summary) => {
                for line in upload_report(&summary) {
                    println!("{}", line);
                }
            }
            Err(e) => report_error(&e),
        }
    }
}

/// What came back while waiting at the prompt.
#[derive(Debug, PartialEq)]
enum Prompt {
    Line(String),
    Eof,
    Interrupted,
}

/// Wait for the next input line unless `interrupt` fires first.
async fn read_line<R, F>(lines: &mut Lines<R>, interrupt: F) -> AppResult<Prompt>
where
    R: AsyncBufRead + Unpin,
    F: Future,
{
    tokio::select! {
        line = lines.next_line() => Ok(line?.map_or(Prompt::Eof, Prompt::Line)),
        _ = interrupt => Ok(Prompt::Interrupted),
    }
}

/// Ask one question, printing the answer as it arrives. Ctrl-C drops the
/// stream, which cancels the answer.
async fn answer(session: &Session, question: &str) -> AppResult<()> {
    let stream = session.ask_streaming(question).await?;

    let answer = tokio::select! {
        result = print_stream(stream, true) => result?,
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("(answer stopped)");
            return Ok(());
        }
    };

    let sources = format_sources(&answer);
    if !sources.is_empty() {
        println!("Sources:");
        for line in sources {
            println!("{}", line);
        }
    }
    Ok(())
}

fn print_history(session: &Session) {
    let turns = session.history();
    if turns.is_empty() {
        println!("No questions asked yet.");
        return;
    }
    for (i, turn) in turns.iter().enumerate() {
        println!(
            "[{}] {} Q: {}",
            i + 1,
            turn.timestamp.format("%H:%M:%S"),
            turn.question
        );
        println!("    A: {}", turn.answer);
    }
}

fn report_error(error: &AppError) {
    tracing::debug!(kind = error.kind(), "Chat turn failed: {}", error);
    match error {
        AppError::Cancelled(_) => eprintln!("(answer stopped)"),
        other => eprintln!("Error: {}", other),
    }
}

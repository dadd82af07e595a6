//! InkChat CLI
//!
//! Main entry point for the inkchat command-line tool.
//! Load PDF, DOCX or TXT documents and ask questions about them.

mod commands;

use clap::{Parser, Subcommand};
use commands::{AskCommand, ChatCommand, InspectCommand};
use inkchat_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;

/// InkChat - ask questions about your documents
#[derive(Parser, Debug)]
#[command(name = "inkchat")]
#[command(about = "Ask questions about PDF, DOCX and TXT documents", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "INKCHAT_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file (default: <workspace>/.inkchat/config.yaml)
    #[arg(short, long, global = true, env = "INKCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Chat provider (openai, ollama)
    #[arg(short, long, global = true, env = "INKCHAT_PROVIDER")]
    provider: Option<String>,

    /// Chat model identifier
    #[arg(short, long, global = true, env = "INKCHAT_MODEL")]
    model: Option<String>,

    /// Embedding provider (openai, ollama, trigram)
    #[arg(long, global = true, env = "INKCHAT_EMBEDDING_PROVIDER")]
    embedding_provider: Option<String>,

    /// API key for hosted providers
    #[arg(long, global = true, env = "INKCHAT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive chat session over uploaded documents
    Chat(ChatCommand),

    /// Answer a single question about the given documents
    Ask(AskCommand),

    /// Load and chunk a document without embedding it
    Inspect(InspectCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(cli.workspace.clone(), cli.config.clone())?;
    let config = config.with_overrides(
        cli.workspace,
        cli.config,
        cli.provider,
        cli.model,
        cli.embedding_provider,
        cli.api_key,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );

    logging::init_logging(config.log_level.as_deref(), config.no_color)?;

    tracing::info!("InkChat CLI starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!("Provider: {} (model {})", config.provider, config.model);
    tracing::debug!("Embedding provider: {}", config.embedding_provider);

    let command_name = match &cli.command {
        Commands::Chat(_) => "chat",
        Commands::Ask(_) => "ask",
        Commands::Inspect(_) => "inspect",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Chat(cmd) => cmd.execute(config).await,
        Commands::Ask(cmd) => cmd.execute(config).await,
        Commands::Inspect(cmd) => cmd.execute(&config),
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}

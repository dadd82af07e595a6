//! Configuration management for InkChat.
//!
//! This module handles loading and merging configuration from multiple sources:
//! - Built-in defaults
//! - Config file (.inkchat/config.yaml)
//! - Environment variables
//! - Command-line flags
//!
//! Later sources override earlier ones.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Chat providers that can answer questions.
pub const CHAT_PROVIDERS: [&str; 2] = ["openai", "ollama"];

/// Providers that can produce embeddings.
pub const EMBEDDING_PROVIDERS: [&str; 3] = ["openai", "ollama", "trigram"];

/// Environment variable consulted for OpenAI keys when no other source is set.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .inkchat/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Chat provider ("openai", "ollama")
    pub provider: String,

    /// Chat model identifier
    pub model: String,

    /// Embedding provider ("openai", "ollama", "trigram")
    pub embedding_provider: String,

    /// Embedding model identifier
    pub embedding_model: String,

    /// API key supplied directly (flag or INKCHAT_API_KEY)
    pub api_key: Option<String>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Provider configurations from config.yaml
    pub llm: Option<LlmConfig>,

    /// Retrieval and answering settings
    pub rag: RagConfig,
}

/// LLM configuration from config.yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(rename = "activeProvider")]
    pub active_provider: String,

    #[serde(rename = "activeEmbeddingProvider")]
    pub active_embedding_provider: String,

    pub providers: HashMap<String, ProviderConfig>,
}

/// Provider-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderConfig {
    OpenAI {
        #[serde(rename = "apiKeyEnv")]
        api_key_env: String,
        model: String,
        #[serde(rename = "embeddingModel")]
        embedding_model: Option<String>,
        endpoint: Option<String>,
    },
    Ollama {
        endpoint: String,
        model: String,
        #[serde(rename = "embeddingModel")]
        embedding_model: Option<String>,
        timeout: Option<u64>,
    },
    Trigram {
        dimensions: usize,
    },
}

impl ProviderConfig {
    /// Which backend this block configures.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OpenAI { .. } => "openai",
            Self::Ollama { .. } => "ollama",
            Self::Trigram { .. } => "trigram",
        }
    }

    /// Chat model configured for this provider, if it has one.
    pub fn model(&self) -> Option<&str> {
        match self {
            Self::OpenAI { model, .. } | Self::Ollama { model, .. } => Some(model),
            Self::Trigram { .. } => None,
        }
    }

    /// Embedding model configured for this provider, if any.
    pub fn embedding_model(&self) -> Option<&str> {
        match self {
            Self::OpenAI {
                embedding_model, ..
            }
            | Self::Ollama {
                embedding_model, ..
            } => embedding_model.as_deref(),
            Self::Trigram { .. } => Some("trigram-v1"),
        }
    }

    /// Custom endpoint, if any.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::OpenAI { endpoint, .. } => endpoint.as_deref(),
            Self::Ollama { endpoint, .. } => Some(endpoint),
            Self::Trigram { .. } => None,
        }
    }
}

/// What happens to the conversation history when a new document set is
/// uploaded into a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryPolicy {
    /// Keep previous turns; follow-up questions can refer to them.
    Keep,
    /// Start a fresh conversation with the new documents.
    Clear,
}

impl HistoryPolicy {
    /// Parse a policy from user input.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "keep" => Some(Self::Keep),
            "clear" => Some(Self::Clear),
            _ => None,
        }
    }
}

/// Retrieval and answering settings (`rag:` section of config.yaml).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RagConfig {
    /// Maximum chunk length in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Number of chunks retrieved per question
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Estimated token budget of the chat model's context window
    #[serde(default = "default_context_budget_tokens")]
    pub context_budget_tokens: usize,

    /// Tokens kept free in the context window for the answer
    #[serde(default = "default_answer_reserve_tokens")]
    pub answer_reserve_tokens: usize,

    /// Largest accepted upload in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Texts per embedding request
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,

    /// Rephrase follow-up questions into standalone ones before retrieval
    #[serde(default = "default_true")]
    pub condense_questions: bool,

    /// History handling when a new document set is uploaded
    #[serde(default = "default_history_on_upload")]
    pub history_on_upload: HistoryPolicy,

    /// Sampling temperature for answers
    #[serde(default)]
    pub temperature: f32,

    /// Stream answers token by token
    #[serde(default = "default_true")]
    pub streaming: bool,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_top_k() -> usize {
    4
}

fn default_context_budget_tokens() -> usize {
    4096
}

fn default_answer_reserve_tokens() -> usize {
    512
}

fn default_max_upload_bytes() -> u64 {
    200 * 1024 * 1024
}

fn default_embedding_batch_size() -> usize {
    64
}

fn default_true() -> bool {
    true
}

fn default_history_on_upload() -> HistoryPolicy {
    HistoryPolicy::Clear
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            context_budget_tokens: default_context_budget_tokens(),
            answer_reserve_tokens: default_answer_reserve_tokens(),
            max_upload_bytes: default_max_upload_bytes(),
            embedding_batch_size: default_embedding_batch_size(),
            condense_questions: true,
            history_on_upload: default_history_on_upload(),
            temperature: 0.0,
            streaming: true,
        }
    }
}

impl RagConfig {
    /// Check the numeric settings for consistency.
    pub fn validate(&self) -> AppResult<()> {
        if self.chunk_size == 0 {
            return Err(AppError::Config("chunkSize must be greater than 0".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(AppError::Config(format!(
                "chunkOverlap ({}) must be smaller than chunkSize ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(AppError::Config("topK must be at least 1".to_string()));
        }
        if self.embedding_batch_size == 0 {
            return Err(AppError::Config(
                "embeddingBatchSize must be at least 1".to_string(),
            ));
        }
        if self.answer_reserve_tokens >= self.context_budget_tokens {
            return Err(AppError::Config(format!(
                "answerReserveTokens ({}) must be smaller than contextBudgetTokens ({})",
                self.answer_reserve_tokens, self.context_budget_tokens
            )));
        }
        Ok(())
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    llm: Option<LlmConfig>,
    rag: Option<RagConfig>,
    workspace: Option<WorkspaceConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            provider: "openai".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            embedding_provider: "openai".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            api_key: None,
            log_level: None,
            verbose: false,
            no_color: false,
            llm: None,
            rag: RagConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the config file and the environment.
    ///
    /// Environment variables:
    /// - `INKCHAT_WORKSPACE`: Override workspace path
    /// - `INKCHAT_CONFIG`: Path to config file
    /// - `INKCHAT_PROVIDER`: Chat provider
    /// - `INKCHAT_MODEL`: Chat model identifier
    /// - `INKCHAT_EMBEDDING_PROVIDER`: Embedding provider
    /// - `INKCHAT_API_KEY`: API key
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    ///
    /// # Example
    /// ```no_run
    /// use inkchat_core::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load config");
    /// println!("Workspace: {:?}", config.workspace);
    /// ```
    pub fn load() -> AppResult<Self> {
        Self::load_from(None, None)
    }

    /// Like [`AppConfig::load`], with the workspace and config file given
    /// explicitly (CLI flags) taking precedence over the environment.
    pub fn load_from(workspace: Option<PathBuf>, config_file: Option<PathBuf>) -> AppResult<Self> {
        let mut config = Self::default();

        let workspace =
            workspace.or_else(|| std::env::var("INKCHAT_WORKSPACE").ok().map(PathBuf::from));
        if let Some(workspace) = workspace {
            config.workspace = workspace;
        }

        config.config_file =
            config_file.or_else(|| std::env::var("INKCHAT_CONFIG").ok().map(PathBuf::from));

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.inkchat_dir().join("config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Ok(provider) = std::env::var("INKCHAT_PROVIDER") {
            config.provider = provider;
        }

        if let Ok(model) = std::env::var("INKCHAT_MODEL") {
            config.model = model;
        }

        if let Ok(provider) = std::env::var("INKCHAT_EMBEDDING_PROVIDER") {
            config.embedding_provider = provider;
        }

        config.api_key = std::env::var("INKCHAT_API_KEY").ok();
        config.log_level = std::env::var("RUST_LOG").ok();

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into a copy of this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(ws) = config_file.workspace {
            if let Some(path) = ws.path {
                result.workspace = PathBuf::from(path);
            }
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(rag) = config_file.rag {
            result.rag = rag;
        }

        if let Some(llm) = config_file.llm {
            result.provider = llm.active_provider.clone();
            result.embedding_provider = llm.active_embedding_provider.clone();

            if let Some(model) = llm
                .providers
                .get(&llm.active_provider)
                .and_then(ProviderConfig::model)
            {
                result.model = model.to_string();
            }

            if let Some(model) = llm
                .providers
                .get(&llm.active_embedding_provider)
                .and_then(ProviderConfig::embedding_model)
            {
                result.embedding_model = model.to_string();
            }

            result.llm = Some(llm);
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Command-line flags take precedence over environment variables and
    /// the config file.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        model: Option<String>,
        embedding_provider: Option<String>,
        api_key: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = provider {
            self.provider = provider;
        }

        if let Some(model) = model {
            self.model = model;
        }

        if let Some(embedding_provider) = embedding_provider {
            self.embedding_provider = embedding_provider;
        }

        if let Some(api_key) = api_key {
            self.api_key = Some(api_key);
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Get the path to the .inkchat directory.
    pub fn inkchat_dir(&self) -> PathBuf {
        self.workspace.join(".inkchat")
    }

    /// Ensure the .inkchat directory exists.
    pub fn ensure_inkchat_dir(&self) -> AppResult<()> {
        let dir = self.inkchat_dir();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                AppError::Config(format!("Failed to create .inkchat directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Get the configuration block for a provider, if the config file has one.
    pub fn get_provider_config(&self, provider: &str) -> Option<&ProviderConfig> {
        self.llm.as_ref().and_then(|llm| llm.providers.get(provider))
    }

    /// Backend kind behind a provider name.
    ///
    /// Named blocks in `llm.providers` decide by their shape; bare names are
    /// taken as the kind itself.
    pub fn provider_kind(&self, provider: &str) -> String {
        self.get_provider_config(provider)
            .map(|p| p.kind().to_string())
            .unwrap_or_else(|| provider.to_lowercase())
    }

    /// Custom endpoint configured for a provider.
    pub fn endpoint(&self, provider: &str) -> Option<String> {
        self.get_provider_config(provider)
            .and_then(ProviderConfig::endpoint)
            .map(str::to_string)
    }

    /// Resolve the API key for a provider.
    ///
    /// Order: explicit key (flag / INKCHAT_API_KEY), the provider's
    /// `apiKeyEnv` variable, then `OPENAI_API_KEY` for the openai provider.
    pub fn resolve_api_key(&self, provider: &str) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }

        if let Some(ProviderConfig::OpenAI { api_key_env, .. }) = self.get_provider_config(provider)
        {
            if let Ok(key) = std::env::var(api_key_env) {
                return Some(key);
            }
        }

        if self.provider_kind(provider) == "openai" {
            return std::env::var(OPENAI_API_KEY_ENV).ok();
        }

        None
    }

    /// Validate provider names and retrieval settings.
    ///
    /// Missing credentials are not checked here; they surface when a client
    /// for the provider is created.
    pub fn validate(&self) -> AppResult<()> {
        if !CHAT_PROVIDERS.contains(&self.provider.as_str())
            && self.get_provider_config(&self.provider).and_then(ProviderConfig::model).is_none()
        {
            return Err(AppError::Config(format!(
                "Unknown provider: {}. Supported: {}",
                self.provider,
                CHAT_PROVIDERS.join(", ")
            )));
        }

        if !EMBEDDING_PROVIDERS.contains(&self.embedding_provider.as_str())
            && self.get_provider_config(&self.embedding_provider).is_none()
        {
            return Err(AppError::Config(format!(
                "Unknown embedding provider: {}. Supported: {}",
                self.embedding_provider,
                EMBEDDING_PROVIDERS.join(", ")
            )));
        }

        self.rag.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.model, "gpt-3.5-turbo");
        assert_eq!(config.embedding_model, "text-embedding-3-small");
        assert_eq!(config.rag.chunk_size, 1000);
        assert_eq!(config.rag.chunk_overlap, 200);
        assert_eq!(config.rag.top_k, 4);
        assert_eq!(config.rag.max_upload_bytes, 200 * 1024 * 1024);
        assert_eq!(config.rag.history_on_upload, HistoryPolicy::Clear);
        assert!(!config.verbose);
    }

    #[test]
    fn test_inkchat_dir() {
        let config = AppConfig::default();
        assert!(config.inkchat_dir().ends_with(".inkchat"));
    }

    #[test]
    fn test_with_overrides() {
        let config = AppConfig::default();
        let overridden = config.with_overrides(
            None,
            None,
            Some("ollama".to_string()),
            Some("llama3.2".to_string()),
            Some("trigram".to_string()),
            Some("sk-test".to_string()),
            None,
            true,
            false,
        );

        assert_eq!(overridden.provider, "ollama");
        assert_eq!(overridden.model, "llama3.2");
        assert_eq!(overridden.embedding_provider, "trigram");
        assert_eq!(overridden.resolve_api_key("ollama"), Some("sk-test".to_string()));
        assert!(overridden.verbose);
        assert_eq!(overridden.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_validate_unknown_provider() {
        let mut config = AppConfig::default();
        config.provider = "unknown".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_overlap_not_smaller_than_size() {
        let mut config = AppConfig::default();
        config.rag.chunk_overlap = 1000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("chunkOverlap"));
    }

    #[test]
    fn test_merge_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
llm:
  activeProvider: ollama
  activeEmbeddingProvider: local
  providers:
    ollama:
      endpoint: http://localhost:11434
      model: llama3.2
      embeddingModel: nomic-embed-text
    local:
      dimensions: 256
rag:
  chunkSize: 500
  chunkOverlap: 50
  historyOnUpload: keep
logging:
  level: warn
"#,
        )
        .unwrap();

        let config = AppConfig::default().merge_yaml(&path).unwrap();
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.model, "llama3.2");
        assert_eq!(config.embedding_provider, "local");
        assert_eq!(config.embedding_model, "trigram-v1");
        assert_eq!(config.endpoint("ollama").as_deref(), Some("http://localhost:11434"));
        assert_eq!(config.rag.chunk_size, 500);
        assert_eq!(config.rag.top_k, 4);
        assert_eq!(config.rag.history_on_upload, HistoryPolicy::Keep);
        assert_eq!(config.log_level.as_deref(), Some("warn"));
        assert_eq!(config.provider_kind("local"), "trigram");
        assert_eq!(config.provider_kind("OpenAI"), "openai");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_history_policy_parse() {
        assert_eq!(HistoryPolicy::parse("KEEP"), Some(HistoryPolicy::Keep));
        assert_eq!(HistoryPolicy::parse("clear"), Some(HistoryPolicy::Clear));
        assert_eq!(HistoryPolicy::parse("maybe"), None);
    }
}

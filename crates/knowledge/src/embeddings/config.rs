//! Embedding configuration resolved from the application config.

use inkchat_core::{AppConfig, AppResult, ProviderConfig};
use serde::{Deserialize, Serialize};

/// Default OpenAI embedding model.
pub const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default Ollama embedding model.
pub const DEFAULT_OLLAMA_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Default trigram vector size.
pub const DEFAULT_TRIGRAM_DIMENSIONS: usize = 384;

/// Everything needed to build an embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Provider kind: "openai", "ollama", "trigram"
    pub provider: String,

    /// Model identifier (provider-specific)
    pub model: String,

    /// Embedding vector dimensions, when fixed by configuration
    pub dimensions: Option<usize>,

    /// Custom endpoint
    pub endpoint: Option<String>,

    /// API key (hosted providers)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Maximum texts per embedding request
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "trigram".to_string(),
            model: "trigram-v1".to_string(),
            dimensions: Some(DEFAULT_TRIGRAM_DIMENSIONS),
            endpoint: None,
            api_key: None,
            batch_size: 64,
        }
    }
}

impl EmbeddingConfig {
    /// Resolve the active embedding provider's settings.
    pub fn from_app_config(config: &AppConfig) -> AppResult<Self> {
        let name = config.embedding_provider.as_str();
        let kind = config.provider_kind(name);
        let block = config.get_provider_config(name);

        let model = match kind.as_str() {
            "trigram" => "trigram-v1".to_string(),
            "ollama" => block
                .and_then(ProviderConfig::embedding_model)
                .unwrap_or(DEFAULT_OLLAMA_EMBEDDING_MODEL)
                .to_string(),
            _ => block
                .and_then(ProviderConfig::embedding_model)
                .map(str::to_string)
                .unwrap_or_else(|| config.embedding_model.clone()),
        };

        let dimensions = match block {
            Some(ProviderConfig::Trigram { dimensions }) => Some(*dimensions),
            _ if kind == "trigram" => Some(DEFAULT_TRIGRAM_DIMENSIONS),
            _ => None,
        };

        Ok(Self {
            provider: kind,
            model,
            dimensions,
            endpoint: config.endpoint(name),
            api_key: config.resolve_api_key(name),
            batch_size: config.rag.embedding_batch_size,
        })
    }
}

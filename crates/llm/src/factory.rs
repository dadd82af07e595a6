//! LLM provider factory.
//!
//! Resolves a provider name from configuration into a ready client.

use crate::client::LlmClient;
use crate::providers::{ollama::DEFAULT_OLLAMA_URL, openai::DEFAULT_OPENAI_URL, OllamaClient, OpenAiClient};
use crate::types::ProviderType;
use inkchat_core::{AppError, AppResult};
use std::sync::Arc;

/// Create an LLM client based on the provider name.
///
/// # Arguments
/// * `provider` - Provider identifier ("openai", "ollama")
/// * `endpoint` - Optional custom endpoint URL
/// * `api_key` - API key, required by "openai"
///
/// # Errors
/// Returns `MissingCredential` when openai is selected without a key and
/// `Config` for an unknown provider.
pub fn create_client(
    provider: &str,
    endpoint: Option<&str>,
    api_key: Option<&str>,
) -> AppResult<Arc<dyn LlmClient>> {
    let provider_type = ProviderType::parse(provider)
        .ok_or_else(|| AppError::Config(format!("Unknown provider: {}", provider)))?;

    match provider_type {
        ProviderType::Ollama => {
            let base_url = endpoint.unwrap_or(DEFAULT_OLLAMA_URL);
            tracing::debug!(endpoint = base_url, "Creating Ollama chat client");
            Ok(Arc::new(OllamaClient::with_base_url(base_url)))
        }
        ProviderType::OpenAI => {
            let api_key = api_key.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
                AppError::MissingCredential(
                    "OpenAI provider requires an API key (set OPENAI_API_KEY or --api-key)"
                        .to_string(),
                )
            })?;
            let base_url = endpoint.unwrap_or(DEFAULT_OPENAI_URL);
            tracing::debug!(endpoint = base_url, "Creating OpenAI chat client");
            Ok(Arc::new(OpenAiClient::with_base_url(api_key, base_url)?))
        }
    }
}

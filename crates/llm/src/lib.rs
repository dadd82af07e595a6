//! Chat model integration crate for InkChat.
//!
//! This crate provides a provider-agnostic abstraction for talking to chat
//! models through a unified trait-based interface.
//!
//! # Providers
//! - **OpenAI**: hosted chat completions (default)
//! - **Ollama**: local LLM runtime
//!
//! # Example
//! ```no_run
//! use inkchat_llm::{LlmClient, LlmRequest, providers::OllamaClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OllamaClient::new();
//! let request = LlmRequest::from_prompt("Hello, world!", "llama3.2");
//! let response = client.complete(&request).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod factory;
pub mod providers;
pub mod types;

// Re-export main types
pub use client::{
    ChatMessage, ChatRole, LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk,
    LlmUsage,
};
pub use factory::create_client;
pub use providers::{OllamaClient, OpenAiClient};
pub use types::ProviderType;

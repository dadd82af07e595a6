//! Prompt system for InkChat.
//!
//! This crate provides structured prompt management with:
//! - YAML-based prompt definitions (built-in default plus workspace overrides)
//! - Handlebars template rendering
//! - Retrieved-context injection and follow-up question condensing

pub mod builder;
pub mod loader;
pub mod types;

// Re-export main types
pub use builder::{build_condense_prompt, build_prompt, ContextBlock, HistoryTurn};
pub use loader::{default_prompt, load_prompt, resolve_prompt, DEFAULT_PROMPT_ID};
pub use types::{BuiltPrompt, BuiltPromptMetadata, PromptDefinition, PromptOutputSpec};

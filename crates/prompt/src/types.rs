//! Prompt types for InkChat.
//!
//! This module defines the domain entities for the prompt system.

use serde::{Deserialize, Serialize};

/// A prompt definition loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDefinition {
    /// Unique prompt identifier
    pub id: String,

    /// Human-readable title
    pub title: String,

    /// API version for schema evolution
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Creator identifier
    #[serde(rename = "createdBy", default)]
    pub created_by: String,

    /// System message template; receives the retrieved `context` blocks
    #[serde(default)]
    pub system: Option<String>,

    /// User message template with Handlebars syntax
    pub template: String,

    /// Template that rewrites a follow-up question into a standalone one
    #[serde(default)]
    pub condense: Option<String>,

    /// Output specification
    #[serde(default)]
    pub output: PromptOutputSpec,
}

/// Output specification for the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptOutputSpec {
    /// Output format (e.g., "text", "markdown")
    pub format: String,
}

impl Default for PromptOutputSpec {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
        }
    }
}

/// A fully built prompt ready for LLM execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltPrompt {
    /// System message (optional)
    pub system: Option<String>,

    /// User message (required)
    pub user: String,

    /// Metadata about the built prompt
    pub metadata: BuiltPromptMetadata,
}

/// Metadata about a built prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltPromptMetadata {
    /// Source prompt ID
    #[serde(rename = "sourcePromptId")]
    pub source_prompt_id: String,

    /// Number of context blocks injected into the system message
    #[serde(rename = "contextBlocks")]
    pub context_blocks: usize,
}

impl BuiltPrompt {
    /// Create a new built prompt.
    pub fn new(
        system: Option<String>,
        user: String,
        source_prompt_id: String,
        context_blocks: usize,
    ) -> Self {
        Self {
            system,
            user,
            metadata: BuiltPromptMetadata {
                source_prompt_id,
                context_blocks,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_definition_deserialization() {
        let yaml = r#"
id: test.prompt
title: Test Prompt
apiVersion: "1.0"
createdBy: test
system: "Context: {{#each context}}{{this.text}}{{/each}}"
template: "{{question}}"
"#;

        let def: PromptDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.id, "test.prompt");
        assert!(def.system.is_some());
        assert!(def.condense.is_none());
        assert_eq!(def.output.format, "text");
    }

    #[test]
    fn test_built_prompt_creation() {
        let built = BuiltPrompt::new(
            Some("System message".to_string()),
            "User message".to_string(),
            "test.prompt".to_string(),
            3,
        );

        assert_eq!(built.system, Some("System message".to_string()));
        assert_eq!(built.user, "User message");
        assert_eq!(built.metadata.source_prompt_id, "test.prompt");
        assert_eq!(built.metadata.context_blocks, 3);
    }
}

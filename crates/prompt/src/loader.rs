//! Prompt loader for YAML prompt definitions.

use crate::types::PromptDefinition;
use inkchat_core::{AppError, AppResult};
use std::path::Path;

/// Identifier of the built-in answer prompt.
pub const DEFAULT_PROMPT_ID: &str = "inkchat.qa.default";

const DEFAULT_PROMPT_YAML: &str = include_str!("../prompts/inkchat.qa.default.yml");

/// The built-in answer prompt.
pub fn default_prompt() -> AppResult<PromptDefinition> {
    parse_prompt(DEFAULT_PROMPT_YAML, "<built-in>")
}

/// Load a prompt definition by ID from the workspace.
///
/// Searches for `<id>.yml` in the `.inkchat/prompts/` directory.
///
/// # Example
/// ```no_run
/// use inkchat_prompt::load_prompt;
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let prompt = load_prompt(Path::new("."), "inkchat.qa.default")?;
/// println!("Loaded prompt: {}", prompt.title);
/// # Ok(())
/// # }
/// ```
pub fn load_prompt(workspace_path: &Path, prompt_id: &str) -> AppResult<PromptDefinition> {
    let prompt_file = workspace_path
        .join(".inkchat/prompts")
        .join(format!("{}.yml", prompt_id));

    tracing::debug!("Loading prompt from: {:?}", prompt_file);

    if !prompt_file.exists() {
        return Err(AppError::Prompt(format!(
            "Prompt file not found: {:?}",
            prompt_file
        )));
    }

    let contents = std::fs::read_to_string(&prompt_file).map_err(|e| {
        AppError::Prompt(format!(
            "Failed to read prompt file {:?}: {}",
            prompt_file, e
        ))
    })?;

    let definition = parse_prompt(&contents, &prompt_file.display().to_string())?;
    tracing::info!("Loaded prompt: {} ({})", definition.id, definition.title);
    Ok(definition)
}

/// Load the workspace override of the answer prompt, falling back to the
/// built-in one when the workspace has none.
pub fn resolve_prompt(workspace_path: &Path) -> AppResult<PromptDefinition> {
    let override_file = workspace_path
        .join(".inkchat/prompts")
        .join(format!("{}.yml", DEFAULT_PROMPT_ID));

    if override_file.exists() {
        load_prompt(workspace_path, DEFAULT_PROMPT_ID)
    } else {
        default_prompt()
    }
}

fn parse_prompt(contents: &str, origin: &str) -> AppResult<PromptDefinition> {
    let definition: PromptDefinition = serde_yaml::from_str(contents).map_err(|e| {
        AppError::Prompt(format!("Failed to parse prompt YAML {}: {}", origin, e))
    })?;

    validate_prompt(&definition)?;
    Ok(definition)
}

/// Validate a prompt definition.
fn validate_prompt(def: &PromptDefinition) -> AppResult<()> {
    if def.id.is_empty() {
        return Err(AppError::Prompt("Prompt ID cannot be empty".to_string()));
    }

    if def.title.is_empty() {
        return Err(AppError::Prompt("Prompt title cannot be empty".to_string()));
    }

    if def.template.is_empty() {
        return Err(AppError::Prompt(
            "Prompt template cannot be empty".to_string(),
        ));
    }

    if !def.api_version.contains('.') {
        return Err(AppError::Prompt(format!(
            "Invalid apiVersion format: {}. Expected format: 'x.y'",
            def.api_version
        )));
    }

    Ok(())
}

//! Prompt builder for rendering templates with retrieved context.

use crate::types::{BuiltPrompt, PromptDefinition};
use handlebars::Handlebars;
use inkchat_core::{AppError, AppResult};
use serde::Serialize;

/// One retrieved chunk as shown to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ContextBlock {
    /// Human-readable origin, e.g. "report.pdf p.3"
    pub source: String,

    /// Chunk text
    pub text: String,
}

/// A prior exchange used when condensing a follow-up question.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryTurn {
    pub question: String,
    pub answer: String,
}

/// Build the answer prompt from a definition, the question and retrieved context.
///
/// The system template receives `context` (a list of [`ContextBlock`]) and
/// `question`; the user template receives the same variables.
///
/// # Example
/// ```no_run
/// use inkchat_prompt::{build_prompt, default_prompt, ContextBlock};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let def = default_prompt()?;
/// let context = vec![ContextBlock { source: "notes.txt".into(), text: "Rust is fast.".into() }];
/// let built = build_prompt(&def, "Is Rust fast?", &context)?;
/// println!("User prompt: {}", built.user);
/// # Ok(())
/// # }
/// ```
pub fn build_prompt(
    definition: &PromptDefinition,
    question: &str,
    context: &[ContextBlock],
) -> AppResult<BuiltPrompt> {
    tracing::debug!(prompt = %definition.id, blocks = context.len(), "Building prompt");

    let variables = serde_json::json!({
        "question": question,
        "context": context,
    });

    let system = definition
        .system
        .as_deref()
        .map(|template| render_template(template, &variables))
        .transpose()?
        .map(|s| s.trim_end().to_string());
    let user = render_template(&definition.template, &variables)?;

    Ok(BuiltPrompt::new(
        system,
        user,
        definition.id.clone(),
        context.len(),
    ))
}

/// Render the condense template, if the definition has one.
///
/// Returns `None` when the definition carries no `condense` template.
pub fn build_condense_prompt(
    definition: &PromptDefinition,
    question: &str,
    history: &[HistoryTurn],
) -> AppResult<Option<String>> {
    let Some(template) = definition.condense.as_deref() else {
        return Ok(None);
    };

    let variables = serde_json::json!({
        "question": question,
        "history": history,
    });
    render_template(template, &variables).map(Some)
}

/// Render a Handlebars template with variables.
fn render_template(template: &str, variables: &serde_json::Value) -> AppResult<String> {
    let mut handlebars = Handlebars::new();

    // Disable HTML escaping for plain text
    handlebars.register_escape_fn(handlebars::no_escape);

    handlebars
        .register_template_string("prompt", template)
        .map_err(|e| AppError::Prompt(format!("Failed to register template: {}", e)))?;

    handlebars
        .render("prompt", variables)
        .map_err(|e| AppError::Prompt(format!("Failed to render template: {}", e)))
}

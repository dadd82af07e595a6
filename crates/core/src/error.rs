//! Error types for InkChat.
//!
//! One enum covers the whole pipeline: upload validation, credentials,
//! the embedding and chat services, retrieval, plus the ambient categories
//! (configuration, I/O, prompts, serialization).

use thiserror::Error;

/// Unified error type for InkChat.
///
/// All fallible functions return `Result<T, AppError>`. Every variant carries
/// a message meant to be shown to the user as-is.
#[derive(Error, Debug)]
pub enum AppError {
    /// The uploaded file's extension is not one of pdf, docx, txt.
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The uploaded file exceeds the configured size limit.
    #[error("File too large: {name} is {size} bytes (limit {limit} bytes)")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    /// A provider that needs an API key was used without one.
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// The embedding service failed or returned unusable vectors.
    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    /// Retrieval could not produce context for a question.
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// The chat model failed to produce an answer.
    #[error("Generation error: {0}")]
    Generation(String),

    /// A document could be read but not parsed.
    #[error("Document error: {0}")]
    Document(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prompt system errors
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The operation was cancelled before it completed.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Short machine-friendly name of the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::MissingCredential(_) => "missing_credential",
            Self::EmbeddingService(_) => "embedding_service",
            Self::Retrieval(_) => "retrieval",
            Self::Generation(_) => "generation",
            Self::Document(_) => "document",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Prompt(_) => "prompt",
            Self::Serialization(_) => "serialization",
            Self::Cancelled(_) => "cancelled",
            Self::Other(_) => "other",
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_too_large_message() {
        let err = AppError::FileTooLarge {
            name: "big.pdf".to_string(),
            size: 300,
            limit: 200,
        };
        let msg = err.to_string();
        assert!(msg.contains("big.pdf"));
        assert!(msg.contains("limit 200"));
        assert_eq!(err.kind(), "file_too_large");
    }

    #[test]
    fn test_json_error_conversion() {
        let err: AppError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "serialization");
    }
}

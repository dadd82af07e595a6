//! InkChat Core Library
//!
//! Foundational utilities shared by every InkChat crate:
//! - Error handling (`AppError`, `AppResult`)
//! - Logging infrastructure
//! - Configuration management

pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::{AppConfig, HistoryPolicy, ProviderConfig, RagConfig};
pub use error::{AppError, AppResult};

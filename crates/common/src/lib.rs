//! Anchor Common Library
//!
//! Shared code for the Anchor services including:
//! - Core request/response types and enums
//! - Error types and handling
//! - Configuration management
//! - Chat-model (generation) client abstraction
//! - Embedding client abstraction
//! - User style-profile provider

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod profile;
pub mod types;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::ChatModel;
pub use types::{AnswerMode, ConfidenceLevel, RetrievalMode};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;

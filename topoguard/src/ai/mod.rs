//! Generator collaborators.
//!
//! The verification core never talks to a model directly. It asks a
//! [`Generator`] for text and treats the answer as untrusted input.

pub mod openai;
pub mod pricing;
pub mod prompts;
pub mod provider;
pub mod replay;

use thiserror::Error;

pub use openai::{GeneratorConfig, OpenAiCompatibleClient};
pub use pricing::{CostCounters, Pricing};
pub use prompts::{build_system_prompt, build_task_prompt};
pub use provider::{ChatMessage, ChatRole, Generation, GenerationRequest, Generator, TokenUsage};
pub use replay::ReplayGenerator;

#[derive(Debug, Error)]
pub enum AIError {
    #[error("API request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Failed to parse response: {0}")]
    ParseError(String),
    #[error("Rate limited. Retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },
    #[error("Missing API key: set {0}")]
    MissingApiKey(String),
    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
    #[error("Generator call timed out after {0} seconds")]
    Timeout(u64),
    #[error("No recorded output for task {0}")]
    NoRecording(String),
    #[error("Failed to read recording: {0}")]
    Io(#[from] std::io::Error),
}

impl AIError {
    /// Errors that no amount of retrying will fix.
    pub fn is_configuration(&self) -> bool {
        matches!(self, AIError::MissingApiKey(_) | AIError::NoRecording(_))
    }
}

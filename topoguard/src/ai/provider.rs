//! Generator Trait
//!
//! Defines the interface every text generator implements (HTTP model
//! endpoints, recorded replays, test doubles).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ai::AIError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// One call to a generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub task_id: String,
    /// 1-based topology attempt this call belongs to
    pub attempt: u32,
    /// Full conversation so far, system prompt first
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    #[serde(default)]
    pub usage: TokenUsage,
}

/// Common trait for all generators
#[async_trait]
pub trait Generator: Send + Sync {
    /// Name used in logs and run metadata
    fn name(&self) -> &str;

    /// Produce free-form text expected to hold one netlist code block
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, AIError>;
}

//! LLM Provider Abstraction Layer
//!
//! This module provides a common interface for the model backends the
//! pipeline talks to (Ollama and any OpenAI-compatible endpoint). The
//! [`LLMProvider`] trait is implemented once per backend; the
//! [`router::LLMRouter`] ranks them, fails over between them and enforces the
//! spend ceiling. Everything above this layer depends only on
//! [`ModelClient`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod ollama;
pub mod openai;
pub mod router;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    /// The spend ceiling refuses further calls
    #[error("Model calls disallowed: spent ${spent:.2} of ${ceiling:.2}")]
    CallsDisallowed { spent: f64, ceiling: f64 },

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl LLMError {
    pub fn is_calls_disallowed(&self) -> bool {
        matches!(self, LLMError::CallsDisallowed { .. })
    }
}

impl From<LLMError> for sdk::EngineError {
    fn from(err: LLMError) -> Self {
        match err {
            LLMError::CallsDisallowed { spent, ceiling } => {
                sdk::EngineError::BudgetExceeded { spent, ceiling }
            }
            other => sdk::EngineError::ExternalCall(other.to_string()),
        }
    }
}

/// Message in a prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// One model invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Provider to try first, ahead of the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            messages,
            temperature,
            max_tokens,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: Option<String>) -> Self {
        self.provider = provider;
        self
    }

    /// Rough prompt size: ~4 characters per token
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.messages)
    }
}

/// Text returned by a model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Completion {
    pub content: String,
    /// Provider that answered
    pub provider: String,
}

/// Estimate token count for a set of messages
///
/// Uses a simple heuristic: ~4 characters per token
pub fn estimate_tokens(messages: &[Message]) -> usize {
    let total_chars: usize = messages.iter().map(|m| m.content.len()).sum();
    total_chars / 4
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama)
    fn is_local(&self) -> bool;

    /// Returns the estimated cost in USD for `tokens` tokens
    /// Local providers should return 0.0
    fn estimated_cost(&self, tokens: usize) -> f64;

    /// Generate a completion and return its text
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Check if the provider is currently healthy and available
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// The model-invocation seam used by the executor and lanes
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

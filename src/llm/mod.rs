//! LLM integration: turning a prompt into generated source code.
//!
//! [`CodeGenerator`] is the seam the generation pipeline talks to;
//! [`GeminiClient`] is the production implementation.

mod gemini;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::{GeminiClient, GenerationConfig, RetryPolicy};

/// Instruction prepended to every user prompt.
pub const SYSTEM_PROMPT: &str = "You are an expert full-stack developer. Generate clean, production-ready code based on the user's requirements. Include proper error handling, comments, and follow best practices. Provide complete, working code that can be used immediately.";

/// Builds the text actually sent to the model.
pub fn build_prompt(prompt: &str) -> String {
    format!("{SYSTEM_PROMPT}\n\nUser request: {prompt}")
}

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("Gemini API key not configured")]
    NotConfigured,
    #[error("invalid Gemini API key")]
    InvalidApiKey,
    #[error("Gemini API quota exceeded")]
    QuotaExceeded,
    #[error("Gemini model not available: {0}")]
    ModelNotFound(String),
    #[error("Gemini API error (http {status}): {message}")]
    Http { status: u16, message: String },
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("invalid response format from Gemini API: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Returns true if the error is transient and should be retried.
    ///
    /// Timeouts are not retried; each attempt may already take the full client timeout.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// Something that can generate code for a prompt.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Model name recorded in project metadata.
    fn model(&self) -> &str;

    /// Whether credentials are present; reported by `/health`.
    fn is_configured(&self) -> bool;

    /// Generates code for `prompt` (the raw user prompt, without system text).
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_is_prefixed_with_system_text() {
        let full = build_prompt("Build a todo app");
        assert!(full.starts_with(SYSTEM_PROMPT));
        assert!(full.ends_with("\n\nUser request: Build a todo app"));
    }

    #[test]
    fn only_transient_errors_retry() {
        assert!(!LlmError::Timeout.should_retry());
        assert!(LlmError::Transport("reset".into()).should_retry());
        assert!(LlmError::Http { status: 503, message: "busy".into() }.should_retry());
        assert!(!LlmError::Http { status: 400, message: "bad".into() }.should_retry());
        assert!(!LlmError::QuotaExceeded.should_retry());
        assert!(!LlmError::InvalidApiKey.should_retry());
        assert!(!LlmError::NotConfigured.should_retry());
    }
}

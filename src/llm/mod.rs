//! LLM integration for sentiment analysis.
//!
//! Defines the `LlmBackend` trait and provides implementations for
//! OpenRouter (OpenAI-compatible, multi-provider) and Anthropic.

pub mod anthropic;
pub mod openrouter;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Maximum retries on rate limit / server errors.
pub(crate) const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (ms).
pub(crate) const BASE_BACKOFF_MS: u64 = 1000;

/// Abstraction over chat-style LLM backends.
///
/// Implementors send a system + user prompt and return the raw text of the
/// model's reply. Parsing is the caller's concern.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;

    /// Model identifier string.
    fn model_name(&self) -> &str;
}

/// Delay before retry `attempt` (1-based).
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt.saturating_sub(1)))
}

/// 429 and 5xx are worth retrying; anything else is final.
pub(crate) fn is_retryable(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

//! OpenRouter LLM integration.
//!
//! Routes calls through OpenRouter's unified API (OpenAI-compatible chat
//! completions). A fallback model is tried once the primary model has
//! exhausted its retries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use super::{backoff_delay, is_retryable, LlmBackend, MAX_RETRIES};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_PRIMARY_MODEL: &str = "anthropic/claude-sonnet-4";
const DEFAULT_MAX_TOKENS: u32 = 1024;

// ---------------------------------------------------------------------------
// API types (OpenAI-compatible)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenRouterClient {
    http: Client,
    api_key: SecretString,
    primary_model: String,
    fallback_model: Option<String>,
    max_tokens: u32,
    total_tokens: AtomicU64,
    total_calls: AtomicU64,
}

impl OpenRouterClient {
    pub fn new(
        api_key: SecretString,
        primary_model: Option<String>,
        fallback_model: Option<String>,
        max_tokens: Option<u32>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to build OpenRouter HTTP client")?;

        Ok(Self {
            http,
            api_key,
            primary_model: primary_model.unwrap_or_else(|| DEFAULT_PRIMARY_MODEL.to_string()),
            fallback_model,
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            total_tokens: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
        })
    }

    fn build_request(&self, model: &str, system: &str, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            max_tokens: self.max_tokens,
            // Low temperature keeps the structured output stable.
            temperature: 0.2,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
        }
    }

    /// Send a chat completion to one model with retry + exponential backoff.
    async fn call_model(&self, model: &str, system: &str, prompt: &str) -> Result<String> {
        let request = self.build_request(model, system, prompt);
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, model, "Retrying OpenRouter call");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(OPENROUTER_API_URL)
                .bearer_auth(self.api_key.expose_secret())
                .header("X-Title", "SWARM Sentiment Agent")
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body: ChatResponse = response
                            .json()
                            .await
                            .context("Failed to parse OpenRouter response")?;

                        let text = body
                            .choices
                            .into_iter()
                            .filter_map(|c| c.message.map(|m| m.content))
                            .collect::<Vec<_>>()
                            .join("");

                        if let Some(usage) = body.usage {
                            self.total_tokens.fetch_add(usage.total_tokens, Ordering::Relaxed);
                        }
                        self.total_calls.fetch_add(1, Ordering::Relaxed);

                        if text.trim().is_empty() {
                            anyhow::bail!("OpenRouter returned an empty completion");
                        }
                        return Ok(text);
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    if is_retryable(status) {
                        warn!(status = %status, attempt, model, "Retryable OpenRouter error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }
                    anyhow::bail!("OpenRouter API error {status}: {error_text}");
                }
                Err(e) => {
                    warn!(attempt, model, error = %e, "OpenRouter request failed");
                    last_error = Some(format!("Request error: {e}"));
                }
            }
        }

        anyhow::bail!(
            "OpenRouter ({model}) failed after {MAX_RETRIES} retries: {}",
            last_error.unwrap_or_default()
        )
    }

    /// Total tokens consumed across all calls.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens.load(Ordering::Relaxed)
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmBackend for OpenRouterClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        match self.call_model(&self.primary_model, system, prompt).await {
            Ok(text) => Ok(text),
            Err(primary_err) => {
                let Some(fallback) = self.fallback_model.as_deref() else {
                    return Err(primary_err);
                };
                info!(
                    primary = %self.primary_model,
                    fallback,
                    error = %primary_err,
                    "Primary model failed, trying fallback"
                );
                self.call_model(fallback, system, prompt)
                    .await
                    .context("Fallback model also failed")
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.primary_model
    }
}

//! Generative text service abstraction.
//!
//! - **[`OpenAiChat`]**: any OpenAI-compatible `POST /chat/completions`
//!   endpoint, with retry and exponential backoff.
//! - **[`DisabledGenerator`]**: fails every call; used when no provider or
//!   credential is configured, so callers fall back instead of crashing.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, ... (capped at 2^5)

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::LlmError;

/// A single-turn completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// The full instruction sent as the user message.
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A text generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Generate a completion. Implementations return the raw text; callers trim.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

// ============ Disabled ============

/// Generator that always fails with [`LlmError::Disabled`].
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }
}

// ============ OpenAI-compatible chat ============

/// Chat-completions client. Reads `OPENAI_API_KEY` once at construction.
pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl OpenAiChat {
    /// # Errors
    ///
    /// [`LlmError::MissingApiKey`] if `OPENAI_API_KEY` is unset or blank.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(LlmError::MissingApiKey)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying chat completion");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_chat_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = LlmError::Api {
                        status: status.as_u16(),
                        body: body_text,
                    };

                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or(LlmError::EmptyResponse))
    }
}

/// Extract `choices[0].message.content`. Blank content is an error.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, LlmError> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .ok_or_else(|| LlmError::Malformed("missing choices[0].message.content".to_string()))?;

    match content {
        serde_json::Value::Null => Err(LlmError::EmptyResponse),
        serde_json::Value::String(s) if s.trim().is_empty() => Err(LlmError::EmptyResponse),
        serde_json::Value::String(s) => Ok(s.clone()),
        _ => Err(LlmError::Malformed("content is not a string".to_string())),
    }
}

/// Build the configured generator.
///
/// Never fails: a missing credential or a disabled provider yields
/// [`DisabledGenerator`], so every generation falls back gracefully.
pub fn create_generator(config: &LlmConfig) -> Arc<dyn TextGenerator> {
    match config.provider.as_str() {
        "openai" => match OpenAiChat::new(config) {
            Ok(chat) => Arc::new(chat),
            Err(e) => {
                tracing::warn!(error = %e, "generative service unavailable, using fallbacks");
                Arc::new(DisabledGenerator)
            }
        },
        _ => Arc::new(DisabledGenerator),
    }
}

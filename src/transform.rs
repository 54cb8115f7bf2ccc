//! Romantic phrase transformer.
//!
//! Turns a plain English phrase into a styled Spanish declaration using a
//! [`TextGenerator`], falling back to the [`phrasebook`] on any failure.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::TransformConfig;
use crate::error::LlmError;
use crate::llm::{CompletionRequest, TextGenerator};
use crate::phrasebook;

/// Tone of a transformation. Unrecognized values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Style {
    Poetic,
    Playful,
    #[default]
    Passionate,
    Sweet,
    Custom(String),
}

impl Style {
    /// Parse a style hint. Never fails; blank input means [`Style::Passionate`].
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "" | "passionate" => Style::Passionate,
            "poetic" => Style::Poetic,
            "playful" => Style::Playful,
            "sweet" => Style::Sweet,
            _ => Style::Custom(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Style::Poetic => "poetic",
            Style::Playful => "playful",
            Style::Passionate => "passionate",
            Style::Sweet => "sweet",
            Style::Custom(s) => s,
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instruction sent to the generative service.
pub fn build_prompt(text: &str, style: &Style) -> String {
    format!(
        r#"You are a romantic poetry expert. Transform this plain English phrase
into passionate, romantic Spanish. The style should be: {style}

Style guide:
- "poetic": Like Pablo Neruda wrote it - metaphors, imagery, beauty
- "playful": Flirty, fun, with wordplay and charm
- "passionate": Intense, dramatic, telenovela-worthy declarations
- "sweet": Tender, heartfelt, genuine warmth

Original phrase: "{text}"

Respond with ONLY the Spanish translation (no English, no explanations).
Make it memorable. Make it ROMANTIC. Make their heart FLUTTER."#
    )
}

pub struct TextTransformer {
    generator: Arc<dyn TextGenerator>,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl TextTransformer {
    pub fn new(generator: Arc<dyn TextGenerator>, config: &TransformConfig) -> Self {
        Self {
            generator,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// The request [`generate`](Self::generate) sends for this input.
    pub fn request(&self, text: &str, style: &Style) -> CompletionRequest {
        CompletionRequest {
            prompt: build_prompt(text, style),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    /// Generate without fallback. Returns the trimmed, non-empty output.
    pub async fn generate(&self, text: &str, style: &Style) -> Result<String, LlmError> {
        let request = self.request(text, style);
        let output = tokio::time::timeout(self.timeout, self.generator.complete(&request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))??;
        let trimmed = output.trim();
        if trimmed.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(trimmed.to_string())
    }

    /// Generate, or fall back to the phrasebook. Never fails.
    pub async fn transform(&self, text: &str, style: &Style) -> String {
        tracing::info!(%style, text, "spicing up phrase");
        match self.generate(text, style).await {
            Ok(spiced) => spiced,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    model = self.generator.model_name(),
                    "transformation failed, using phrasebook"
                );
                phrasebook::fallback(text)
            }
        }
    }
}

//! The two tools exposed to the voice host.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::engine::KnowledgeEngine;
use crate::error::{ToolError, UNAVAILABLE_REPLY};
use crate::phrasebook;
use crate::traits::Tool;
use crate::transform::{Style, TextTransformer};

pub const TRANSLATE_AND_SPICE: &str = "translate_and_spice";
pub const GET_RELATIONSHIP_WISDOM: &str = "get_relationship_wisdom";

/// Frames an engine reply as the persona's scripture.
pub fn frame_wisdom(wisdom: &str) -> String {
    format!(
        "From the ancient scrolls of relationship psychology: {}",
        wisdom
    )
}

fn string_param<'a>(params: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    params[name]
        .as_str()
        .ok_or_else(|| ToolError::InvalidParams(format!("missing required parameter: {}", name)))
}

/// Turns a plain phrase into styled romantic Spanish.
pub struct TranslateAndSpiceTool {
    transformer: Arc<TextTransformer>,
    default_style: String,
}

impl TranslateAndSpiceTool {
    pub fn new(transformer: Arc<TextTransformer>, default_style: impl Into<String>) -> Self {
        Self {
            transformer,
            default_style: default_style.into(),
        }
    }
}

#[async_trait]
impl Tool for TranslateAndSpiceTool {
    fn name(&self) -> &str {
        TRANSLATE_AND_SPICE
    }

    fn description(&self) -> &str {
        "Translate a plain English phrase into passionate, romantic Spanish"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The plain English phrase to transform"
                },
                "style": {
                    "type": "string",
                    "description": "poetic, playful, passionate or sweet",
                    "default": self.default_style
                }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String, ToolError> {
        let text = string_param(&params, "text")?;
        let style = Style::parse(params["style"].as_str().unwrap_or(&self.default_style));
        Ok(self.transformer.transform(text, &style).await)
    }

    fn fallback(&self, params: &Value, error: &ToolError) -> String {
        match params["text"].as_str() {
            Some(text) if !text.trim().is_empty() => phrasebook::fallback(text),
            _ => error.reply(self.name()),
        }
    }
}

/// Answers relationship questions from the knowledge base.
pub struct RelationshipWisdomTool {
    engine: Arc<KnowledgeEngine>,
}

impl RelationshipWisdomTool {
    pub fn new(engine: Arc<KnowledgeEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for RelationshipWisdomTool {
    fn name(&self) -> &str {
        GET_RELATIONSHIP_WISDOM
    }

    fn description(&self) -> &str {
        "Look up relationship advice in the relationship psychology guide"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The relationship question to research"
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String, ToolError> {
        let question = string_param(&params, "question")?;
        if question.trim().is_empty() {
            return Err(ToolError::InvalidParams(
                "question must not be empty".to_string(),
            ));
        }

        // Completes at once after a successful setup. A setup that failed
        // earlier (embedding outage, unreadable index) is retried here.
        if let Err(e) = self.engine.setup().await {
            tracing::warn!(error = %e, "knowledge base setup failed");
        }

        let wisdom = match self.engine.query(question).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(error = %e, state = self.engine.state().as_str(), "knowledge query failed");
                e.reply().to_string()
            }
        };
        Ok(frame_wisdom(&wisdom))
    }

    fn fallback(&self, _params: &Value, _error: &ToolError) -> String {
        frame_wisdom(UNAVAILABLE_REPLY)
    }
}

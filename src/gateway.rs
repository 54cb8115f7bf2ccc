//! The tool gateway: the only surface the voice host calls.
//!
//! Every invocation runs in its own task with a timeout, and every failure
//! (unknown tool, bad parameters, tool error, panic, timeout) comes back as
//! in-band text. [`ToolGateway::invoke`] never fails and never returns an
//! empty string.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::engine::KnowledgeEngine;
use crate::error::{RegistryError, ToolError, UNAVAILABLE_REPLY};
use crate::task::AbortOnDrop;
use crate::tools::{
    RelationshipWisdomTool, TranslateAndSpiceTool, GET_RELATIONSHIP_WISDOM, TRANSLATE_AND_SPICE,
};
use crate::traits::{validate_params, Tool, ToolInfo, ToolRegistry};
use crate::transform::TextTransformer;

#[derive(Clone)]
pub struct ToolGateway {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolGateway {
    /// Wrap a registry after validating it.
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Result<Self, RegistryError> {
        registry.validate()?;
        Ok(Self {
            registry: Arc::new(registry),
            timeout,
        })
    }

    /// The agent's toolset: `translate_and_spice` and `get_relationship_wisdom`.
    pub fn for_agent(
        engine: Arc<KnowledgeEngine>,
        transformer: Arc<TextTransformer>,
        config: &Config,
    ) -> Result<Self, RegistryError> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(TranslateAndSpiceTool::new(
            transformer,
            config.transform.default_style.clone(),
        )));
        registry.register(Arc::new(RelationshipWisdomTool::new(engine)));
        Self::new(
            registry,
            Duration::from_secs(config.gateway.tool_timeout_secs),
        )
    }

    /// [`for_agent`](Self::for_agent) with a transformer sharing the
    /// engine's generative backend.
    pub fn from_config(
        config: &Config,
        engine: Arc<KnowledgeEngine>,
    ) -> Result<Self, RegistryError> {
        let transformer = Arc::new(TextTransformer::new(engine.generator(), &config.transform));
        Self::for_agent(engine, transformer, config)
    }

    pub fn definitions(&self) -> Vec<ToolInfo> {
        self.registry.definitions()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run a tool, reporting failures as errors.
    pub async fn try_invoke(&self, name: &str, params: Value) -> Result<String, ToolError> {
        let tool = self
            .registry
            .find(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let params = validate_params(&tool.parameters_schema(), &params)?;

        let task = AbortOnDrop::spawn(async move { tool.execute(params).await });
        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => Err(ToolError::Timeout(self.timeout)),
        }
    }

    /// Run a tool. Always yields non-empty text.
    ///
    /// Failures are answered by the tool's own [`Tool::fallback`], so a
    /// timed-out transform still speaks its phrasebook entry.
    pub async fn invoke(&self, name: &str, params: Value) -> String {
        let started = Instant::now();
        match self.try_invoke(name, params.clone()).await {
            Ok(text) if !text.trim().is_empty() => {
                tracing::info!(
                    tool = name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "tool completed"
                );
                text
            }
            Ok(_) => {
                tracing::warn!(tool = name, "tool returned empty text");
                UNAVAILABLE_REPLY.to_string()
            }
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool failed");
                self.fallback(name, &params, &e)
            }
        }
    }

    /// The text a failed call to `name` answers with.
    pub fn fallback(&self, name: &str, params: &Value, error: &ToolError) -> String {
        let text = match self.registry.find(name) {
            Some(tool) => tool.fallback(params, error),
            None => error.reply(name),
        };
        if text.trim().is_empty() {
            UNAVAILABLE_REPLY.to_string()
        } else {
            text
        }
    }

    pub async fn translate_and_spice(&self, text: &str, style: Option<&str>) -> String {
        let mut params = json!({ "text": text });
        if let Some(style) = style {
            params["style"] = json!(style);
        }
        self.invoke(TRANSLATE_AND_SPICE, params).await
    }

    pub async fn get_relationship_wisdom(&self, question: &str) -> String {
        self.invoke(GET_RELATIONSHIP_WISDOM, json!({ "question": question }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "never finishes in time"
        }

        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn execute(&self, _params: Value) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }
    }

    struct Panicky;

    #[async_trait]
    impl Tool for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        fn description(&self) -> &str {
            "panics"
        }

        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn execute(&self, _params: Value) -> Result<String, ToolError> {
            panic!("tool bug")
        }
    }

    fn gateway(timeout: Duration) -> ToolGateway {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Sleepy));
        registry.register(Arc::new(Panicky));
        ToolGateway::new(registry, timeout).unwrap()
    }

    #[tokio::test]
    async fn timeout_becomes_text() {
        let gw = gateway(Duration::from_millis(50));
        assert!(matches!(
            gw.try_invoke("sleepy", json!({})).await,
            Err(ToolError::Timeout(_))
        ));
        assert_eq!(gw.invoke("sleepy", json!({})).await, UNAVAILABLE_REPLY);
    }

    #[tokio::test]
    async fn panic_becomes_text() {
        let gw = gateway(Duration::from_secs(5));
        assert!(matches!(
            gw.try_invoke("panicky", json!({})).await,
            Err(ToolError::Task(_))
        ));
        assert_eq!(gw.invoke("panicky", json!({})).await, UNAVAILABLE_REPLY);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_text() {
        let gw = gateway(Duration::from_secs(5));
        let out = gw.invoke("serenade", json!({})).await;
        assert!(out.contains("serenade"));
    }

    #[test]
    fn invalid_registry_is_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Sleepy));
        registry.register(Arc::new(Sleepy));
        assert!(ToolGateway::new(registry, Duration::from_secs(1)).is_err());
    }
}

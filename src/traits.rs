//! The tool contract and the registry the gateway dispatches from.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                ToolRegistry                  │
//! │  ┌─────────────────────┐ ┌────────────────┐  │
//! │  │ translate_and_spice │ │ get_relation-  │  │
//! │  │  (TextTransformer)  │ │ ship_wisdom    │  │
//! │  │                     │ │ (Knowledge-    │  │
//! │  │                     │ │  Engine)       │  │
//! │  └─────────────────────┘ └────────────────┘  │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//!        ToolGateway::invoke() → voice host / HTTP
//! ```
//!
//! Tools are registered explicitly at startup and the registry is checked
//! with [`ToolRegistry::validate`] before anything is served.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{RegistryError, ToolError};

/// A named operation an agent can discover and call.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
/// use casanova::error::ToolError;
/// use casanova::traits::Tool;
///
/// pub struct PingTool;
///
/// #[async_trait]
/// impl Tool for PingTool {
///     fn name(&self) -> &str { "ping" }
///     fn description(&self) -> &str { "Reply with pong" }
///
///     fn parameters_schema(&self) -> Value {
///         json!({ "type": "object", "properties": {} })
///     }
///
///     async fn execute(&self, _params: Value) -> Result<String, ToolError> {
///         Ok("pong".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores (e.g. `"translate_and_spice"`).
    ///
    /// Used as the route path (`POST /tools/{name}`) and as the function
    /// name the host's model calls.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// OpenAI function-calling JSON Schema for parameters.
    ///
    /// Must be an object schema with `properties` and optionally `required`
    /// and per-property `default`s.
    fn parameters_schema(&self) -> Value;

    /// Execute with parameters already checked by [`validate_params`]
    /// (defaults applied).
    async fn execute(&self, params: Value) -> Result<String, ToolError>;

    /// Text spoken in place of a failed, timed-out or panicked call.
    ///
    /// `params` are the caller's raw parameters, possibly invalid.
    fn fallback(&self, _params: &Value, error: &ToolError) -> String {
        error.reply(self.name())
    }
}

/// Tool definition as listed to hosts.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn definitions(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Check names and schemas of every registered tool.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for tool in &self.tools {
            let name = tool.name();
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            {
                return Err(RegistryError::InvalidName(name.to_string()));
            }
            if !seen.insert(name) {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }
            validate_schema(name, &tool.parameters_schema())?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_schema(tool: &str, schema: &Value) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidSchema {
        tool: tool.to_string(),
        reason: reason.to_string(),
    };

    if schema.get("type").and_then(|t| t.as_str()) != Some("object") {
        return Err(invalid("type must be \"object\""));
    }
    let properties = match schema.get("properties") {
        None => None,
        Some(Value::Object(map)) => Some(map),
        Some(_) => return Err(invalid("properties must be an object")),
    };
    if let Some(required) = schema.get("required") {
        let required = required
            .as_array()
            .ok_or_else(|| invalid("required must be an array"))?;
        for field in required {
            let field = field
                .as_str()
                .ok_or_else(|| invalid("required entries must be strings"))?;
            if !properties.is_some_and(|p| p.contains_key(field)) {
                return Err(invalid(&format!(
                    "required parameter '{}' is not in properties",
                    field
                )));
            }
        }
    }
    Ok(())
}

/// Validate parameters against a tool's schema.
///
/// Checks required fields, JSON types and enums, and fills in schema
/// defaults for absent optional parameters. `null` means no parameters.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value, ToolError> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(ToolError::InvalidParams(format!(
                "parameters must be a JSON object, got {}",
                json_type_name(other)
            )))
        }
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for req_field in &required {
        if !params_obj.contains_key(*req_field) {
            return Err(ToolError::InvalidParams(format!(
                "missing required parameter: {}",
                req_field
            )));
        }
    }

    let mut result = params_obj.clone();

    for (prop_name, prop_schema) in &properties {
        match params_obj.get(prop_name) {
            Some(value) => {
                if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
                    let type_ok = match expected_type {
                        "string" => value.is_string(),
                        "integer" => value.is_i64() || value.is_u64(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        "array" => value.is_array(),
                        "object" => value.is_object(),
                        _ => true,
                    };
                    if !type_ok {
                        return Err(ToolError::InvalidParams(format!(
                            "parameter '{}' must be of type '{}', got {}",
                            prop_name,
                            expected_type,
                            json_type_name(value)
                        )));
                    }
                }

                if let Some(enum_values) = prop_schema.get("enum").and_then(|e| e.as_array()) {
                    if !enum_values.contains(value) {
                        let allowed: Vec<String> =
                            enum_values.iter().map(|v| v.to_string()).collect();
                        return Err(ToolError::InvalidParams(format!(
                            "parameter '{}' must be one of [{}], got {}",
                            prop_name,
                            allowed.join(", "),
                            value
                        )));
                    }
                }
            }
            None => {
                if let Some(default) = prop_schema.get("default") {
                    result.insert(prop_name.clone(), default.clone());
                }
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

//! Error types for every component boundary.
//!
//! Components return these internally. Only the tool gateway turns them into
//! the text a voice host reads back to the user, via [`RagError::reply`] and
//! [`ToolError::reply`].

use std::path::PathBuf;
use std::time::Duration;

use crate::extract::ExtractError;

/// Reply when no knowledge base could be found at setup.
pub const NO_KNOWLEDGE_BASE_REPLY: &str =
    "My vast experience tells me... (No PDF knowledge base loaded, but I shall improvise with passion!)";

/// Reply when retrieval or answer composition failed.
pub const UNAVAILABLE_REPLY: &str =
    "The ancient texts are momentarily unavailable, but my heart knows the answer!";

/// Errors raised by the knowledge index engine.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// Setup finished without a source document or persisted index.
    #[error("no knowledge base is loaded")]
    NoKnowledgeBase,

    /// Setup has not completed (never run, still running, or failed).
    #[error("knowledge base setup has not completed")]
    NotReady,

    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("failed to read source document {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("source document {0} contains no text")]
    EmptySource(PathBuf),

    #[error("embedding service failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("embedding service returned {actual} vectors for {expected} passages")]
    EmbeddingCount { expected: usize, actual: usize },

    #[error("index storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("index storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("persisted index is incompatible: {0}")]
    IncompatibleIndex(String),

    #[error("persisted index is corrupt: {0}")]
    CorruptIndex(String),

    #[error("answer composition failed: {0}")]
    Generation(#[from] LlmError),

    #[error("query task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl RagError {
    /// The fixed user-facing text for this failure.
    pub fn reply(&self) -> &'static str {
        match self {
            RagError::NoKnowledgeBase => NO_KNOWLEDGE_BASE_REPLY,
            _ => UNAVAILABLE_REPLY,
        }
    }
}

/// Errors raised by a generative text service.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("generative service is disabled")]
    Disabled,

    #[error("OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("generative service returned an empty response")]
    EmptyResponse,

    #[error("generative service did not answer within {0:?}")]
    Timeout(Duration),
}

/// Errors raised while executing a tool.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("no tool registered with name: {0}")]
    UnknownTool(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("tool timed out after {0:?}")]
    Timeout(Duration),

    #[error("tool task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ToolError {
    /// In-band text returned to the host in place of a raised error.
    pub fn reply(&self, tool: &str) -> String {
        match self {
            ToolError::UnknownTool(name) => {
                format!("The tool '{}' is not available right now.", name)
            }
            ToolError::InvalidParams(msg) => {
                format!("I could not use {}: {}.", tool, msg)
            }
            ToolError::Timeout(_) | ToolError::Task(_) => UNAVAILABLE_REPLY.to_string(),
        }
    }
}

/// Startup validation failures of the tool registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate tool name: {0}")]
    DuplicateName(String),

    #[error("invalid tool name '{0}': use lowercase letters, digits and underscores")]
    InvalidName(String),

    #[error("tool '{tool}' has an invalid parameter schema: {reason}")]
    InvalidSchema { tool: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_reply_is_the_disclaimer() {
        assert_eq!(RagError::NoKnowledgeBase.reply(), NO_KNOWLEDGE_BASE_REPLY);
    }

    #[test]
    fn service_failures_reply_unavailable() {
        let errors = [
            RagError::NotReady,
            RagError::Generation(LlmError::EmptyResponse),
            RagError::Embedding(anyhow::anyhow!("connection refused")),
            RagError::CorruptIndex("bad blob".to_string()),
        ];
        for e in &errors {
            assert_eq!(e.reply(), UNAVAILABLE_REPLY, "{}", e);
        }
    }

    #[test]
    fn tool_error_replies_are_never_empty() {
        let errors = [
            ToolError::UnknownTool("dance".to_string()),
            ToolError::InvalidParams("missing required parameter: text".to_string()),
            ToolError::Timeout(Duration::from_secs(1)),
        ];
        for e in &errors {
            assert!(!e.reply("translate_and_spice").trim().is_empty());
        }
    }
}

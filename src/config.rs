//! TOML configuration.
//!
//! Every section and key is optional; a missing file yields
//! [`Config::default`]. See `config/casanova.example.toml` for a full example.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub knowledge: KnowledgeConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub transform: TransformConfig,
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Source document the index is built from (PDF, DOCX, Markdown, text).
    pub source_path: PathBuf,
    /// Directory holding the persisted index (`index.sqlite`).
    pub persist_dir: PathBuf,
    pub top_k: usize,
    /// `compact` or `refine`.
    pub response_mode: String,
    /// Character budget of one composition prompt's context block.
    pub context_window_chars: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("./relationship_guide.pdf"),
            persist_dir: PathBuf::from("./storage"),
            top_k: 3,
            response_mode: "compact".to_string(),
            context_window_chars: 12_000,
        }
    }
}

impl KnowledgeConfig {
    pub fn index_path(&self) -> PathBuf {
        self.persist_dir.join("index.sqlite")
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_tokens: 256 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: Some("text-embedding-3-small".to_string()),
            dims: Some(1536),
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
            url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    /// OpenAI-compatible API root; `/chat/completions` is appended.
    pub base_url: String,
    pub answer_temperature: f32,
    pub answer_max_tokens: u32,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            answer_temperature: 0.1,
            answer_max_tokens: 512,
            max_retries: 2,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransformConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub default_style: String,
    /// Bound on one generative call before the phrasebook answers instead.
    pub timeout_secs: u64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_tokens: 150,
            temperature: 0.9,
            default_style: "passionate".to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub tool_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7340".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load and validate a config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let config = Config::default();
        validate(&config)?;
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.knowledge.top_k < 1 {
        anyhow::bail!("knowledge.top_k must be >= 1");
    }

    if config.knowledge.context_window_chars == 0 {
        anyhow::bail!("knowledge.context_window_chars must be > 0");
    }

    if config.transform.timeout_secs == 0 {
        anyhow::bail!("transform.timeout_secs must be > 0");
    }

    if config.gateway.tool_timeout_secs <= config.transform.timeout_secs {
        anyhow::bail!(
            "gateway.tool_timeout_secs ({}) must be greater than transform.timeout_secs ({})",
            config.gateway.tool_timeout_secs,
            config.transform.timeout_secs
        );
    }

    match config.knowledge.response_mode.as_str() {
        "compact" | "refine" => {}
        other => anyhow::bail!(
            "Unknown knowledge.response_mode: '{}'. Must be compact or refine.",
            other
        ),
    }

    for (key, value) in [
        ("llm.answer_temperature", config.llm.answer_temperature),
        ("transform.temperature", config.transform.temperature),
    ] {
        if !(0.0..=2.0).contains(&value) {
            anyhow::bail!("{} must be in [0.0, 2.0]", key);
        }
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" | "hashing" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.provider != "hashing" && config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, hashing, or local.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.knowledge.top_k, 3);
        assert_eq!(config.knowledge.response_mode, "compact");
        assert_eq!(config.transform.max_tokens, 150);
        assert!((config.transform.temperature - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.transform.default_style, "passionate");
        assert_eq!(
            config.knowledge.index_path(),
            PathBuf::from("./storage/index.sqlite")
        );
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse_config(
            r#"
            [knowledge]
            persist_dir = "/tmp/idx"

            [embedding]
            provider = "hashing"
            dims = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.knowledge.persist_dir, PathBuf::from("/tmp/idx"));
        assert_eq!(config.knowledge.top_k, 3);
        assert_eq!(config.embedding.dims, Some(64));
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn rejects_zero_top_k() {
        let err = parse_config("[knowledge]\ntop_k = 0").unwrap_err();
        assert!(err.to_string().contains("top_k"));
    }

    #[test]
    fn rejects_unknown_response_mode() {
        let err = parse_config("[knowledge]\nresponse_mode = \"tree\"").unwrap_err();
        assert!(err.to_string().contains("response_mode"));
    }

    #[test]
    fn rejects_unknown_embedding_provider() {
        let err = parse_config("[embedding]\nprovider = \"magic\"").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let err = parse_config("[transform]\ntemperature = 3.5").unwrap_err();
        assert!(err.to_string().contains("transform.temperature"));
    }

    #[test]
    fn rejects_tool_timeout_within_transform_budget() {
        let err = parse_config("[gateway]\ntool_timeout_secs = 10\n\n[transform]\ntimeout_secs = 10")
            .unwrap_err();
        assert!(err.to_string().contains("gateway.tool_timeout_secs"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Path::new("/nonexistent/casanova.toml")).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:7340");
    }

    #[test]
    fn example_config_parses() {
        let config = parse_config(include_str!("../config/casanova.example.toml")).unwrap();
        assert_eq!(config.embedding.dims, Some(1536));
        assert_eq!(config.gateway.tool_timeout_secs, 20);
        assert_eq!(config.transform.timeout_secs, 15);
    }
}

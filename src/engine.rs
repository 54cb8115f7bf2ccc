//! The knowledge engine: one-time setup plus question answering.
//!
//! A [`KnowledgeEngine`] is created once per process, shared through an
//! `Arc`, and set up exactly once:
//!
//! ```text
//!   Uninitialized ──setup()──▶ SettingUp ──▶ Ready     (index loaded or built)
//!         ▲                        │   └───▶ Degraded  (no index, no source)
//!         └──── failure/cancel ────┘
//! ```
//!
//! `Ready` and `Degraded` are terminal. Concurrent `setup()` callers wait on
//! the single in-flight attempt. A failed or cancelled attempt leaves the
//! engine uninitialized so the next call retries.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::{Config, KnowledgeConfig, LlmConfig};
use crate::embedding::{self, Embedder};
use crate::error::RagError;
use crate::index::{self, KnowledgeIndex};
use crate::llm::{self, TextGenerator};
use crate::query::QueryEngine;
use crate::task::AbortOnDrop;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    SettingUp,
    Ready,
    Degraded,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::SettingUp => "setting_up",
            EngineState::Ready => "ready",
            EngineState::Degraded => "degraded",
        }
    }
}

enum Knowledge {
    Ready(Arc<QueryEngine>),
    Missing,
}

impl Knowledge {
    fn state(&self) -> EngineState {
        match self {
            Knowledge::Ready(_) => EngineState::Ready,
            Knowledge::Missing => EngineState::Degraded,
        }
    }
}

pub struct KnowledgeEngine {
    knowledge_config: KnowledgeConfig,
    llm_config: LlmConfig,
    max_tokens: usize,
    batch_size: usize,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn TextGenerator>,
    knowledge: OnceCell<Knowledge>,
    setting_up: AtomicBool,
    setup_runs: AtomicUsize,
}

/// Clears the in-progress flag even if the setup future is dropped.
struct SettingUpGuard<'a>(&'a AtomicBool);

impl<'a> SettingUpGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for SettingUpGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl KnowledgeEngine {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            knowledge_config: config.knowledge.clone(),
            llm_config: config.llm.clone(),
            max_tokens: config.chunking.max_tokens,
            batch_size: config.embedding.batch_size,
            embedder,
            generator,
            knowledge: OnceCell::new(),
            setting_up: AtomicBool::new(false),
            setup_runs: AtomicUsize::new(0),
        }
    }

    /// Engine wired to the configured embedding and generative backends.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = embedding::create_embedder(&config.embedding)?;
        let generator = llm::create_generator(&config.llm);
        Ok(Self::new(config, embedder, generator))
    }

    pub fn generator(&self) -> Arc<dyn TextGenerator> {
        Arc::clone(&self.generator)
    }

    pub fn index_path(&self) -> PathBuf {
        self.knowledge_config.index_path()
    }

    /// Load or build the index. Idempotent once it succeeds.
    pub async fn setup(&self) -> Result<EngineState, RagError> {
        let knowledge = self
            .knowledge
            .get_or_try_init(|| self.initialize())
            .await?;
        Ok(knowledge.state())
    }

    async fn initialize(&self) -> Result<Knowledge, RagError> {
        let _guard = SettingUpGuard::enter(&self.setting_up);
        self.setup_runs.fetch_add(1, Ordering::SeqCst);

        let index_path = self.knowledge_config.index_path();
        let source = &self.knowledge_config.source_path;

        let has_source = tokio::fs::try_exists(source).await?;

        let persisted = if tokio::fs::try_exists(&index_path).await? {
            tracing::info!(path = %index_path.display(), "loading persisted index");
            match self.load_compatible(&index_path).await {
                Ok(index) => Some(index),
                Err(RagError::IncompatibleIndex(reason)) if has_source => {
                    tracing::warn!(%reason, "persisted index is incompatible, rebuilding from source");
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let index = if let Some(index) = persisted {
            index
        } else if has_source {
            tracing::info!(source = %source.display(), "building index from source document");
            let index = KnowledgeIndex::build(
                source,
                self.max_tokens,
                self.batch_size,
                self.embedder.as_ref(),
            )
            .await?;
            index.persist(&index_path).await?;
            index
        } else {
            tracing::warn!(
                source = %source.display(),
                index = %index_path.display(),
                "no knowledge base found, answers will improvise"
            );
            return Ok(Knowledge::Missing);
        };

        tracing::info!(
            passages = index.len(),
            model = %index.meta().embedding_model,
            "knowledge base ready"
        );

        let engine = QueryEngine::new(
            Arc::new(index),
            Arc::clone(&self.embedder),
            Arc::clone(&self.generator),
            &self.knowledge_config,
            &self.llm_config,
        );
        Ok(Knowledge::Ready(Arc::new(engine)))
    }

    async fn load_compatible(&self, path: &std::path::Path) -> Result<KnowledgeIndex, RagError> {
        let index = KnowledgeIndex::load(path).await?;
        index.check_compatible(self.embedder.as_ref())?;
        Ok(index)
    }

    pub fn state(&self) -> EngineState {
        match self.knowledge.get() {
            Some(knowledge) => knowledge.state(),
            None if self.setting_up.load(Ordering::SeqCst) => EngineState::SettingUp,
            None => EngineState::Uninitialized,
        }
    }

    /// How many setup attempts actually ran (loads or builds, including failures).
    pub fn setup_runs(&self) -> usize {
        self.setup_runs.load(Ordering::SeqCst)
    }

    /// Passages held in memory, once ready.
    pub fn passage_count(&self) -> Option<usize> {
        match self.knowledge.get() {
            Some(Knowledge::Ready(engine)) => Some(engine.index().len()),
            _ => None,
        }
    }

    /// Answer a question from the knowledge base.
    ///
    /// Retrieval and composition run in their own task; dropping the returned
    /// future aborts that task.
    pub async fn query(&self, question: &str) -> Result<String, RagError> {
        let engine = match self.knowledge.get() {
            None => return Err(RagError::NotReady),
            Some(Knowledge::Missing) => return Err(RagError::NoKnowledgeBase),
            Some(Knowledge::Ready(engine)) => Arc::clone(engine),
        };

        let question = question.to_string();
        AbortOnDrop::spawn(async move { engine.query(&question).await }).await?
    }

    /// Delete the persisted index so the next setup rebuilds from the source.
    /// Has no effect on an engine that already completed setup.
    pub async fn remove_persisted_index(&self) -> Result<bool, RagError> {
        index::remove_persisted(&self.knowledge_config.index_path()).await
    }
}

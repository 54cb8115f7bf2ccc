//! Question answering over a [`KnowledgeIndex`].
//!
//! The query engine embeds the question, takes the top-K passages by cosine
//! similarity and composes one answer with the generative service.
//!
//! # Response modes
//!
//! - **compact**: passages are packed, in rank order, into as few context
//!   blocks as fit the character budget. The first block is answered
//!   directly; every later block refines the running answer.
//! - **refine**: same, with exactly one passage per block.

use std::sync::Arc;

use crate::config::{KnowledgeConfig, LlmConfig};
use crate::embedding::{embed_query, Embedder};
use crate::error::{LlmError, RagError};
use crate::index::KnowledgeIndex;
use crate::llm::{CompletionRequest, TextGenerator};
use crate::models::ScoredPassage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Compact,
    Refine,
}

impl ResponseMode {
    /// Unknown names fall back to compact; config validation rejects them earlier.
    pub fn parse(s: &str) -> Self {
        match s {
            "refine" => ResponseMode::Refine,
            _ => ResponseMode::Compact,
        }
    }
}

pub fn qa_prompt(context: &str, question: &str) -> String {
    format!(
        "Context information is below.\n\
         ---------------------\n\
         {context}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {question}\n\
         Answer: "
    )
}

pub fn refine_prompt(question: &str, existing_answer: &str, context: &str) -> String {
    format!(
        "The original query is as follows: {question}\n\
         We have provided an existing answer: {existing_answer}\n\
         We have the opportunity to refine the existing answer (only if needed) \
         with some more context below.\n\
         ------------\n\
         {context}\n\
         ------------\n\
         Given the new context, refine the original answer to better answer the query. \
         If the context isn't useful, return the original answer.\n\
         Refined Answer: "
    )
}

/// Pack passage texts into blocks of at most `budget` chars, preserving order.
/// A passage longer than the budget is cut at a char boundary.
pub fn pack_context(texts: &[&str], budget: usize) -> Vec<String> {
    const SEPARATOR: &str = "\n\n";

    let mut blocks = Vec::new();
    let mut current = String::new();

    for text in texts {
        let text = truncate_chars(text, budget);
        let needed = if current.is_empty() {
            text.len()
        } else {
            current.len() + SEPARATOR.len() + text.len()
        };
        if needed > budget && !current.is_empty() {
            blocks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str(SEPARATOR);
        }
        current.push_str(text);
    }

    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn truncate_chars(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Read-only query accessor with a fixed `top_k` and response mode.
pub struct QueryEngine {
    index: Arc<KnowledgeIndex>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn TextGenerator>,
    top_k: usize,
    mode: ResponseMode,
    context_window_chars: usize,
    temperature: f32,
    max_tokens: u32,
}

impl QueryEngine {
    pub fn new(
        index: Arc<KnowledgeIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn TextGenerator>,
        knowledge: &KnowledgeConfig,
        llm: &LlmConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            generator,
            top_k: knowledge.top_k.max(1),
            mode: ResponseMode::parse(&knowledge.response_mode),
            context_window_chars: knowledge.context_window_chars.max(1),
            temperature: llm.answer_temperature,
            max_tokens: llm.answer_max_tokens,
        }
    }

    pub fn index(&self) -> &KnowledgeIndex {
        &self.index
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    /// The top-K passages for `question`, best first.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredPassage>, RagError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::EmptyQuestion);
        }
        let query_vec = embed_query(self.embedder.as_ref(), question)
            .await
            .map_err(RagError::Embedding)?;
        if query_vec.len() != self.index.meta().dims {
            return Err(RagError::IncompatibleIndex(format!(
                "query vector has {} dims, index has {}",
                query_vec.len(),
                self.index.meta().dims
            )));
        }
        Ok(self.index.top_k(&query_vec, self.top_k))
    }

    /// Retrieve and compose one answer.
    pub async fn query(&self, question: &str) -> Result<String, RagError> {
        let passages = self.retrieve(question).await?;
        tracing::debug!(
            question,
            passages = ?passages.iter().map(|p| p.passage.passage_index).collect::<Vec<_>>(),
            "retrieved passages"
        );
        self.compose(question.trim(), &passages).await
    }

    async fn compose(&self, question: &str, passages: &[ScoredPassage]) -> Result<String, RagError> {
        let texts: Vec<&str> = passages.iter().map(|p| p.passage.text.as_str()).collect();
        let blocks = match self.mode {
            ResponseMode::Compact => pack_context(&texts, self.context_window_chars),
            ResponseMode::Refine => texts
                .iter()
                .map(|t| truncate_chars(t, self.context_window_chars).to_string())
                .collect(),
        };

        let mut answer: Option<String> = None;
        for block in &blocks {
            let prompt = match &answer {
                None => qa_prompt(block, question),
                Some(existing) => refine_prompt(question, existing, block),
            };
            let output = self
                .generator
                .complete(&CompletionRequest {
                    prompt,
                    max_tokens: self.max_tokens,
                    temperature: self.temperature,
                })
                .await?;
            let trimmed = output.trim();
            if !trimmed.is_empty() {
                answer = Some(trimmed.to_string());
            }
        }

        answer.ok_or(RagError::Generation(LlmError::EmptyResponse))
    }
}

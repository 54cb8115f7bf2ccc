//! Core data types of the knowledge index.

use serde::Serialize;

/// A retrievable span of the source document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub id: String,
    /// Position in the source document, contiguous from 0.
    pub passage_index: i64,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A passage selected for a question, with its cosine similarity.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

/// Provenance stored alongside a persisted index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexMeta {
    pub embedding_model: String,
    pub dims: usize,
    pub source_path: String,
    /// SHA-256 of the raw source document bytes.
    pub source_hash: String,
    /// Unix timestamp of the build.
    pub built_at: i64,
}

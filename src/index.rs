//! The in-memory knowledge index and its persisted SQLite form.
//!
//! A [`KnowledgeIndex`] is built once from a source document (extract →
//! chunk → embed) or loaded from `<persist_dir>/index.sqlite`, and is never
//! mutated afterwards. Retrieval is a brute-force cosine scan, which is
//! plenty for a single guidebook.
//!
//! # Persisted layout
//!
//! | Table | Contents |
//! |-------|----------|
//! | `index_meta` | `schema_version`, `embedding_model`, `dims`, `source_path`, `source_hash`, `built_at` |
//! | `passages` | `id`, `passage_index`, `text`, `hash` |
//! | `passage_vectors` | `passage_id`, `embedding` (little-endian `f32` BLOB) |
//!
//! Writes go to `index.sqlite.tmp`, which is renamed over `index.sqlite`
//! only after the transaction commits and the pool closes.

use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::chunk::{chunk_text, sha256_hex};
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::error::RagError;
use crate::extract;
use crate::migrate::{self, SCHEMA_VERSION};
use crate::models::{IndexMeta, Passage, ScoredPassage};

#[derive(Debug, Clone)]
pub struct KnowledgeIndex {
    meta: IndexMeta,
    passages: Vec<Passage>,
    vectors: Vec<Vec<f32>>,
}

impl KnowledgeIndex {
    /// Assemble an index, checking passage/vector alignment.
    pub fn from_parts(
        meta: IndexMeta,
        passages: Vec<Passage>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, RagError> {
        if passages.len() != vectors.len() {
            return Err(RagError::EmbeddingCount {
                expected: passages.len(),
                actual: vectors.len(),
            });
        }
        for (passage, vector) in passages.iter().zip(&vectors) {
            if vector.len() != meta.dims {
                return Err(RagError::CorruptIndex(format!(
                    "passage {} has a {}-dim vector, index declares {}",
                    passage.passage_index,
                    vector.len(),
                    meta.dims
                )));
            }
        }
        Ok(Self {
            meta,
            passages,
            vectors,
        })
    }

    /// Build from a source document: extract text, chunk, embed every passage.
    pub async fn build(
        source: &Path,
        max_tokens: usize,
        batch_size: usize,
        embedder: &dyn Embedder,
    ) -> Result<Self, RagError> {
        let bytes = tokio::fs::read(source)
            .await
            .map_err(|e| RagError::SourceRead {
                path: source.to_path_buf(),
                source: e,
            })?;
        let source_hash = sha256_hex(&bytes);

        let content_type = extract::content_type_for_path(source)
            .unwrap_or(extract::MIME_PDF)
            .to_string();
        let text = tokio::task::spawn_blocking(move || extract::extract_text(&bytes, &content_type))
            .await??;

        let passages = chunk_text(&text, max_tokens);
        if passages.is_empty() {
            return Err(RagError::EmptySource(source.to_path_buf()));
        }
        tracing::info!(
            source = %source.display(),
            passages = passages.len(),
            model = embedder.model_name(),
            "embedding passages"
        );

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size.max(1)) {
            let embedded = embedder.embed(batch).await.map_err(RagError::Embedding)?;
            if embedded.len() != batch.len() {
                return Err(RagError::EmbeddingCount {
                    expected: batch.len(),
                    actual: embedded.len(),
                });
            }
            vectors.extend(embedded);
        }

        if let Some(bad) = vectors.iter().find(|v| v.len() != embedder.dims()) {
            return Err(RagError::Embedding(anyhow::anyhow!(
                "expected {}-dim vectors from {}, got {}",
                embedder.dims(),
                embedder.model_name(),
                bad.len()
            )));
        }

        let meta = IndexMeta {
            embedding_model: embedder.model_name().to_string(),
            dims: embedder.dims(),
            source_path: source.display().to_string(),
            source_hash,
            built_at: chrono::Utc::now().timestamp(),
        };

        Self::from_parts(meta, passages, vectors)
    }

    /// Write the index to `path`, atomically replacing any existing file.
    pub async fn persist(&self, path: &Path) -> Result<(), RagError> {
        let tmp = tmp_path(path);
        remove_if_exists(&tmp).await?;

        let pool = db::connect_writer(&tmp).await?;
        let written = self.write_tables(&pool).await;
        pool.close().await;
        if let Err(e) = written {
            remove_if_exists(&tmp).await?;
            return Err(e);
        }

        tokio::fs::rename(&tmp, path).await?;
        tracing::info!(path = %path.display(), passages = self.len(), "persisted index");
        Ok(())
    }

    async fn write_tables(&self, pool: &SqlitePool) -> Result<(), RagError> {
        migrate::run_migrations(pool).await?;

        let mut tx = pool.begin().await?;

        for (key, value) in meta_entries(&self.meta) {
            sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        for (passage, vector) in self.passages.iter().zip(&self.vectors) {
            sqlx::query(
                "INSERT INTO passages (id, passage_index, text, hash) VALUES (?, ?, ?, ?)",
            )
            .bind(&passage.id)
            .bind(passage.passage_index)
            .bind(&passage.text)
            .bind(&passage.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO passage_vectors (passage_id, embedding) VALUES (?, ?)")
                .bind(&passage.id)
                .bind(vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Load a persisted index.
    pub async fn load(path: &Path) -> Result<Self, RagError> {
        let pool = db::connect_reader(path).await?;
        let loaded = Self::read_tables(&pool).await;
        pool.close().await;
        loaded
    }

    async fn read_tables(pool: &SqlitePool) -> Result<Self, RagError> {
        let meta = read_meta_from(pool).await?;

        let rows = sqlx::query(
            r#"
            SELECT p.id, p.passage_index, p.text, p.hash, v.embedding
            FROM passages p
            LEFT JOIN passage_vectors v ON v.passage_id = p.id
            ORDER BY p.passage_index ASC
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut passages = Vec::with_capacity(rows.len());
        let mut vectors = Vec::with_capacity(rows.len());

        for (expected_index, row) in rows.iter().enumerate() {
            let passage = Passage {
                id: row.try_get("id")?,
                passage_index: row.try_get("passage_index")?,
                text: row.try_get("text")?,
                hash: row.try_get("hash")?,
            };
            if passage.passage_index != expected_index as i64 {
                return Err(RagError::CorruptIndex(format!(
                    "passage indices are not contiguous at {}",
                    expected_index
                )));
            }
            let blob: Option<Vec<u8>> = row.try_get("embedding")?;
            let blob = blob.ok_or_else(|| {
                RagError::CorruptIndex(format!(
                    "passage {} has no vector",
                    passage.passage_index
                ))
            })?;
            if blob.len() % 4 != 0 {
                return Err(RagError::CorruptIndex(format!(
                    "passage {} has a truncated vector",
                    passage.passage_index
                )));
            }
            vectors.push(blob_to_vec(&blob));
            passages.push(passage);
        }

        if passages.is_empty() {
            return Err(RagError::CorruptIndex("index has no passages".to_string()));
        }

        Self::from_parts(meta, passages, vectors)
    }

    /// Reject an index whose vectors came from a different embedding model.
    pub fn check_compatible(&self, embedder: &dyn Embedder) -> Result<(), RagError> {
        if self.meta.embedding_model != embedder.model_name() || self.meta.dims != embedder.dims()
        {
            return Err(RagError::IncompatibleIndex(format!(
                "built with {} ({} dims), configured embedder is {} ({} dims)",
                self.meta.embedding_model,
                self.meta.dims,
                embedder.model_name(),
                embedder.dims()
            )));
        }
        Ok(())
    }

    /// The `k` passages most similar to `query`, best first.
    /// Equal scores keep document order.
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<ScoredPassage> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| self.passages[a.0].passage_index.cmp(&self.passages[b.0].passage_index))
        });

        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| ScoredPassage {
                passage: self.passages[i].clone(),
                score,
            })
            .collect()
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

/// Provenance of a persisted index, or `None` if no index file exists.
pub async fn read_persisted_meta(path: &Path) -> Result<Option<(IndexMeta, i64)>, RagError> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }
    let pool = db::connect_reader(path).await?;
    let result = async {
        let meta = read_meta_from(&pool).await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM passages")
            .fetch_one(&pool)
            .await?;
        Ok::<_, RagError>((meta, count))
    }
    .await;
    pool.close().await;
    result.map(Some)
}

/// Delete a persisted index and any leftover temporary file.
pub async fn remove_persisted(path: &Path) -> Result<bool, RagError> {
    remove_if_exists(&tmp_path(path)).await?;
    remove_if_exists(path).await
}

async fn read_meta_from(pool: &SqlitePool) -> Result<IndexMeta, RagError> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM index_meta")
        .fetch_all(pool)
        .await?;
    let map: HashMap<String, String> = rows.into_iter().collect();

    let get = |key: &str| {
        map.get(key)
            .cloned()
            .ok_or_else(|| RagError::CorruptIndex(format!("missing metadata key '{}'", key)))
    };
    let parse_int = |key: &str| {
        get(key)?
            .parse::<i64>()
            .map_err(|_| RagError::CorruptIndex(format!("metadata key '{}' is not a number", key)))
    };

    let version = parse_int("schema_version")?;
    if version != SCHEMA_VERSION {
        return Err(RagError::IncompatibleIndex(format!(
            "schema version {} (expected {})",
            version, SCHEMA_VERSION
        )));
    }

    let dims = parse_int("dims")?;
    if dims <= 0 {
        return Err(RagError::CorruptIndex(format!("invalid dims {}", dims)));
    }

    Ok(IndexMeta {
        embedding_model: get("embedding_model")?,
        dims: dims as usize,
        source_path: get("source_path")?,
        source_hash: get("source_hash")?,
        built_at: parse_int("built_at")?,
    })
}

fn meta_entries(meta: &IndexMeta) -> [(&'static str, String); 5] {
    [
        ("embedding_model", meta.embedding_model.clone()),
        ("dims", meta.dims.to_string()),
        ("source_path", meta.source_path.clone()),
        ("source_hash", meta.source_hash.clone()),
        ("built_at", meta.built_at.to_string()),
    ]
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

async fn remove_if_exists(path: &Path) -> Result<bool, RagError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

use crate::embeddings::{EmbeddingModel, ModelFingerprint};
use crate::error::{Result, VectorStoreError};
use rag_doc_chunks::DocumentChunk;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const INDEX_SCHEMA_VERSION: u32 = 1;

const INDEX_FILE_NAME: &str = "index.json";

/// A chunk stored together with its embedding vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub id: String,
    pub chunk: DocumentChunk,
    pub vector: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    schema_version: u32,
    fingerprint: ModelFingerprint,
    entries: Vec<IndexedChunk>,
}

/// A single search hit
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: DocumentChunk,
    pub score: f32,
    pub id: String,
}

/// Similarity index over document chunks.
///
/// The manager treats this as an opaque handle with build/save/load entry
/// points; the on-disk layout (a directory holding `index.json`) belongs to
/// this module alone.
pub struct DocumentIndex {
    entries: Vec<IndexedChunk>,
    model: Arc<EmbeddingModel>,
}

impl std::fmt::Debug for DocumentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentIndex")
            .field("entries", &self.entries)
            .field("model", &self.model.fingerprint())
            .finish()
    }
}

impl DocumentIndex {
    /// Build a new index from chunks in a single batch embed call.
    pub async fn build(chunks: Vec<DocumentChunk>, model: Arc<EmbeddingModel>) -> Result<Self> {
        log::info!("Embedding {} chunks", chunks.len());

        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let vectors = model.embed_batch(contents).await?;

        let mut entries = Vec::with_capacity(chunks.len());
        for (ordinal, (chunk, vector)) in chunks.into_iter().zip(vectors.into_iter()).enumerate() {
            ensure_dimension(&vector, model.dimension())?;
            let id = chunk_id(&chunk, ordinal);
            entries.push(IndexedChunk { id, chunk, vector });
        }

        Ok(Self { entries, model })
    }

    /// Persist the index under `dir`, creating the directory (and any missing
    /// parents) as needed. Overwrites an existing index: last write wins.
    pub async fn save_local(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;

        let persisted = PersistedIndex {
            schema_version: INDEX_SCHEMA_VERSION,
            fingerprint: self.model.fingerprint().clone(),
            entries: self.entries.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&persisted)?;

        // Temp-file + rename so a crash mid-write never leaves a torn index.
        let path = dir.join(INDEX_FILE_NAME);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        log::info!("Saved {} chunks to {}", self.entries.len(), path.display());
        Ok(())
    }

    /// Load a persisted index from `dir`.
    ///
    /// `allow_untrusted` is an explicit trust decision: the persisted data is
    /// deserialized wholesale, validated only by the schema marker and the
    /// embedding fingerprint. Refuses to read anything when it is false.
    pub async fn load_local(
        dir: impl AsRef<Path>,
        model: Arc<EmbeddingModel>,
        allow_untrusted: bool,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        if !allow_untrusted {
            return Err(VectorStoreError::UntrustedStore(dir.to_path_buf()));
        }

        let path = dir.join(INDEX_FILE_NAME);
        let bytes = tokio::fs::read(&path).await?;
        let persisted: PersistedIndex = serde_json::from_slice(&bytes)?;

        if persisted.schema_version != INDEX_SCHEMA_VERSION {
            return Err(VectorStoreError::SchemaVersion {
                found: persisted.schema_version,
                expected: INDEX_SCHEMA_VERSION,
            });
        }
        if persisted.fingerprint != *model.fingerprint() {
            return Err(VectorStoreError::ModelMismatch {
                stored: persisted.fingerprint.to_string(),
                current: model.fingerprint().to_string(),
            });
        }
        for entry in &persisted.entries {
            ensure_dimension(&entry.vector, model.dimension())?;
        }

        log::info!(
            "Loaded {} chunks from {}",
            persisted.entries.len(),
            path.display()
        );

        Ok(Self {
            entries: persisted.entries,
            model,
        })
    }

    /// Search for the `limit` most similar chunks to `query`.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        log::debug!("Searching for '{}' (limit {})", query, limit);

        let query_vector = self.model.embed(query).await?;

        let mut results: Vec<SearchResult> = self
            .entries
            .iter()
            .map(|entry| SearchResult {
                chunk: entry.chunk.clone(),
                score: EmbeddingModel::cosine_similarity(&query_vector, &entry.vector),
                id: entry.id.clone(),
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);

        log::debug!("Found {} results", results.len());
        Ok(results)
    }

    /// Get an entry by its id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&IndexedChunk> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// All entry ids, in insertion order
    #[must_use]
    pub fn chunk_ids(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.id.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn chunk_id(chunk: &DocumentChunk, ordinal: usize) -> String {
    format!("{}:{}:{}", chunk.source, chunk.page.unwrap_or(0), ordinal)
}

const fn ensure_dimension(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(VectorStoreError::InvalidDimension {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

use crate::config::StoreConfig;
use crate::error::{Result, VectorStoreError};
use crate::index::DocumentIndex;
use crate::model_cache::ModelCache;
use rag_doc_chunks::DocumentChunk;
use std::path::Path;
use std::sync::Arc;

/// Decides whether to load or construct the similarity index and mediates
/// all persistence through one error-handling policy.
///
/// Core operations return typed errors so callers can branch on cause; the
/// `*_or_log` adapters keep the older "log and hand back nothing" contract
/// for call sites that only care about presence.
pub struct VectorStoreManager {
    config: StoreConfig,
    models: Arc<ModelCache>,
}

impl VectorStoreManager {
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        let models = Arc::new(ModelCache::new(config.embedding.clone()));
        Self { config, models }
    }

    /// Manager configured entirely from the environment
    /// (`RAG_STORE_DIR`, `RAG_EMBEDDING_*`).
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(StoreConfig::from_env()?))
    }

    /// Manager over the stub embedding backend, rooted at `store_dir`.
    /// Intended for tests and offline runs.
    #[must_use]
    pub fn new_stub(store_dir: impl AsRef<Path>) -> Self {
        let config = StoreConfig {
            store_dir: store_dir.as_ref().to_path_buf(),
            allow_untrusted: true,
            embedding: crate::config::EmbeddingConfig::stub(),
        };
        Self::new(config)
    }

    #[must_use]
    pub fn store_dir(&self) -> &Path {
        &self.config.store_dir
    }

    /// Whether a persisted store exists at the configured location
    #[must_use]
    pub fn store_exists(&self) -> bool {
        self.config.store_dir.exists()
    }

    /// Load the existing vector store from disk.
    pub async fn load(&self) -> Result<DocumentIndex> {
        if !self.store_exists() {
            log::warn!(
                "No vector store found at {}",
                self.config.store_dir.display()
            );
            return Err(VectorStoreError::StoreNotFound(
                self.config.store_dir.clone(),
            ));
        }

        log::info!(
            "Loading existing vector store from {}",
            self.config.store_dir.display()
        );
        let model = self.models.get_or_load()?;
        let index = DocumentIndex::load_local(
            &self.config.store_dir,
            model,
            self.config.allow_untrusted,
        )
        .await?;

        log::info!("Vector store loaded ({} chunks)", index.len());
        Ok(index)
    }

    /// Build a new vector store from `chunks` and persist it, overwriting
    /// any store already at the configured location.
    pub async fn save(&self, chunks: Vec<DocumentChunk>) -> Result<DocumentIndex> {
        if chunks.is_empty() {
            return Err(VectorStoreError::EmptyChunkSet);
        }

        log::info!("Building new vector store from {} chunks", chunks.len());
        let model = self.models.get_or_load()?;
        let index = DocumentIndex::build(chunks, model).await?;

        index.save_local(&self.config.store_dir).await?;
        log::info!("Vector store saved successfully");
        Ok(index)
    }

    /// Load the store if one exists on disk, otherwise build it from
    /// `chunks`.
    ///
    /// On-disk state wins: when a store exists, supplied chunks are ignored
    /// rather than merged or compared.
    pub async fn load_or_build(
        &self,
        chunks: Option<Vec<DocumentChunk>>,
    ) -> Result<DocumentIndex> {
        if self.store_exists() {
            return self.load().await;
        }

        match chunks {
            Some(chunks) => self.save(chunks).await,
            None => Err(VectorStoreError::MissingChunks),
        }
    }

    /// Absent-result adapter over [`Self::load`]: wraps and logs any failure
    /// at error level, returning `None` instead of propagating.
    pub async fn load_or_log(&self) -> Option<DocumentIndex> {
        match self.load().await {
            Ok(index) => Some(index),
            Err(err) => {
                log::error!("Failed to load vector store: {err}");
                None
            }
        }
    }

    /// Absent-result adapter over [`Self::save`].
    pub async fn save_or_log(&self, chunks: Vec<DocumentChunk>) -> Option<DocumentIndex> {
        match self.save(chunks).await {
            Ok(index) => Some(index),
            Err(err) => {
                log::error!("Failed to create new vector store: {err}");
                None
            }
        }
    }

    /// Absent-result adapter over [`Self::load_or_build`].
    pub async fn load_or_build_or_log(
        &self,
        chunks: Option<Vec<DocumentChunk>>,
    ) -> Option<DocumentIndex> {
        match self.load_or_build(chunks).await {
            Ok(index) => Some(index),
            Err(err) => {
                log::error!("Failed to load or build vector store: {err}");
                None
            }
        }
    }
}

use crate::error::{Result, VectorStoreError};
use std::path::{Path, PathBuf};

/// Default storage location for the serialized index, relative to the
/// working directory. Matches the layout the chatbot pipeline expects.
pub const DEFAULT_STORE_DIR: &str = "vectorstore/db_faiss";

const DEFAULT_MODEL_DIR: &str = "models";
const DEFAULT_MODEL_ID: &str = "bge-small";

/// Which embedding backend to run
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EmbeddingMode {
    /// ONNX Runtime inference with a local model
    Fast,
    /// Deterministic hash-seeded vectors (tests, offline runs)
    Stub,
}

impl EmbeddingMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "stub" => Ok(Self::Stub),
            other => Err(VectorStoreError::Embedding(format!(
                "Unsupported embedding mode '{other}' (expected 'fast' or 'stub')"
            ))),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Stub => "stub",
        }
    }
}

/// Embedding backend configuration
#[derive(Clone, Debug)]
pub struct EmbeddingConfig {
    pub mode: EmbeddingMode,
    pub model_id: String,
    pub model_dir: PathBuf,
}

impl EmbeddingConfig {
    /// Read configuration from `RAG_EMBEDDING_MODE`, `RAG_EMBEDDING_MODEL`
    /// and `RAG_MODEL_DIR`.
    pub fn from_env() -> Result<Self> {
        let mode = match std::env::var("RAG_EMBEDDING_MODE") {
            Ok(raw) => EmbeddingMode::parse(&raw)?,
            Err(_) => EmbeddingMode::Fast,
        };
        let model_id = std::env::var("RAG_EMBEDDING_MODEL")
            .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());
        let model_dir = std::env::var("RAG_MODEL_DIR")
            .map_or_else(|_| PathBuf::from(DEFAULT_MODEL_DIR), PathBuf::from);
        Ok(Self {
            mode,
            model_id,
            model_dir,
        })
    }

    /// Stub-backend configuration with the default model identity
    #[must_use]
    pub fn stub() -> Self {
        Self {
            mode: EmbeddingMode::Stub,
            model_id: DEFAULT_MODEL_ID.to_string(),
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
        }
    }
}

/// Configuration for the vector store manager
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Directory holding the serialized index
    pub store_dir: PathBuf,

    /// Permit deserializing persisted index data. The on-disk format is not
    /// sandboxed or validated beyond a schema marker; only enable this for
    /// storage locations you trust.
    pub allow_untrusted: bool,

    /// Embedding backend used for both build and load
    pub embedding: EmbeddingConfig,
}

impl StoreConfig {
    /// Configuration rooted at an explicit storage directory, with the
    /// embedding backend taken from the environment.
    pub fn new(store_dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            store_dir: store_dir.as_ref().to_path_buf(),
            allow_untrusted: true,
            embedding: EmbeddingConfig::from_env()?,
        })
    }

    /// Read the storage directory from `RAG_STORE_DIR`, falling back to
    /// [`DEFAULT_STORE_DIR`].
    pub fn from_env() -> Result<Self> {
        let store_dir = std::env::var("RAG_STORE_DIR")
            .map_or_else(|_| PathBuf::from(DEFAULT_STORE_DIR), PathBuf::from);
        Self::new(store_dir)
    }

    /// Builder: disable loading of persisted index data
    #[must_use]
    pub const fn deny_untrusted(mut self) -> Self {
        self.allow_untrusted = false;
        self
    }

    /// Builder: override the embedding configuration
    #[must_use]
    pub fn embedding(mut self, embedding: EmbeddingConfig) -> Self {
        self.embedding = embedding;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_mode_parses_known_values() {
        assert_eq!(EmbeddingMode::parse("fast").unwrap(), EmbeddingMode::Fast);
        assert_eq!(EmbeddingMode::parse("STUB").unwrap(), EmbeddingMode::Stub);
        assert_eq!(EmbeddingMode::parse(" stub ").unwrap(), EmbeddingMode::Stub);
    }

    #[test]
    fn embedding_mode_rejects_unknown_values() {
        let err = EmbeddingMode::parse("gpu").unwrap_err();
        assert!(err.to_string().contains("Unsupported embedding mode"));
    }

    #[test]
    fn store_config_builders() {
        let config = StoreConfig {
            store_dir: PathBuf::from("/tmp/store"),
            allow_untrusted: true,
            embedding: EmbeddingConfig::stub(),
        }
        .deny_untrusted();
        assert!(!config.allow_untrusted);
        assert_eq!(config.embedding.mode, EmbeddingMode::Stub);
    }
}

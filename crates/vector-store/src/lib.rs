//! # RAG Vector Store
//!
//! Persistence layer for the similarity index of a retrieval-augmented
//! chatbot: load an existing on-disk index, build-and-save a new one from
//! document chunks, or dispatch between the two.
//!
//! ## Architecture
//!
//! ```text
//! DocumentChunk[]
//!     │
//!     ├──> EmbeddingModel (ONNX Runtime, memoized per process)
//!     │      └─> Vector[384/768/1024]
//!     │
//!     └──> DocumentIndex
//!            ├─> Cosine top-k search
//!            └─> Persistent storage (schema-versioned JSON, fingerprinted)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use rag_vector_store::{StoreConfig, VectorStoreManager};
//! use rag_doc_chunks::{ChunkMetadata, DocumentChunk};
//!
//! #[tokio::main]
//! async fn main() -> rag_vector_store::Result<()> {
//!     let manager = VectorStoreManager::new(StoreConfig::from_env()?);
//!
//!     let chunks = vec![/* DocumentChunk instances from the loader stage */];
//!     let index = manager.load_or_build(Some(chunks)).await?;
//!
//!     for result in index.search("treatment for influenza", 5).await? {
//!         println!("{}: {:.3}", result.id, result.score);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Trust boundary
//!
//! Loading deserializes the persisted index wholesale, validated only by a
//! schema marker and the embedding fingerprint. Only load storage locations
//! you trust, or disable loading with [`StoreConfig::deny_untrusted`].

mod config;
mod embeddings;
mod error;
mod index;
mod manager;
mod model_cache;

pub use config::{EmbeddingConfig, EmbeddingMode, StoreConfig, DEFAULT_STORE_DIR};
pub use embeddings::{EmbeddingModel, ModelFingerprint};
pub use error::{Result, VectorStoreError};
pub use index::{DocumentIndex, IndexedChunk, SearchResult, INDEX_SCHEMA_VERSION};
pub use manager::VectorStoreManager;
pub use model_cache::ModelCache;

// Re-export chunk types for convenience
pub use rag_doc_chunks::{ChunkMetadata, DocumentChunk};

//! # RAG Document Chunks
//!
//! Shared chunk types for the retrieval pipeline.
//!
//! Loading and splitting source documents into chunks happens in an external
//! stage; this crate only defines the types that stage produces and the
//! vector store consumes.

mod types;

pub use types::{ChunkMetadata, DocumentChunk};

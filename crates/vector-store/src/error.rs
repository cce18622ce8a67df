use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("No vector store found at {}", .0.display())]
    StoreNotFound(PathBuf),

    #[error("No chunks were provided to build the vector store")]
    EmptyChunkSet,

    #[error("Vector store missing and no chunks provided to build it")]
    MissingChunks,

    #[error("Refusing to deserialize vector store at {}: untrusted stores are disabled", .0.display())]
    UntrustedStore(PathBuf),

    #[error("Unsupported vector store schema_version {found} (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("Vector store was built with embedding '{stored}' but the current embedding is '{current}'")]
    ModelMismatch { stored: String, current: String },

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

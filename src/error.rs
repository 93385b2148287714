//! Error types for MemoryMesh

use thiserror::Error;

/// Result type alias for MemoryMesh operations
pub type Result<T> = std::result::Result<T, MeshError>;

/// Main error type for MemoryMesh
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No project store configured for this mesh")]
    NoProjectStore,

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("Store capacity exceeded ({limit} memories)")]
    CapacityExceeded { limit: usize },

    #[error("Schema mismatch: database is at version {found}, engine supports up to {supported}")]
    SchemaMismatch { found: i64, supported: i64 },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(feature = "http-embeddings")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(not(feature = "http-embeddings"))]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeshError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, MeshError::Database(_) | MeshError::Io(_) | MeshError::Http(_))
    }
}

//! MemoryMesh - persistent memory engine for LLM applications
//!
//! Accepts free-form text memories with metadata, stores them durably
//! on disk, and retrieves them later by natural-language query ranked
//! by a composite relevance function (semantic similarity, recency,
//! importance, access frequency) with time-based decay.

pub mod categorize;
pub mod config;
pub mod contradiction;
pub mod embedding;
pub mod encryption;
pub mod error;
pub mod importance;
pub mod orchestrator;
pub mod privacy;
pub mod relevance;
pub mod storage;
pub mod subject;
pub mod types;

pub use config::MeshConfig;
pub use error::{MeshError, Result};
pub use orchestrator::MeshOrchestrator;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

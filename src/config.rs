//! Construction-time configuration for a memory mesh.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::relevance::RelevanceWeights;

/// Which embedding provider to construct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum EmbeddingProviderConfig {
    /// No embeddings; relevance falls back to keyword overlap only.
    None,
    /// Deterministic, in-process, feature-hashed local embedder.
    Local { dimensions: usize },
    /// External OpenAI-compatible embeddings endpoint.
    ExternalHttp {
        endpoint: String,
        api_key: Option<String>,
        model: String,
        dimensions: usize,
    },
}

impl Default for EmbeddingProviderConfig {
    fn default() -> Self {
        EmbeddingProviderConfig::Local { dimensions: 256 }
    }
}

/// Optional at-rest encryption configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EncryptionConfig {
    /// When set, the `text` and `metadata` columns are encrypted at rest
    /// using a key derived from this passphrase.
    pub passphrase: Option<String>,
}

/// Top-level configuration for a `MeshOrchestrator`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Path to the project-scoped store. `None` disables project-scoped
    /// memories; project-scope writes then fail with `NoProjectStore`.
    pub project_path: Option<PathBuf>,
    /// Path to the global-scoped store. Always required.
    pub global_path: PathBuf,
    #[serde(default)]
    pub embedding: EmbeddingProviderConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub relevance_weights: RelevanceWeights,
    /// Horizon, in days, used by the recency decay component:
    /// `exp(-age_days / recency_horizon_days)`.
    #[serde(default = "default_recency_horizon_days")]
    pub recency_horizon_days: f32,
    /// Access counts above this value no longer add to the frequency
    /// component of the relevance score.
    #[serde(default = "default_frequency_cap")]
    pub frequency_cap: u64,
    /// Maximum number of memories a single store will hold.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Cosine-similarity threshold above which two memories are
    /// considered near-duplicates during compaction.
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f32,
    /// Cosine-similarity threshold above which a new memory is checked
    /// for contradictions against the target store on `remember`.
    #[serde(default = "default_contradiction_threshold")]
    pub contradiction_threshold: f32,
}

fn default_recency_horizon_days() -> f32 {
    30.0
}

fn default_frequency_cap() -> u64 {
    100
}

fn default_capacity() -> usize {
    100_000
}

fn default_duplicate_threshold() -> f32 {
    0.92
}

fn default_contradiction_threshold() -> f32 {
    crate::contradiction::T_CONTRADICT
}

impl MeshConfig {
    /// A configuration with only a global store, a local deterministic
    /// embedder, and no encryption. Convenient for tests and embedding
    /// into applications that do not need project-scoped memories.
    pub fn global_only(global_path: impl Into<PathBuf>) -> Self {
        Self {
            project_path: None,
            global_path: global_path.into(),
            embedding: EmbeddingProviderConfig::default(),
            encryption: EncryptionConfig::default(),
            relevance_weights: RelevanceWeights::default(),
            recency_horizon_days: default_recency_horizon_days(),
            frequency_cap: default_frequency_cap(),
            capacity: default_capacity(),
            duplicate_threshold: default_duplicate_threshold(),
            contradiction_threshold: default_contradiction_threshold(),
        }
    }

    /// The default global store location under the platform's local data
    /// directory (e.g. `~/.local/share/memorymesh/global.db` on Linux),
    /// for hosts that don't want to manage the path themselves.
    pub fn default_global_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("memorymesh")
            .join("global.db")
    }

    /// A configuration rooted at the default global path, with a
    /// project-scoped store at `project_dir/.memorymesh/project.db`.
    pub fn with_project_dir(project_dir: impl Into<PathBuf>) -> Self {
        let project_path = project_dir.into().join(".memorymesh").join("project.db");
        Self {
            project_path: Some(project_path),
            ..Self::global_only(Self::default_global_path())
        }
    }
}

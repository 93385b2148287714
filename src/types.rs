//! Core types for MemoryMesh

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MeshError, Result};

/// Opaque 128-bit identifier for a memory, rendered as 32 lowercase hex
/// characters (no hyphens).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(Uuid);

impl MemoryId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for MemoryId {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(MemoryId)
            .map_err(|e| MeshError::InvalidArgument(format!("invalid memory id '{s}': {e}")))
    }
}

/// Which store a memory lives in. Not persisted as a column: the
/// orchestrator stamps it onto a `Memory` when materialising a row read
/// out of a particular store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Project,
    Global,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Project => write!(f, "project"),
            Scope::Global => write!(f, "global"),
        }
    }
}

/// Fixed, closed set of memory categories. Each category has an implied
/// default scope used by the orchestrator's scope-resolution precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    // Global-scope categories
    Preference,
    Guardrail,
    Mistake,
    Personality,
    Question,
    // Project-scope categories
    Decision,
    Pattern,
    Context,
    SessionSummary,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Preference,
        Category::Guardrail,
        Category::Mistake,
        Category::Personality,
        Category::Question,
        Category::Decision,
        Category::Pattern,
        Category::Context,
        Category::SessionSummary,
    ];

    /// The scope this category is routed to by default, absent an
    /// explicit scope argument or subject-inference override.
    pub fn default_scope(&self) -> Scope {
        match self {
            Category::Preference
            | Category::Guardrail
            | Category::Mistake
            | Category::Personality
            | Category::Question => Scope::Global,
            Category::Decision | Category::Pattern | Category::Context | Category::SessionSummary => {
                Scope::Project
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Preference => "preference",
            Category::Guardrail => "guardrail",
            Category::Mistake => "mistake",
            Category::Personality => "personality",
            Category::Question => "question",
            Category::Decision => "decision",
            Category::Pattern => "pattern",
            Category::Context => "context",
            Category::SessionSummary => "session_summary",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "preference" => Ok(Category::Preference),
            "guardrail" => Ok(Category::Guardrail),
            "mistake" => Ok(Category::Mistake),
            "personality" => Ok(Category::Personality),
            "question" => Ok(Category::Question),
            "decision" => Ok(Category::Decision),
            "pattern" => Ok(Category::Pattern),
            "context" => Ok(Category::Context),
            "session_summary" => Ok(Category::SessionSummary),
            other => Err(MeshError::InvalidArgument(format!("unknown category '{other}'"))),
        }
    }
}

/// Hard limits enforced by the store on every insert/update.
pub const MAX_TEXT_LEN: usize = 100_000;
pub const MAX_METADATA_BYTES: usize = 10_000;
/// Upper bound accepted by `scan_with_embeddings`, independent of the
/// caller-requested limit.
pub const MAX_SCAN_LIMIT: usize = 10_000;

/// A memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier (32 lowercase hex chars, no hyphens)
    pub id: MemoryId,
    /// Free-form text content
    pub text: String,
    /// Arbitrary caller-supplied metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Auto-assigned or caller-supplied category
    pub category: Category,
    /// Dense embedding vector, if one was computed for this memory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Optional session identifier this memory was created under
    #[serde(default)]
    pub session_id: Option<String>,
    /// Base importance score in [0.0, 1.0]
    #[serde(default = "default_importance")]
    pub importance: f32,
    /// Per-memory decay rate applied by the recency/importance components
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f32,
    /// Number of times this memory has been returned by `recall`
    #[serde(default)]
    pub access_count: u64,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last updated (content, metadata, or access bump)
    pub updated_at: DateTime<Utc>,
    /// Which store this memory currently lives in. Not persisted.
    #[serde(skip)]
    pub scope: Scope,
}

fn default_importance() -> f32 {
    0.5
}

fn default_decay_rate() -> f32 {
    0.05
}

/// How `remember` resolves a detected contradiction against the target
/// store. Mirrors the caller-chosen policy rather than any engine-side
/// semantic judgement of "contradiction" vs "affirmation".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnConflictPolicy {
    /// Store normally; if a contradiction is detected, annotate
    /// `metadata.has_contradiction = true` on the new memory.
    KeepBoth,
    /// Overwrite the single most-similar existing memory's text,
    /// importance, and embedding; no new row is created.
    Update,
    /// If a contradiction is detected, store nothing and return `None`.
    Skip,
}

impl Default for OnConflictPolicy {
    fn default() -> Self {
        OnConflictPolicy::KeepBoth
    }
}

/// Input for creating a new memory.
#[derive(Debug, Clone)]
pub struct CreateMemoryInput {
    pub text: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub category: Option<Category>,
    pub scope: Option<Scope>,
    pub session_id: Option<String>,
    pub importance: Option<f32>,
    pub decay_rate: Option<f32>,
    /// Sets `importance = 1.0` and `decay_rate = 0.0` on write, overriding
    /// any explicitly supplied `importance`/`decay_rate`.
    pub pin: bool,
    /// Compute importance via the auto-importance heuristic when
    /// `importance` wasn't supplied explicitly. Forced on by
    /// `auto_categorize`.
    pub auto_importance: bool,
    /// Run auto-categorisation when `category` wasn't supplied explicitly.
    pub auto_categorize: bool,
    /// When a secret is detected in `text`, replace it with `[REDACTED]`
    /// before storing. When `false`, the secret is stored as-is and the
    /// memory's metadata is annotated with a warning instead.
    pub redact: bool,
    /// Policy applied when a contradiction is detected against the
    /// target store (see `MeshOrchestrator::remember`).
    pub on_conflict: OnConflictPolicy,
}

impl Default for CreateMemoryInput {
    fn default() -> Self {
        Self {
            text: String::new(),
            metadata: HashMap::new(),
            category: None,
            scope: None,
            session_id: None,
            importance: None,
            decay_rate: None,
            pin: false,
            auto_importance: true,
            auto_categorize: true,
            redact: false,
            on_conflict: OnConflictPolicy::default(),
        }
    }
}

/// Partial update for an existing memory. `None` fields are left unchanged.
/// `embedding` is double-`Option`al: the outer `None` means "leave the
/// stored embedding alone"; `Some(None)` explicitly clears it (e.g. after
/// a text change the caller can't recompute an embedding for).
#[derive(Debug, Clone, Default)]
pub struct UpdateMemoryInput {
    pub text: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub category: Option<Category>,
    pub importance: Option<f32>,
    pub decay_rate: Option<f32>,
    pub embedding: Option<Option<Vec<f32>>>,
}

/// Field used to order `list` results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    Importance,
    AccessCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Options for listing memories without a relevance ranking pass.
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub limit: usize,
    pub offset: usize,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub category: Option<Category>,
    pub session_id: Option<String>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            sort_by: SortField::UpdatedAt,
            sort_order: SortOrder::Desc,
            category: None,
            session_id: None,
        }
    }
}

/// Options governing a `recall` (relevance-ranked search) call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    pub category: Option<Category>,
    pub session_id: Option<String>,
    pub metadata_filter: HashMap<String, serde_json::Value>,
    pub min_score: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            category: None,
            session_id: None,
            metadata_filter: HashMap::new(),
            min_score: 0.0,
        }
    }
}

/// A scored search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub memory: Memory,
    pub score: f32,
}

/// Summary statistics for a single store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_memories: usize,
    pub total_by_category: HashMap<String, usize>,
    pub schema_version: i64,
    pub db_size_bytes: u64,
}

/// Structured priming context for the start of a new session, grouped
/// into the fixed sections a host surfaces to an assistant rather than a
/// single ranked list. `project_context` and `last_session` are empty
/// (with a note in `warnings`) when no project store is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStart {
    pub user_profile: Vec<Memory>,
    pub guardrails: Vec<Memory>,
    pub common_mistakes: Vec<Memory>,
    pub common_questions: Vec<Memory>,
    pub project_context: Vec<Memory>,
    pub last_session: Vec<Memory>,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_id_roundtrips_through_simple_hex() {
        let id = MemoryId::new();
        let rendered = id.to_string();
        assert_eq!(rendered.len(), 32);
        assert!(rendered.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
        let parsed: MemoryId = rendered.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn category_default_scope_matches_routing_table() {
        assert_eq!(Category::Preference.default_scope(), Scope::Global);
        assert_eq!(Category::Decision.default_scope(), Scope::Project);
    }
}

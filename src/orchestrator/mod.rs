//! The mesh orchestrator: the single façade applications embed.
//!
//! Routes `remember`/`recall`/`forget` and friends across the project and
//! global stores per the scope-resolution precedence (explicit argument >
//! category's implied scope > subject inference, which itself defaults
//! to project on a tie), drives the embedding/importance/categorisation
//! pipeline on write, and runs the relevance engine on read. Grounded on
//! the teacher's top-level
//! `engram::Storage` / MCP tool dispatch shape, generalized from a single
//! store to this crate's dual-store routing table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::categorize::categorize;
use crate::config::MeshConfig;
use crate::contradiction;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{MeshError, Result};
use crate::importance::score_importance;
use crate::privacy;
use crate::relevance::{rank, score, RelevanceQuery};
use crate::storage::{SqliteStore, Store};
use crate::subject::infer_scope;
use crate::types::{
    Category, CreateMemoryInput, ListOptions, Memory, MemoryId, OnConflictPolicy, Scope, SearchOptions,
    SearchResult, SessionStart, UpdateMemoryInput, MAX_SCAN_LIMIT,
};

pub struct MeshOrchestrator {
    project_store: Option<Arc<dyn Store>>,
    global_store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    config: MeshConfig,
}

impl MeshOrchestrator {
    /// Open (creating and migrating if necessary) the stores named by
    /// `config`.
    pub fn open(config: MeshConfig) -> Result<Self> {
        let passphrase = config.encryption.passphrase.as_deref();

        let project_store: Option<Arc<dyn Store>> = match &config.project_path {
            Some(path) => Some(Arc::new(SqliteStore::open(
                path.clone(),
                Scope::Project,
                config.capacity,
                passphrase,
            )?)),
            None => {
                tracing::debug!("no project store configured; project-scope writes will fail");
                None
            }
        };

        let global_store: Arc<dyn Store> = Arc::new(SqliteStore::open(
            config.global_path.clone(),
            Scope::Global,
            config.capacity,
            passphrase,
        )?);

        let embedder = create_embedder(&config.embedding)?;

        Ok(Self {
            project_store,
            global_store,
            embedder,
            config,
        })
    }

    fn store_for(&self, scope: Scope) -> Result<&Arc<dyn Store>> {
        match scope {
            Scope::Global => Ok(&self.global_store),
            Scope::Project => self.project_store.as_ref().ok_or(MeshError::NoProjectStore),
        }
    }

    /// Resolve which store a new memory belongs in: an explicit scope
    /// argument wins, then the category's implied default scope, then
    /// subject inference over the text. When none of those apply and no
    /// project store is configured, subject inference's `Project` default
    /// falls back to `Global` rather than a write that would immediately
    /// fail with `NoProjectStore`.
    fn resolve_scope(&self, input: &CreateMemoryInput, category: Category) -> Scope {
        if let Some(scope) = input.scope {
            return scope;
        }
        if category != Category::Context {
            return category.default_scope();
        }
        match infer_scope(&input.text) {
            Scope::Project if self.project_store.is_none() => Scope::Global,
            scope => scope,
        }
    }

    /// Store a new memory, auto-categorising and auto-scoring importance
    /// when the caller asked for it, scrubbing or flagging embedded
    /// secrets, checking for contradictions against the target store, and
    /// computing its embedding via the configured provider.
    ///
    /// Returns `Ok(None)` when `on_conflict = Skip` and a contradiction
    /// was found: nothing is stored. Returns `Ok(Some(_))` with the
    /// overwritten memory when `on_conflict = Update` finds a match,
    /// or with the newly inserted memory otherwise.
    pub fn remember(&self, input: CreateMemoryInput) -> Result<Option<Memory>> {
        if input.text.trim().is_empty() {
            return Err(MeshError::InvalidArgument("memory text must not be empty".to_string()));
        }

        // auto_categorize implies auto_importance, per the caller-facing
        // contract: a category the engine chose for you comes with an
        // importance score the engine chose for you too.
        let auto_importance = input.auto_importance || input.auto_categorize;

        let category = match input.category {
            Some(c) => c,
            None if input.auto_categorize => categorize(&input.text),
            None => Category::Context,
        };
        let scope = self.resolve_scope(&input, category);

        let mut importance = input.importance.unwrap_or(0.5);
        let mut decay_rate = input.decay_rate.unwrap_or(0.05);
        if input.pin {
            importance = 1.0;
            decay_rate = 0.0;
        } else if input.importance.is_none() && auto_importance {
            importance = score_importance(&input.text);
        }

        let mut text = input.text;
        let mut metadata = input.metadata;
        let secrets = privacy::detect(&text);
        if !secrets.is_empty() {
            let mut kinds: Vec<&str> = secrets.iter().map(|s| s.kind.as_str()).collect();
            kinds.sort_unstable();
            kinds.dedup();
            metadata.insert("detected_secret_types".to_string(), serde_json::json!(kinds));
            if input.redact {
                text = privacy::redact(&text);
            } else {
                metadata.insert("has_secrets_warning".to_string(), serde_json::json!(true));
            }
        }

        let embedding = self.embedder.embed(&text)?;

        let now = Utc::now();
        let mut memory = Memory {
            id: MemoryId::new(),
            text,
            metadata,
            category,
            embedding,
            session_id: input.session_id,
            importance,
            decay_rate,
            access_count: 0,
            created_at: now,
            updated_at: now,
            scope,
        };

        let store = self.store_for(scope)?;

        if let Some(candidate_embedding) = memory.embedding.clone() {
            let existing = store.scan_with_embeddings(MAX_SCAN_LIMIT)?;
            let contradictions =
                contradiction::find_contradictions(&candidate_embedding, &existing, self.config.contradiction_threshold);

            if !contradictions.is_empty() {
                match input.on_conflict {
                    OnConflictPolicy::Skip => return Ok(None),
                    OnConflictPolicy::Update => {
                        let target_id = contradictions[0].existing.id;
                        store.update_fields(
                            target_id,
                            Some(&memory.text),
                            None,
                            None,
                            Some(memory.importance),
                            Some(memory.decay_rate),
                            Some(memory.embedding.as_deref()),
                        )?;
                        return store.get(target_id);
                    }
                    OnConflictPolicy::KeepBoth => {
                        memory.metadata.insert("has_contradiction".to_string(), serde_json::json!(true));
                    }
                }
            }
        }

        store.insert(&memory)?;
        Ok(Some(memory))
    }

    /// Retrieve memories relevant to `query`, blending a vector scan, a
    /// keyword (FTS) scan, and an optional metadata filter scan across
    /// whichever stores are configured, then ranking the deduplicated
    /// union with the relevance engine.
    pub fn recall(&self, query: &str, options: SearchOptions) -> Result<Vec<SearchResult>> {
        let query_embedding = self.embedder.embed(query)?;
        let keywords: Vec<String> = query
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();

        let mut candidates: HashMap<MemoryId, Memory> = HashMap::new();
        let stores: Vec<&Arc<dyn Store>> = std::iter::once(&self.global_store)
            .chain(self.project_store.iter())
            .collect();

        for store in &stores {
            for memory in store.scan_with_embeddings(MAX_SCAN_LIMIT)? {
                candidates.entry(memory.id).or_insert(memory);
            }
            for memory in store.search_by_text(query, options.top_k.max(50))? {
                candidates.entry(memory.id).or_insert(memory);
            }
            if !options.metadata_filter.is_empty() || options.category.is_some() || options.session_id.is_some() {
                for memory in store.search_filtered(&options)? {
                    candidates.entry(memory.id).or_insert(memory);
                }
            }
        }

        let now = Utc::now();
        let relevance_query = RelevanceQuery {
            embedding: query_embedding.as_deref(),
            keywords: &keywords,
            session_id: options.session_id.as_deref(),
            now,
        };

        let scored: Vec<(Memory, f32)> = candidates
            .into_values()
            .filter(|m| options.category.map_or(true, |c| m.category == c))
            .map(|memory| {
                let s = score(
                    &memory,
                    &relevance_query,
                    &self.config.relevance_weights,
                    self.config.recency_horizon_days,
                    self.config.frequency_cap,
                );
                (memory, s)
            })
            .filter(|(_, s)| *s >= options.min_score)
            .collect();

        let ranked = rank(scored);
        let top: Vec<(Memory, f32)> = ranked.into_iter().take(options.top_k).collect();

        let mut results = Vec::with_capacity(top.len());
        for (memory, s) in top {
            self.store_for(memory.scope)?.update_access(memory.id)?;
            results.push(SearchResult { memory, score: s });
        }
        Ok(results)
    }

    /// Delete a single memory, searching the project store then the
    /// global store.
    pub fn forget(&self, id: MemoryId) -> Result<bool> {
        if let Some(project) = &self.project_store {
            if project.delete(id)? {
                return Ok(true);
            }
        }
        self.global_store.delete(id)
    }

    /// Delete every memory in a scope. `None` always defaults to
    /// `Project`, never `Global`: wiping every global, user-wide memory
    /// is destructive enough that a caller must name `Scope::Global`
    /// explicitly rather than get it from an omitted argument. If no
    /// project store is configured, the default resolves to
    /// `NoProjectStore` rather than silently falling back to the global
    /// store.
    pub fn forget_all(&self, scope: Option<Scope>) -> Result<usize> {
        let resolved = scope.unwrap_or(Scope::Project);
        self.store_for(resolved)?.delete_all()
    }

    /// Fetch a single memory by id, checking the project store then the
    /// global store.
    pub fn get(&self, id: MemoryId) -> Result<Option<Memory>> {
        if let Some(project) = &self.project_store {
            if let Some(memory) = project.get(id)? {
                return Ok(Some(memory));
            }
        }
        self.global_store.get(id)
    }

    /// List memories in a given scope (or both, if `scope` is `None`)
    /// without running the relevance engine.
    pub fn list(&self, scope: Option<Scope>, options: ListOptions) -> Result<Vec<Memory>> {
        match scope {
            Some(s) => self.store_for(s)?.list(&options),
            None => {
                let mut all = self.global_store.list(&options)?;
                if let Some(project) = &self.project_store {
                    all.extend(project.list(&options)?);
                }
                Ok(all)
            }
        }
    }

    /// Total memory count across both configured stores.
    pub fn count(&self) -> Result<usize> {
        let mut total = self.global_store.count()?;
        if let Some(project) = &self.project_store {
            total += project.count()?;
        }
        Ok(total)
    }

    /// Memories created within `[start, end]` across both stores.
    pub fn get_time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Memory>> {
        let mut all = self.global_store.time_range(start, end)?;
        if let Some(project) = &self.project_store {
            all.extend(project.time_range(start, end)?);
        }
        Ok(all)
    }

    /// Apply a partial update to an existing memory.
    pub fn update(&self, id: MemoryId, update: UpdateMemoryInput) -> Result<bool> {
        let scope = match self.get(id)? {
            Some(memory) => memory.scope,
            None => return Ok(false),
        };
        self.store_for(scope)?.update_fields(
            id,
            update.text.as_deref(),
            update.metadata.as_ref(),
            update.category,
            update.importance,
            update.decay_rate,
            update.embedding.as_ref().map(|e| e.as_deref()),
        )
    }

    /// All memories tagged with `session_id`, across both stores.
    pub fn get_session(&self, session_id: &str) -> Result<Vec<Memory>> {
        let mut options = ListOptions::default();
        options.session_id = Some(session_id.to_string());
        options.limit = usize::MAX.min(10_000);
        self.list(None, options)
    }

    /// Distinct session identifiers seen across both stores.
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let mut options = ListOptions::default();
        options.limit = usize::MAX.min(100_000);
        let all = self.list(None, options)?;
        let sessions: HashSet<String> = all.into_iter().filter_map(|m| m.session_id).collect();
        let mut sessions: Vec<String> = sessions.into_iter().collect();
        sessions.sort();
        Ok(sessions)
    }

    /// The memories most relevant to kick off a new session, grouped into
    /// the fixed set of sections a host surfaces to prime an assistant:
    /// the user's profile and guardrails (global scope), their common
    /// mistakes and questions (global scope), and the active project's
    /// context and most recent session summary (project scope, empty
    /// with a warning when no project store is configured).
    pub fn session_start(&self) -> Result<SessionStart> {
        let mut warnings = Vec::new();

        let user_profile = self.list_by_categories(Scope::Global, &[Category::Preference, Category::Personality], 20)?;
        let guardrails = self.list_by_categories(Scope::Global, &[Category::Guardrail], 20)?;
        let common_mistakes = self.list_by_categories(Scope::Global, &[Category::Mistake], 20)?;
        let common_questions = self.list_by_categories(Scope::Global, &[Category::Question], 20)?;

        let (project_context, last_session) = if self.project_store.is_some() {
            let context = self.list_by_categories(
                Scope::Project,
                &[Category::Context, Category::Pattern, Category::Decision],
                20,
            )?;
            let last = self.list_by_categories(Scope::Project, &[Category::SessionSummary], 5)?;
            (context, last)
        } else {
            warnings.push("no project store configured; project_context and last_session are empty".to_string());
            (Vec::new(), Vec::new())
        };

        Ok(SessionStart {
            user_profile,
            guardrails,
            common_mistakes,
            common_questions,
            project_context,
            last_session,
            warnings,
        })
    }

    /// List the most recently updated memories across `categories` within
    /// a single store, flattened and re-sorted by `updated_at` descending,
    /// truncated to `limit`.
    fn list_by_categories(&self, scope: Scope, categories: &[Category], limit: usize) -> Result<Vec<Memory>> {
        let store = self.store_for(scope)?;
        let mut all = Vec::new();
        for &category in categories {
            let options = ListOptions {
                limit,
                category: Some(category),
                sort_by: crate::types::SortField::UpdatedAt,
                sort_order: crate::types::SortOrder::Desc,
                ..ListOptions::default()
            };
            all.extend(store.list(&options)?);
        }
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all.truncate(limit);
        Ok(all)
    }

    /// Run contradiction detection and compaction over one store,
    /// merging near-duplicates and persisting the result.
    pub fn compact(&self, scope: Scope) -> Result<usize> {
        let store = self.store_for(scope)?;
        let memories = store.list(&ListOptions {
            limit: self.config.capacity,
            ..ListOptions::default()
        })?;
        let plans = contradiction::plan_compaction(memories, self.config.duplicate_threshold);

        let mut merged_count = 0;
        for plan in plans {
            if plan.absorbed.is_empty() {
                continue;
            }
            for absorbed in &plan.absorbed {
                store.delete(absorbed.id)?;
                merged_count += 1;
                // Fold the absorbed memory's access history into the
                // survivor rather than discarding it.
                for _ in 0..absorbed.access_count {
                    store.update_access(plan.keep.id)?;
                }
            }
            store.update_fields(
                plan.keep.id,
                None,
                Some(&plan.keep.metadata),
                None,
                Some(plan.keep.importance),
                None,
                None,
            )?;
        }
        Ok(merged_count)
    }

    /// Release any resources held by this orchestrator. Per-thread SQLite
    /// connections live in thread-local storage and close themselves
    /// when their owning thread exits; this is a deliberate no-op kept
    /// for API symmetry with hosts that expect an explicit close call.
    pub fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn orchestrator_with_project() -> (MeshOrchestrator, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = MeshConfig {
            project_path: Some(dir.path().join("project.db")),
            ..MeshConfig::global_only(dir.path().join("global.db"))
        };
        (MeshOrchestrator::open(config).unwrap(), dir)
    }

    #[test]
    fn remembering_a_preference_routes_to_global_scope() {
        let (mesh, _dir) = orchestrator_with_project();
        let memory = mesh
            .remember(CreateMemoryInput {
                text: "I prefer tabs over spaces".to_string(),
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        assert_eq!(memory.scope, Scope::Global);
        assert_eq!(memory.category, Category::Preference);
    }

    #[test]
    fn remembering_a_decision_routes_to_project_scope() {
        let (mesh, _dir) = orchestrator_with_project();
        let memory = mesh
            .remember(CreateMemoryInput {
                text: "We decided to use SQLite for local storage".to_string(),
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        assert_eq!(memory.scope, Scope::Project);
    }

    #[test]
    fn remember_without_project_store_fails_for_project_scoped_writes() {
        let dir = tempdir().unwrap();
        let config = MeshConfig::global_only(dir.path().join("global.db"));
        let mesh = MeshOrchestrator::open(config).unwrap();
        let err = mesh
            .remember(CreateMemoryInput {
                text: "anything".to_string(),
                scope: Some(Scope::Project),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, MeshError::NoProjectStore));
    }

    #[test]
    fn inferred_project_scope_falls_back_to_global_without_a_project_store() {
        let dir = tempdir().unwrap();
        let config = MeshConfig::global_only(dir.path().join("global.db"));
        let mesh = MeshOrchestrator::open(config).unwrap();
        // No explicit scope, no routing category, and ambiguous text would
        // infer to project — but there is no project store to write to.
        let memory = mesh
            .remember(CreateMemoryInput {
                text: "the weather is nice today".to_string(),
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        assert_eq!(memory.scope, Scope::Global);
    }

    #[test]
    fn recall_finds_a_previously_remembered_memory() {
        let (mesh, _dir) = orchestrator_with_project();
        mesh.remember(CreateMemoryInput {
            text: "the deploy pipeline runs on every merge to main".to_string(),
            ..Default::default()
        })
        .unwrap();

        let results = mesh.recall("deploy pipeline", SearchOptions::default()).unwrap();
        assert!(!results.is_empty());
        assert!(results[0].memory.text.contains("deploy pipeline"));
    }

    #[test]
    fn forget_removes_a_memory_from_whichever_store_holds_it() {
        let (mesh, _dir) = orchestrator_with_project();
        let memory = mesh
            .remember(CreateMemoryInput {
                text: "I prefer dark mode".to_string(),
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        assert!(mesh.forget(memory.id).unwrap());
        assert!(mesh.get(memory.id).unwrap().is_none());
    }

    #[test]
    fn recall_bumps_access_count_on_returned_memories() {
        let (mesh, _dir) = orchestrator_with_project();
        let memory = mesh
            .remember(CreateMemoryInput {
                text: "remember to rotate the deploy keys every quarter".to_string(),
                ..Default::default()
            })
            .unwrap()
            .unwrap();

        mesh.recall("rotate deploy keys", SearchOptions::default()).unwrap();
        let refetched = mesh.get(memory.id).unwrap().unwrap();
        assert_eq!(refetched.access_count, 1);
    }

    #[test]
    fn pin_sets_importance_to_one_and_decay_rate_to_zero() {
        let (mesh, _dir) = orchestrator_with_project();
        let memory = mesh
            .remember(CreateMemoryInput {
                text: "Rule X must always hold".to_string(),
                pin: true,
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        assert_eq!(memory.importance, 1.0);
        assert_eq!(memory.decay_rate, 0.0);
    }

    #[test]
    fn redact_true_strips_secret_from_stored_text() {
        let (mesh, _dir) = orchestrator_with_project();
        let memory = mesh
            .remember(CreateMemoryInput {
                text: "API key is sk-abcdefghijklmnopqrstuvwxyzABCDEF0123456789".to_string(),
                redact: true,
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        assert_eq!(memory.text, "API key is [REDACTED]");
        assert!(memory.metadata.contains_key("detected_secret_types"));
    }

    #[test]
    fn redact_false_annotates_metadata_but_keeps_secret() {
        let (mesh, _dir) = orchestrator_with_project();
        let memory = mesh
            .remember(CreateMemoryInput {
                text: "API key is sk-abcdefghijklmnopqrstuvwxyzABCDEF0123456789".to_string(),
                redact: false,
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        assert!(memory.text.contains("sk-abcdefghijklmnopqrstuvwxyzABCDEF0123456789"));
        assert_eq!(memory.metadata.get("has_secrets_warning"), Some(&serde_json::json!(true)));
        assert!(memory.metadata.contains_key("detected_secret_types"));
    }

    #[test]
    fn skip_on_conflict_returns_none_without_storing() {
        let dir = tempdir().unwrap();
        let config = MeshConfig {
            embedding: crate::config::EmbeddingProviderConfig::Local { dimensions: 32 },
            ..MeshConfig::global_only(dir.path().join("global.db"))
        };
        let mesh = MeshOrchestrator::open(config).unwrap();
        mesh.remember(CreateMemoryInput {
            text: "Use Postgres for prod".to_string(),
            importance: Some(0.8),
            ..Default::default()
        })
        .unwrap();
        let before = mesh.count().unwrap();

        let result = mesh
            .remember(CreateMemoryInput {
                text: "Use Postgres for prod".to_string(),
                on_conflict: crate::types::OnConflictPolicy::Skip,
                ..Default::default()
            })
            .unwrap();
        assert!(result.is_none());
        assert_eq!(mesh.count().unwrap(), before);
    }

    #[test]
    fn session_start_groups_memories_into_sections_by_category() {
        let (mesh, _dir) = orchestrator_with_project();

        let guardrail = mesh
            .remember(CreateMemoryInput {
                text: "Never force-push to main".to_string(),
                category: Some(Category::Guardrail),
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        let preference = mesh
            .remember(CreateMemoryInput {
                text: "I prefer tabs over spaces".to_string(),
                category: Some(Category::Preference),
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        let decision = mesh
            .remember(CreateMemoryInput {
                text: "We decided to use SQLite".to_string(),
                category: Some(Category::Decision),
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        let summary = mesh
            .remember(CreateMemoryInput {
                text: "Last session we fixed the retry bug".to_string(),
                category: Some(Category::SessionSummary),
                ..Default::default()
            })
            .unwrap()
            .unwrap();

        let start = mesh.session_start().unwrap();
        assert!(start.guardrails.iter().any(|m| m.id == guardrail.id));
        assert!(start.user_profile.iter().any(|m| m.id == preference.id));
        assert!(start.project_context.iter().any(|m| m.id == decision.id));
        assert!(start.last_session.iter().any(|m| m.id == summary.id));
        assert!(start.warnings.is_empty());
    }

    #[test]
    fn session_start_without_a_project_store_warns_and_leaves_project_sections_empty() {
        let dir = tempdir().unwrap();
        let config = MeshConfig::global_only(dir.path().join("global.db"));
        let mesh = MeshOrchestrator::open(config).unwrap();
        mesh.remember(CreateMemoryInput {
            text: "Never skip code review".to_string(),
            category: Some(Category::Guardrail),
            ..Default::default()
        })
        .unwrap();

        let start = mesh.session_start().unwrap();
        assert!(!start.guardrails.is_empty());
        assert!(start.project_context.is_empty());
        assert!(start.last_session.is_empty());
        assert!(!start.warnings.is_empty());
    }
}

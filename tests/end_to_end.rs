//! End-to-end scenarios exercising the full remember/recall/forget
//! lifecycle across the dual-store orchestrator, in the style of the
//! teacher's integration test suite.

use std::collections::HashMap;

use memorymesh::{
    Category, CreateMemoryInput, MeshConfig, MeshOrchestrator, OnConflictPolicy, Scope, SearchOptions,
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn open_mesh_with_project() -> (MeshOrchestrator, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let config = MeshConfig {
        project_path: Some(dir.path().join("project.db")),
        ..MeshConfig::global_only(dir.path().join("global.db"))
    };
    (MeshOrchestrator::open(config).unwrap(), dir)
}

/// Scenario 1: basic round-trip in keyword mode (no embedder).
#[test]
fn basic_round_trip_in_keyword_mode() {
    let dir = tempdir().unwrap();
    let config = MeshConfig {
        embedding: memorymesh::config::EmbeddingProviderConfig::None,
        ..MeshConfig::global_only(dir.path().join("global.db"))
    };
    let mesh = MeshOrchestrator::open(config).unwrap();

    let memory = mesh
        .remember(CreateMemoryInput {
            text: "User prefers Python and dark mode".to_string(),
            ..Default::default()
        })
        .unwrap()
        .unwrap();
    assert_eq!(memory.access_count, 0);

    let results = mesh.recall("What does the user prefer?", SearchOptions::default()).unwrap();
    assert!(results.iter().any(|r| r.memory.id == memory.id));

    let refetched = mesh.get(memory.id).unwrap().unwrap();
    assert_eq!(refetched.access_count, 1);
}

/// Scenario 2: category routing overrides explicit scope, and
/// `forget_all` with the default scope leaves a global guardrail intact.
#[test]
fn category_routing_and_default_scope_forget_all() {
    let (mesh, _dir) = open_mesh_with_project();

    let guardrail = mesh
        .remember(CreateMemoryInput {
            text: "Never auto-commit without running tests first".to_string(),
            category: Some(Category::Guardrail),
            ..Default::default()
        })
        .unwrap()
        .unwrap();
    assert_eq!(guardrail.scope, Scope::Global);

    let decision = mesh
        .remember(CreateMemoryInput {
            text: "Chose SQLite for storage".to_string(),
            category: Some(Category::Decision),
            ..Default::default()
        })
        .unwrap()
        .unwrap();
    assert_eq!(decision.scope, Scope::Project);

    let results = mesh.recall("what rules", SearchOptions::default()).unwrap();
    let found_ids: Vec<_> = results.iter().map(|r| r.memory.id).collect();
    assert!(found_ids.contains(&guardrail.id));
    assert!(found_ids.contains(&decision.id));

    // With a project store configured, `forget_all` with no scope
    // override defaults to clearing the project store only.
    let removed = mesh.forget_all(None).unwrap();
    assert_eq!(removed, 1);
    assert!(mesh.get(decision.id).unwrap().is_none());
    assert!(mesh.get(guardrail.id).unwrap().is_some());
}

/// Scenario 3: a pinned memory's effective importance never decays.
#[test]
fn pin_overrides_decay() {
    let (mesh, _dir) = open_mesh_with_project();

    let memory = mesh
        .remember(CreateMemoryInput {
            text: "Rule X must never be broken".to_string(),
            pin: true,
            ..Default::default()
        })
        .unwrap()
        .unwrap();
    assert_eq!(memory.importance, 1.0);
    assert_eq!(memory.decay_rate, 0.0);

    // Simulate the clock advancing a year: re-derive the effective
    // importance the relevance engine would compute, without mutating
    // stored state (the engine has no "advance real time" hook).
    let now = memory.updated_at + chrono::Duration::days(365);
    let query = memorymesh::relevance::RelevanceQuery {
        embedding: None,
        keywords: &[],
        session_id: None,
        now,
    };
    let weights = memorymesh::relevance::RelevanceWeights::default();
    let score = memorymesh::relevance::score(&memory, &query, &weights, 30.0, 100);
    assert!(score > 0.0);

    let results = mesh.recall("Rule X", SearchOptions::default()).unwrap();
    assert_eq!(results[0].memory.id, memory.id);
}

/// Scenario 4: `on_conflict = "skip"` drops a near-identical memory
/// without storing it.
#[test]
fn contradiction_skip() {
    let dir = tempdir().unwrap();
    let config = MeshConfig {
        embedding: memorymesh::config::EmbeddingProviderConfig::Local { dimensions: 64 },
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
            on_conflict: OnConflictPolicy::Skip,
            ..Default::default()
        })
        .unwrap();
    assert!(result.is_none());
    assert_eq!(mesh.count().unwrap(), before);
}

/// Scenario 5: `redact = true` strips a detected secret before storage.
#[test]
fn secret_redaction() {
    let (mesh, _dir) = open_mesh_with_project();

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
    let stored = mesh.get(memory.id).unwrap().unwrap();
    assert_eq!(stored.text, "API key is [REDACTED]");
}

/// Scenario 6: opening a store stamped at schema v1 upgrades it to the
/// current version in place, preserving existing rows.
#[test]
fn migration_upgrade_from_v1() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("legacy.db");

    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE memories (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                category TEXT NOT NULL,
                embedding_blob BLOB,
                embedding_dim INTEGER,
                importance REAL NOT NULL DEFAULT 0.5,
                decay_rate REAL NOT NULL DEFAULT 0.05,
                access_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE VIRTUAL TABLE memories_fts USING fts5(
                text,
                content='memories',
                content_rowid='rowid'
            );

            CREATE TABLE encryption_salt (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                salt BLOB NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            "#,
        )
        .unwrap();
        conn.execute(
            "INSERT INTO memories (id, text, metadata_json, category, importance, decay_rate, access_count, created_at, updated_at)
             VALUES ('11111111111111111111111111111111', 'a memory from before session_id existed', '{}', 'context', 0.5, 0.05, 0, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
    }

    let config = MeshConfig::global_only(path.clone());
    let mesh = MeshOrchestrator::open(config).unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    let version: i64 = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
        .unwrap();
    assert_eq!(version, memorymesh::storage::migrations::SCHEMA_VERSION);

    let options = memorymesh::ListOptions::default();
    let all = mesh.list(None, options).unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].session_id.is_none());
    assert_eq!(all[0].text, "a memory from before session_id existed");

    let new_memory = mesh
        .remember(CreateMemoryInput {
            text: "a memory created after the upgrade".to_string(),
            session_id: Some("post-migration".to_string()),
            ..Default::default()
        })
        .unwrap()
        .unwrap();
    assert_eq!(new_memory.session_id.as_deref(), Some("post-migration"));
}

#[test]
fn updating_a_memory_changes_its_text_and_bumps_updated_at() {
    let (mesh, _dir) = open_mesh_with_project();
    let memory = mesh
        .remember(CreateMemoryInput {
            text: "draft note".to_string(),
            ..Default::default()
        })
        .unwrap()
        .unwrap();

    let updated = mesh
        .update(
            memory.id,
            memorymesh::UpdateMemoryInput {
                text: Some("finalized note".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(updated);

    let fetched = mesh.get(memory.id).unwrap().unwrap();
    assert_eq!(fetched.text, "finalized note");
    assert!(fetched.updated_at >= memory.updated_at);
}

#[test]
fn encrypted_mesh_round_trips_content_through_a_fresh_open() {
    let dir = tempdir().unwrap();
    let mut config = MeshConfig::global_only(dir.path().join("global.db"));
    config.encryption.passphrase = Some("correct horse battery staple".to_string());

    let memory_id = {
        let mesh = MeshOrchestrator::open(config.clone()).unwrap();
        let memory = mesh
            .remember(CreateMemoryInput {
                text: "the on-call rotation secret handoff note".to_string(),
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        memory.id
    };

    // Re-open against the same passphrase and path: the persisted salt
    // must let the new orchestrator derive the same key.
    let mesh = MeshOrchestrator::open(config).unwrap();
    let fetched = mesh.get(memory_id).unwrap().unwrap();
    assert_eq!(fetched.text, "the on-call rotation secret handoff note");
}

#[test]
fn memory_without_a_project_store_still_serves_global_scope() {
    let dir = tempdir().unwrap();
    let config = MeshConfig::global_only(dir.path().join("global.db"));
    let mesh = MeshOrchestrator::open(config).unwrap();

    let memory = mesh
        .remember(CreateMemoryInput {
            text: "global only fact".to_string(),
            scope: Some(Scope::Global),
            ..Default::default()
        })
        .unwrap()
        .unwrap();
    assert!(mesh.get(memory.id).unwrap().is_some());
}

#[test]
fn metadata_filter_matches_exact_string_value() {
    let (mesh, _dir) = open_mesh_with_project();
    let mut metadata = HashMap::new();
    metadata.insert("ticket".to_string(), serde_json::json!("PROJ-42"));
    mesh.remember(CreateMemoryInput {
        text: "fixed the flaky retry logic".to_string(),
        metadata,
        ..Default::default()
    })
    .unwrap();

    let mut options = SearchOptions::default();
    options.metadata_filter.insert("ticket".to_string(), serde_json::json!("PROJ-42"));
    let results = mesh.recall("retry logic", options).unwrap();
    assert!(!results.is_empty());
}

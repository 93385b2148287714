//! Versioned, additive-only schema migrations for a single store file.
//!
//! Grounded on the teacher's `storage::migrations` module: a
//! `schema_version` table tracking the highest applied version, a
//! sequence of `migrate_vN` functions each guarded by
//! `if current_version < N`, and `execute_batch` for multi-statement DDL.
//! This crate's schema is much smaller than the teacher's (two versions
//! rather than eleven), but keeps the same mechanism so a future version
//! bump follows the established pattern.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version this build knows how to read and write.
pub const SCHEMA_VERSION: i64 = 2;

/// Bring `conn`'s schema up to `SCHEMA_VERSION`. Safe to call on every
/// open: a database already at the current version is a no-op, and an
/// empty database is installed directly at the latest schema in one
/// transaction rather than replaying every historical migration.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    let memories_table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'memories'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .unwrap_or(0)
        > 0;

    if current_version == 0 && !memories_table_exists {
        // Fresh database: install the latest schema directly instead of
        // replaying v1 then v2.
        install_latest_schema(conn)?;
        return Ok(());
    }

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    let final_version: i64 = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    if final_version > SCHEMA_VERSION {
        return Err(crate::error::MeshError::SchemaMismatch {
            found: final_version,
            supported: SCHEMA_VERSION,
        });
    }

    Ok(())
}

fn install_latest_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        BEGIN;

        CREATE TABLE memories (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            category TEXT NOT NULL,
            embedding_blob BLOB,
            embedding_dim INTEGER,
            session_id TEXT,
            importance REAL NOT NULL DEFAULT 0.5,
            decay_rate REAL NOT NULL DEFAULT 0.05,
            access_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX idx_memories_category ON memories(category);
        CREATE INDEX idx_memories_created_at ON memories(created_at);
        CREATE INDEX idx_memories_updated_at ON memories(updated_at);
        CREATE INDEX idx_memories_session_id ON memories(session_id);

        CREATE VIRTUAL TABLE memories_fts USING fts5(
            text,
            content='memories',
            content_rowid='rowid'
        );

        CREATE TRIGGER memories_ai AFTER INSERT ON memories BEGIN
            INSERT INTO memories_fts(rowid, text) VALUES (new.rowid, new.text);
        END;

        CREATE TRIGGER memories_ad AFTER DELETE ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
        END;

        CREATE TRIGGER memories_au AFTER UPDATE ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
            INSERT INTO memories_fts(rowid, text) VALUES (new.rowid, new.text);
        END;

        CREATE TABLE encryption_salt (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            salt BLOB NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (1);
        INSERT INTO schema_version (version) VALUES (2);

        COMMIT;
        "#,
    )?;
    Ok(())
}

/// v1: base schema, no `session_id` column. Present only for databases
/// created before session-scoped recall existed.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        BEGIN;

        CREATE TABLE IF NOT EXISTS memories (
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

        CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category);
        CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at);
        CREATE INDEX IF NOT EXISTS idx_memories_updated_at ON memories(updated_at);

        CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
            text,
            content='memories',
            content_rowid='rowid'
        );

        CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
            INSERT INTO memories_fts(rowid, text) VALUES (new.rowid, new.text);
        END;

        CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
        END;

        CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
            INSERT INTO memories_fts(memories_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
            INSERT INTO memories_fts(rowid, text) VALUES (new.rowid, new.text);
        END;

        CREATE TABLE IF NOT EXISTS encryption_salt (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            salt BLOB NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (1);

        COMMIT;
        "#,
    )?;
    Ok(())
}

/// v2: adds `session_id`, additively. Idempotent: checks
/// `pragma_table_info` before altering, so re-running `run_migrations` on
/// an already-migrated database never fails, mirroring the teacher's
/// v11 defensive-migration pattern.
fn migrate_v2(conn: &Connection) -> Result<()> {
    let has_session_id: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM pragma_table_info('memories') WHERE name = 'session_id'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .unwrap_or(0)
        > 0;

    if !has_session_id {
        conn.execute_batch(
            r#"
            ALTER TABLE memories ADD COLUMN session_id TEXT;
            CREATE INDEX IF NOT EXISTS idx_memories_session_id ON memories(session_id);
            "#,
        )?;
    }

    conn.execute("INSERT INTO schema_version (version) VALUES (2)", [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_memory_db() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn fresh_database_installs_latest_schema_directly() {
        let conn = open_memory_db();
        run_migrations(&conn).unwrap();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        let has_session_id: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('memories') WHERE name = 'session_id'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(has_session_id, 1);
    }

    #[test]
    fn legacy_v1_database_is_upgraded_to_v2() {
        let conn = open_memory_db();
        conn.execute(
            "CREATE TABLE schema_version (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP)",
            [],
        )
        .unwrap();
        migrate_v1(&conn).unwrap();

        run_migrations(&conn).unwrap();

        let has_session_id: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('memories') WHERE name = 'session_id'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(has_session_id, 1);
    }

    #[test]
    fn running_migrations_twice_is_idempotent() {
        let conn = open_memory_db();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}

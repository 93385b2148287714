//! The `Store` trait and its SQLite-backed implementation.
//!
//! Resolves the dual-store duck-typing redesign flag by defining one
//! trait that both the project and global stores implement in full —
//! including `search_filtered` and `update_fields` — rather than the
//! teacher's `StorageBackend` trait plus an encrypted variant that
//! historically lacked both. Grounded on `storage::backend`'s operation
//! set (create/get/update/delete, list/search/count, maintenance) and
//! `storage::queries`'s defensive row-parsing style
//! (`row.get(...).unwrap_or(default)` for forward-compatible columns).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::encryption::EncryptionKey;
use crate::error::{MeshError, Result};
use crate::storage::connection::with_connection;
use crate::storage::filter;
use crate::types::{
    Category, ListOptions, Memory, MemoryId, SearchOptions, SortField, SortOrder, StoreStats, MAX_METADATA_BYTES,
    MAX_SCAN_LIMIT, MAX_TEXT_LEN,
};

/// Operations a memory store must support, implemented identically by
/// every store regardless of whether it is encrypted.
pub trait Store: Send + Sync {
    fn insert(&self, memory: &Memory) -> Result<()>;
    fn get(&self, id: MemoryId) -> Result<Option<Memory>>;
    fn delete(&self, id: MemoryId) -> Result<bool>;
    fn delete_all(&self) -> Result<usize>;
    #[allow(clippy::too_many_arguments)]
    fn update_fields(
        &self,
        id: MemoryId,
        text: Option<&str>,
        metadata: Option<&HashMap<String, serde_json::Value>>,
        category: Option<Category>,
        importance: Option<f32>,
        decay_rate: Option<f32>,
        embedding: Option<Option<&[f32]>>,
    ) -> Result<bool>;
    fn update_access(&self, id: MemoryId) -> Result<bool>;
    fn scan_with_embeddings(&self, limit: usize) -> Result<Vec<Memory>>;
    fn search_by_text(&self, query: &str, limit: usize) -> Result<Vec<Memory>>;
    fn search_filtered(&self, options: &SearchOptions) -> Result<Vec<Memory>>;
    fn count(&self) -> Result<usize>;
    fn time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Memory>>;
    fn list(&self, options: &ListOptions) -> Result<Vec<Memory>>;
    fn stats(&self) -> Result<StoreStats>;
}

/// A single SQLite-backed store (either the project store or the global
/// store). Scope is stamped onto every `Memory` this store returns.
pub struct SqliteStore {
    path: PathBuf,
    scope: crate::types::Scope,
    capacity: usize,
    encryption: Option<EncryptionKey>,
}

impl SqliteStore {
    pub fn open(path: impl Into<PathBuf>, scope: crate::types::Scope, capacity: usize, passphrase: Option<&str>) -> Result<Self> {
        let path = path.into();
        // Touch the connection once up-front so migrations and the salt
        // row exist before the first real operation.
        with_connection(&path, |_conn| Ok(()))?;

        let encryption = match passphrase {
            Some(p) => Some(Self::load_or_create_key(&path, p)?),
            None => None,
        };

        Ok(Self {
            path,
            scope,
            capacity,
            encryption,
        })
    }

    fn load_or_create_key(path: &Path, passphrase: &str) -> Result<EncryptionKey> {
        with_connection(path, |conn| {
            let existing: Option<Vec<u8>> = conn
                .query_row("SELECT salt FROM encryption_salt WHERE id = 1", [], |r| r.get(0))
                .ok();

            let salt: [u8; crate::encryption::SALT_LEN] = match existing {
                Some(bytes) if bytes.len() == crate::encryption::SALT_LEN => {
                    let mut arr = [0u8; crate::encryption::SALT_LEN];
                    arr.copy_from_slice(&bytes);
                    arr
                }
                _ => {
                    let fresh = EncryptionKey::generate_salt();
                    conn.execute(
                        "INSERT OR REPLACE INTO encryption_salt (id, salt) VALUES (1, ?1)",
                        params![fresh.to_vec()],
                    )?;
                    fresh
                }
            };

            Ok(EncryptionKey::derive(passphrase, &salt))
        })
    }

    fn encode_text(&self, plaintext: &str) -> String {
        match &self.encryption {
            Some(key) => hex::encode(key.encrypt(plaintext.as_bytes())),
            None => plaintext.to_string(),
        }
    }

    fn decode_text(&self, stored: &str) -> Result<String> {
        match &self.encryption {
            Some(key) => {
                let bytes = hex::decode(stored)
                    .map_err(|e| MeshError::Encryption(format!("stored text is not valid hex: {e}")))?;
                let plaintext = key.decrypt(&bytes)?;
                String::from_utf8(plaintext)
                    .map_err(|e| MeshError::Encryption(format!("decrypted text is not valid UTF-8: {e}")))
            }
            None => Ok(stored.to_string()),
        }
    }

    fn encode_embedding(embedding: &Option<Vec<f32>>) -> Option<Vec<u8>> {
        embedding.as_ref().map(|v| v.iter().flat_map(|f| f.to_le_bytes()).collect())
    }

    fn decode_embedding(blob: Option<Vec<u8>>) -> Option<Vec<f32>> {
        blob.map(|bytes| {
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        })
    }

    fn row_to_memory(&self, row: &Row<'_>) -> rusqlite::Result<Memory> {
        let id_str: String = row.get("id")?;
        let text_stored: String = row.get("text")?;
        let metadata_stored: String = row.get("metadata_json")?;
        let category_str: String = row.get("category")?;
        let embedding_blob: Option<Vec<u8>> = row.get("embedding_blob")?;
        let session_id: Option<String> = row.get("session_id").unwrap_or(None);
        let importance: f64 = row.get("importance")?;
        let decay_rate: f64 = row.get("decay_rate")?;
        let access_count: i64 = row.get("access_count")?;
        let created_at: DateTime<Utc> = row.get("created_at")?;
        let updated_at: DateTime<Utc> = row.get("updated_at")?;

        let text = self
            .decode_text(&text_stored)
            .unwrap_or_else(|_| "[unreadable: wrong encryption passphrase]".to_string());
        let metadata_json = self.decode_text(&metadata_stored).unwrap_or_else(|_| "{}".to_string());
        let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
        let category = category_str.parse().unwrap_or(Category::Context);

        Ok(Memory {
            id: id_str.parse().map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, "bad memory id".into())
            })?,
            text,
            metadata,
            category,
            embedding: Self::decode_embedding(embedding_blob),
            session_id,
            importance: importance as f32,
            decay_rate: decay_rate as f32,
            access_count: access_count.max(0) as u64,
            created_at,
            updated_at,
            scope: self.scope,
        })
    }
}

impl Store for SqliteStore {
    fn insert(&self, memory: &Memory) -> Result<()> {
        validate_text(&memory.text)?;
        validate_metadata(&memory.metadata)?;
        validate_embedding(memory.embedding.as_deref())?;

        with_connection(&self.path, |conn| {
            let current: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
            if current as usize >= self.capacity {
                return Err(MeshError::CapacityExceeded { limit: self.capacity });
            }

            let metadata_json = serde_json::to_string(&memory.metadata)?;
            conn.execute(
                "INSERT INTO memories (id, text, metadata_json, category, embedding_blob, embedding_dim, session_id, importance, decay_rate, access_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    memory.id.to_string(),
                    self.encode_text(&memory.text),
                    self.encode_text(&metadata_json),
                    memory.category.to_string(),
                    Self::encode_embedding(&memory.embedding),
                    memory.embedding.as_ref().map(|v| v.len() as i64),
                    memory.session_id,
                    memory.importance as f64,
                    memory.decay_rate as f64,
                    memory.access_count as i64,
                    memory.created_at,
                    memory.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    fn get(&self, id: MemoryId) -> Result<Option<Memory>> {
        with_connection(&self.path, |conn| {
            let mut stmt = conn.prepare("SELECT * FROM memories WHERE id = ?1")?;
            let mut rows = stmt.query(params![id.to_string()])?;
            match rows.next()? {
                Some(row) => Ok(Some(self.row_to_memory(row)?)),
                None => Ok(None),
            }
        })
    }

    fn delete(&self, id: MemoryId) -> Result<bool> {
        with_connection(&self.path, |conn| {
            let affected = conn.execute("DELETE FROM memories WHERE id = ?1", params![id.to_string()])?;
            Ok(affected > 0)
        })
    }

    fn delete_all(&self) -> Result<usize> {
        with_connection(&self.path, |conn| {
            let affected = conn.execute("DELETE FROM memories", [])?;
            Ok(affected)
        })
    }

    fn update_fields(
        &self,
        id: MemoryId,
        text: Option<&str>,
        metadata: Option<&HashMap<String, serde_json::Value>>,
        category: Option<Category>,
        importance: Option<f32>,
        decay_rate: Option<f32>,
        embedding: Option<Option<&[f32]>>,
    ) -> Result<bool> {
        if let Some(t) = text {
            validate_text(t)?;
        }
        if let Some(m) = metadata {
            validate_metadata(m)?;
        }
        if let Some(e) = embedding {
            validate_embedding(e)?;
        }

        with_connection(&self.path, |conn| {
            let mut sets = Vec::new();
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(t) = text {
                sets.push("text = ?");
                values.push(Box::new(self.encode_text(t)));
            }
            if let Some(m) = metadata {
                let json = serde_json::to_string(m)?;
                sets.push("metadata_json = ?");
                values.push(Box::new(self.encode_text(&json)));
            }
            if let Some(c) = category {
                sets.push("category = ?");
                values.push(Box::new(c.to_string()));
            }
            if let Some(i) = importance {
                sets.push("importance = ?");
                values.push(Box::new(i as f64));
            }
            if let Some(d) = decay_rate {
                sets.push("decay_rate = ?");
                values.push(Box::new(d as f64));
            }
            if let Some(emb) = embedding {
                sets.push("embedding_blob = ?");
                values.push(Box::new(emb.map(|v| v.iter().flat_map(|f| f.to_le_bytes()).collect::<Vec<u8>>())));
                sets.push("embedding_dim = ?");
                values.push(Box::new(emb.map(|v| v.len() as i64)));
            }

            if sets.is_empty() {
                return Ok(false);
            }

            sets.push("updated_at = ?");
            values.push(Box::new(Utc::now()));
            values.push(Box::new(id.to_string()));

            let sql = format!("UPDATE memories SET {} WHERE id = ?", sets.join(", "));
            let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
            let affected = conn.execute(&sql, param_refs.as_slice())?;
            Ok(affected > 0)
        })
    }

    fn update_access(&self, id: MemoryId) -> Result<bool> {
        with_connection(&self.path, |conn| {
            let affected = conn.execute(
                "UPDATE memories SET access_count = access_count + 1, updated_at = ?1 WHERE id = ?2",
                params![Utc::now(), id.to_string()],
            )?;
            Ok(affected > 0)
        })
    }

    fn scan_with_embeddings(&self, limit: usize) -> Result<Vec<Memory>> {
        let bounded = limit.min(MAX_SCAN_LIMIT).max(1);
        with_connection(&self.path, |conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM memories WHERE embedding_blob IS NOT NULL ORDER BY created_at DESC LIMIT ?1")?;
            let rows = stmt.query_map(params![bounded as i64], |row| self.row_to_memory(row))?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
    }

    fn search_by_text(&self, query: &str, limit: usize) -> Result<Vec<Memory>> {
        let sanitized = sanitize_fts_query(query);
        if sanitized.is_empty() {
            return Ok(vec![]);
        }
        with_connection(&self.path, |conn| {
            let mut stmt = conn.prepare(
                "SELECT m.* FROM memories m
                 JOIN memories_fts fts ON m.rowid = fts.rowid
                 WHERE memories_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![sanitized, limit as i64], |row| self.row_to_memory(row))?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
    }

    fn search_filtered(&self, options: &SearchOptions) -> Result<Vec<Memory>> {
        for key in options.metadata_filter.keys() {
            filter::validate_filter_key(key)?;
        }

        with_connection(&self.path, |conn| {
            let mut sql = String::from("SELECT * FROM memories WHERE 1=1");
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(category) = options.category {
                sql.push_str(" AND category = ?");
                values.push(Box::new(category.to_string()));
            }
            if let Some(session_id) = &options.session_id {
                sql.push_str(" AND session_id = ?");
                values.push(Box::new(session_id.clone()));
            }
            for (key, value) in &options.metadata_filter {
                // Key already validated above; safe to interpolate into
                // the JSON path expression.
                sql.push_str(&format!(" AND json_extract(metadata_json, '$.{key}') = ?"));
                values.push(json_value_to_sql(value));
            }

            sql.push_str(" ORDER BY updated_at DESC LIMIT ?");
            values.push(Box::new(options.top_k.max(1) as i64));

            let mut stmt = conn.prepare(&sql)?;
            let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
            let rows = stmt.query_map(param_refs.as_slice(), |row| self.row_to_memory(row))?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
    }

    fn count(&self) -> Result<usize> {
        with_connection(&self.path, |conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
            Ok(count as usize)
        })
    }

    fn time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Memory>> {
        with_connection(&self.path, |conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM memories WHERE created_at >= ?1 AND created_at <= ?2 ORDER BY created_at ASC")?;
            let rows = stmt.query_map(params![start, end], |row| self.row_to_memory(row))?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
    }

    fn list(&self, options: &ListOptions) -> Result<Vec<Memory>> {
        with_connection(&self.path, |conn| {
            let mut sql = String::from("SELECT * FROM memories WHERE 1=1");
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(category) = options.category {
                sql.push_str(" AND category = ?");
                values.push(Box::new(category.to_string()));
            }
            if let Some(session_id) = &options.session_id {
                sql.push_str(" AND session_id = ?");
                values.push(Box::new(session_id.clone()));
            }

            let column = match options.sort_by {
                SortField::CreatedAt => "created_at",
                SortField::UpdatedAt => "updated_at",
                SortField::Importance => "importance",
                SortField::AccessCount => "access_count",
            };
            let direction = match options.sort_order {
                SortOrder::Asc => "ASC",
                SortOrder::Desc => "DESC",
            };
            sql.push_str(&format!(" ORDER BY {column} {direction} LIMIT ? OFFSET ?"));
            values.push(Box::new(options.limit as i64));
            values.push(Box::new(options.offset as i64));

            let mut stmt = conn.prepare(&sql)?;
            let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
            let rows = stmt.query_map(param_refs.as_slice(), |row| self.row_to_memory(row))?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
        })
    }

    fn stats(&self) -> Result<StoreStats> {
        with_connection(&self.path, |conn| {
            let total_memories: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
            let mut stmt = conn.prepare("SELECT category, COUNT(*) FROM memories GROUP BY category")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            let mut total_by_category = HashMap::new();
            for row in rows {
                let (category, count) = row?;
                total_by_category.insert(category, count as usize);
            }
            let db_size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);

            Ok(StoreStats {
                total_memories: total_memories as usize,
                total_by_category,
                schema_version: crate::storage::migrations::SCHEMA_VERSION,
                db_size_bytes,
            })
        })
    }
}

fn validate_text(text: &str) -> Result<()> {
    if text.len() > MAX_TEXT_LEN {
        return Err(MeshError::InvalidArgument(format!(
            "text is {} chars, exceeds the {MAX_TEXT_LEN} char limit",
            text.len()
        )));
    }
    Ok(())
}

fn validate_metadata(metadata: &HashMap<String, serde_json::Value>) -> Result<()> {
    let size = serde_json::to_vec(metadata)?.len();
    if size > MAX_METADATA_BYTES {
        return Err(MeshError::InvalidArgument(format!(
            "metadata is {size} bytes serialized, exceeds the {MAX_METADATA_BYTES} byte limit"
        )));
    }
    Ok(())
}

fn validate_embedding(embedding: Option<&[f32]>) -> Result<()> {
    if let Some(values) = embedding {
        if values.iter().any(|f| !f.is_finite()) {
            return Err(MeshError::InvalidArgument("embedding contains a non-finite value".to_string()));
        }
    }
    Ok(())
}

/// Converts a JSON value into the native SQL type that matches what
/// `json_extract` yields for an equivalent scalar, so `= ?` comparisons
/// work for strings without comparing against a quoted JSON literal.
fn json_value_to_sql(value: &serde_json::Value) -> Box<dyn rusqlite::ToSql> {
    match value {
        serde_json::Value::String(s) => Box::new(s.clone()),
        serde_json::Value::Bool(b) => Box::new(*b as i64),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else {
                Box::new(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::Null => Box::new(Option::<String>::None),
        other => Box::new(other.to_string()),
    }
}

/// Strip FTS5 special characters and boolean operator keywords so a raw
/// query string can never be interpreted as FTS5 syntax.
fn sanitize_fts_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    cleaned
        .split_whitespace()
        .filter(|w| !matches!(w.to_uppercase().as_str(), "AND" | "OR" | "NOT" | "NEAR"))
        .map(|w| format!("{w}*"))
        .collect::<Vec<_>>()
        .join(" ")
}

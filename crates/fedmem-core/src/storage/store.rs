//! Vector store adapter.
//!
//! One adapter per module table. The trait is the single low-level API the
//! module layer builds on; the SQLite implementation keeps embeddings as
//! `f32` BLOBs and evaluates metadata predicates and cosine similarity in
//! process. Everything scopes by `user_id`; missing rows are `Ok(None)`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::embeddings::{cosine_similarity, embedding_from_bytes, embedding_to_bytes};
use crate::error::{MemoryError, Result};
use crate::memory::{fmt_ts, parse_ts, MemoryRecord};
use crate::storage::{migrations, Database};

// ============================================================================
// FILTERS AND UPDATES
// ============================================================================

/// Structured predicate over row metadata.
///
/// Every entry must hold: scalars compare by equality; when the stored value
/// is an array, a scalar expectation means "contains"; when the expectation
/// is an array it means "intersects".
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter(pub serde_json::Map<String, Value>);

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, metadata: &Value) -> bool {
        self.0.iter().all(|(key, expected)| {
            let Some(actual) = metadata.get(key) else {
                return false;
            };
            match (actual, expected) {
                (Value::Array(have), Value::Array(want)) => {
                    want.iter().any(|w| have.contains(w))
                }
                (Value::Array(have), want) => have.contains(want),
                (have, Value::Array(want)) => want.contains(have),
                (have, want) => have == want,
            }
        })
    }
}

/// Ordering for the structured-only scan path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterOrder {
    #[default]
    UpdatedDesc,
    UpdatedAsc,
    CreatedDesc,
    CreatedAsc,
}

impl FilterOrder {
    fn sql(self) -> &'static str {
        match self {
            FilterOrder::UpdatedDesc => "updated_at DESC, id ASC",
            FilterOrder::UpdatedAsc => "updated_at ASC, id ASC",
            FilterOrder::CreatedDesc => "created_at DESC, id ASC",
            FilterOrder::CreatedAsc => "created_at ASC, id ASC",
        }
    }
}

/// Partial update of a row. `updated_at` is always refreshed.
#[derive(Debug, Clone, Default)]
pub struct RowUpdate {
    pub content: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<Value>,
}

/// Aggregates for `get_stats`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    pub total_memories: i64,
    pub total_accesses: i64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

// ============================================================================
// TRAIT
// ============================================================================

/// Low-level per-table storage API.
///
/// A trait so the router's fan-out failure containment can be exercised with
/// an injected failing implementation.
pub trait VectorStore: Send + Sync {
    fn table_name(&self) -> &str;

    /// Atomic insert. Fails on duplicate id or dimension mismatch.
    fn insert(&self, row: &MemoryRecord) -> Result<()>;

    fn get_by_id(&self, user_id: &str, id: &str) -> Result<Option<MemoryRecord>>;

    /// Fetch many rows, preserving the order of `ids`. Missing ids are skipped.
    fn get_many(&self, user_id: &str, ids: &[String]) -> Result<Vec<MemoryRecord>>;

    /// Partial update; refreshes `updated_at`. `Ok(None)` when the row is missing.
    fn update(&self, user_id: &str, id: &str, fields: &RowUpdate)
        -> Result<Option<MemoryRecord>>;

    /// Idempotent delete. Returns whether a row existed.
    fn delete(&self, user_id: &str, id: &str) -> Result<bool>;

    /// Up to `k` `(id, similarity)` pairs by descending cosine similarity,
    /// ties broken by `updated_at` desc then `id` asc. Similarity is clamped
    /// to `[0, 1]`.
    fn knn_search(
        &self,
        user_id: &str,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(String, f32)>>;

    /// Structured-only path, no vector involved.
    fn filter_scan(
        &self,
        user_id: &str,
        filter: &MetadataFilter,
        order: FilterOrder,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryRecord>>;

    /// Best-effort read bookkeeping: bump `access_count` and `last_accessed`
    /// without touching `updated_at`.
    fn record_access(&self, user_id: &str, ids: &[String], at: DateTime<Utc>) -> Result<()>;

    /// Page over every row regardless of user, ordered by id. Used by the
    /// index rebuild sweep.
    fn scan_all(&self, limit: usize, offset: usize) -> Result<Vec<MemoryRecord>>;

    fn count(&self, user_id: Option<&str>) -> Result<i64>;

    fn stats(&self, user_id: &str) -> Result<TableStats>;
}

// ============================================================================
// SQLITE IMPLEMENTATION
// ============================================================================

/// SQLite-backed vector store over one module table.
pub struct SqliteVectorStore {
    db: Arc<Database>,
    table: String,
    dimension: usize,
}

impl SqliteVectorStore {
    /// Create the adapter, ensuring the table exists.
    pub fn new(db: Arc<Database>, table: &str, dimension: usize) -> Result<Self> {
        db.with_writer(|conn| migrations::ensure_module_table(conn, table))?;
        Ok(Self {
            db,
            table: table.to_string(),
            dimension,
        })
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(MemoryError::InvalidArgument(format!(
                "embedding dimension {} does not match module dimension {}",
                embedding.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
        Ok(RawRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            content: row.get(2)?,
            embedding: row.get(3)?,
            metadata: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            last_accessed: row.get(7)?,
            access_count: row.get(8)?,
        })
    }

    fn select_columns(&self) -> String {
        format!(
            "SELECT id, user_id, content, embedding, metadata, created_at, updated_at,
                    last_accessed, access_count FROM {}",
            self.table
        )
    }
}

struct RawRow {
    id: String,
    user_id: String,
    content: String,
    embedding: Vec<u8>,
    metadata: String,
    created_at: String,
    updated_at: String,
    last_accessed: Option<String>,
    access_count: i64,
}

impl RawRow {
    fn into_record(self) -> Result<MemoryRecord> {
        let embedding = embedding_from_bytes(&self.embedding).ok_or_else(|| {
            MemoryError::StorageFailure(format!("corrupt embedding for row {}", self.id))
        })?;
        let bad_ts =
            || MemoryError::StorageFailure(format!("corrupt timestamp for row {}", self.id));
        Ok(MemoryRecord {
            embedding,
            metadata: serde_json::from_str(&self.metadata)
                .unwrap_or(Value::Object(Default::default())),
            created_at: parse_ts(&self.created_at).ok_or_else(bad_ts)?,
            updated_at: parse_ts(&self.updated_at).ok_or_else(bad_ts)?,
            last_accessed: self.last_accessed.as_deref().and_then(parse_ts),
            id: self.id,
            user_id: self.user_id,
            content: self.content,
            access_count: self.access_count,
        })
    }
}

impl VectorStore for SqliteVectorStore {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn insert(&self, row: &MemoryRecord) -> Result<()> {
        self.check_dimension(&row.embedding)?;
        let metadata = serde_json::to_string(&row.metadata)?;
        self.db.with_writer(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} (id, user_id, content, embedding, metadata, created_at,
                                     updated_at, last_accessed, access_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    self.table
                ),
                params![
                    row.id,
                    row.user_id,
                    row.content,
                    embedding_to_bytes(&row.embedding),
                    metadata,
                    fmt_ts(row.created_at),
                    fmt_ts(row.updated_at),
                    row.last_accessed.map(fmt_ts),
                    row.access_count,
                ],
            )?;
            Ok(())
        })
    }

    fn get_by_id(&self, user_id: &str, id: &str) -> Result<Option<MemoryRecord>> {
        let raw = self.db.with_reader(|conn| {
            conn.query_row(
                &format!("{} WHERE user_id = ?1 AND id = ?2", self.select_columns()),
                params![user_id, id],
                Self::map_row,
            )
            .optional()
            .map_err(Into::into)
        })?;
        raw.map(RawRow::into_record).transpose()
    }

    fn get_many(&self, user_id: &str, ids: &[String]) -> Result<Vec<MemoryRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (2..ids.len() + 2)
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "{} WHERE user_id = ?1 AND id IN ({placeholders})",
            self.select_columns()
        );
        let raws = self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut sql_params: Vec<&dyn rusqlite::ToSql> = vec![&user_id];
            for id in ids {
                sql_params.push(id);
            }
            let rows = stmt
                .query_map(sql_params.as_slice(), Self::map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        let mut by_id: std::collections::HashMap<String, MemoryRecord> = raws
            .into_iter()
            .map(|raw| raw.into_record().map(|r| (r.id.clone(), r)))
            .collect::<Result<_>>()?;
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    fn update(
        &self,
        user_id: &str,
        id: &str,
        fields: &RowUpdate,
    ) -> Result<Option<MemoryRecord>> {
        if let Some(embedding) = &fields.embedding {
            self.check_dimension(embedding)?;
        }
        let now = fmt_ts(Utc::now());
        let metadata = fields
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let changed = self.db.with_writer(|conn| {
            let n = conn.execute(
                &format!(
                    "UPDATE {} SET
                        content = COALESCE(?3, content),
                        embedding = COALESCE(?4, embedding),
                        metadata = COALESCE(?5, metadata),
                        updated_at = ?6
                     WHERE user_id = ?1 AND id = ?2",
                    self.table
                ),
                params![
                    user_id,
                    id,
                    fields.content,
                    fields.embedding.as_deref().map(embedding_to_bytes),
                    metadata,
                    now,
                ],
            )?;
            Ok(n)
        })?;

        if changed == 0 {
            return Ok(None);
        }
        self.get_by_id(user_id, id)
    }

    fn delete(&self, user_id: &str, id: &str) -> Result<bool> {
        let n = self.db.with_writer(|conn| {
            conn.execute(
                &format!("DELETE FROM {} WHERE user_id = ?1 AND id = ?2", self.table),
                params![user_id, id],
            )
            .map_err(Into::into)
        })?;
        Ok(n > 0)
    }

    fn knn_search(
        &self,
        user_id: &str,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(String, f32)>> {
        self.check_dimension(query)?;
        let raws = self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, embedding, metadata, updated_at FROM {} WHERE user_id = ?1",
                self.table
            ))?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        let mut scored: Vec<(String, f32, String)> = Vec::with_capacity(raws.len());
        for (id, embedding_bytes, metadata, updated_at) in raws {
            if let Some(filter) = filter {
                let metadata: Value =
                    serde_json::from_str(&metadata).unwrap_or(Value::Object(Default::default()));
                if !filter.matches(&metadata) {
                    continue;
                }
            }
            let Some(embedding) = embedding_from_bytes(&embedding_bytes) else {
                continue;
            };
            let similarity = cosine_similarity(query, &embedding).clamp(0.0, 1.0);
            scored.push((id, similarity, updated_at));
        }

        // Similarity desc; stored timestamps compare lexicographically.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored.into_iter().map(|(id, sim, _)| (id, sim)).collect())
    }

    fn filter_scan(
        &self,
        user_id: &str,
        filter: &MetadataFilter,
        order: FilterOrder,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let raws = self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE user_id = ?1 ORDER BY {}",
                self.select_columns(),
                order.sql()
            ))?;
            let rows = stmt
                .query_map(params![user_id], Self::map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        // The predicate runs in process, so pagination applies after it.
        let mut out = Vec::new();
        let mut skipped = 0usize;
        for raw in raws {
            let record = raw.into_record()?;
            if !filter.matches(&record.metadata) {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            out.push(record);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    fn record_access(&self, user_id: &str, ids: &[String], at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = (3..ids.len() + 3)
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let at = fmt_ts(at);
        self.db.with_writer(|conn| {
            let mut sql_params: Vec<&dyn rusqlite::ToSql> = vec![&at, &user_id];
            for id in ids {
                sql_params.push(id);
            }
            conn.execute(
                &format!(
                    "UPDATE {} SET last_accessed = ?1, access_count = access_count + 1
                     WHERE user_id = ?2 AND id IN ({placeholders})",
                    self.table
                ),
                sql_params.as_slice(),
            )?;
            Ok(())
        })
    }

    fn scan_all(&self, limit: usize, offset: usize) -> Result<Vec<MemoryRecord>> {
        let raws = self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} ORDER BY id ASC LIMIT ?1 OFFSET ?2",
                self.select_columns()
            ))?;
            let rows = stmt
                .query_map(params![limit as i64, offset as i64], Self::map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        raws.into_iter().map(RawRow::into_record).collect()
    }

    fn count(&self, user_id: Option<&str>) -> Result<i64> {
        self.db.with_reader(|conn| {
            let n = match user_id {
                Some(user_id) => conn.query_row(
                    &format!("SELECT COUNT(*) FROM {} WHERE user_id = ?1", self.table),
                    params![user_id],
                    |row| row.get(0),
                )?,
                None => conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", self.table),
                    [],
                    |row| row.get(0),
                )?,
            };
            Ok(n)
        })
    }

    fn stats(&self, user_id: &str) -> Result<TableStats> {
        self.db.with_reader(|conn| {
            let (total, accesses, oldest, newest): (i64, i64, Option<String>, Option<String>) =
                conn.query_row(
                    &format!(
                        "SELECT COUNT(*), COALESCE(SUM(access_count), 0),
                                MIN(created_at), MAX(updated_at)
                         FROM {} WHERE user_id = ?1",
                        self.table
                    ),
                    params![user_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?;
            Ok(TableStats {
                total_memories: total,
                total_accesses: accesses,
                oldest: oldest.as_deref().and_then(parse_ts),
                newest: newest.as_deref().and_then(parse_ts),
            })
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

//! Central Memory Index.
//!
//! One compressed summary entry per live memory across every module, keyed by
//! `(module_id, remote_memory_id)`. The index is derived state: modules write
//! through on every store/update/delete, and [`CmiIndex::rebuild`] can
//! re-derive the whole table from the module rows.
//!
//! The index owns its table exclusively; no other component writes it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::embeddings::{
    compress_embedding, cosine_similarity, embedding_from_bytes, embedding_to_bytes,
};
use crate::error::{MemoryError, Result};
use crate::memory::{fmt_ts, parse_ts, CmiEntry, IndexFields};
use crate::storage::{Database, VectorStore};

/// How strongly `importanceScore` boosts candidate ranking. A fixed
/// constant: routing must rank identically across deployments.
pub const IMPORTANCE_WEIGHT: f32 = 0.2;

/// Page size for the rebuild sweep.
const REBUILD_PAGE: usize = 500;

/// A coarse candidate from the index, before full-resolution re-ranking.
#[derive(Debug, Clone)]
pub struct CmiCandidate {
    pub module_id: String,
    pub remote_memory_id: String,
    /// Raw cosine similarity, clamped to `[0, 1]`.
    pub score: f32,
    /// `score · (1 − IMPORTANCE_WEIGHT · (1 − importance))`.
    pub weighted_score: f32,
    pub importance_score: f32,
}

/// Outcome of an index rebuild.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub entries_upserted: usize,
    pub orphans_removed: usize,
}

pub struct CmiIndex {
    db: Arc<Database>,
    dimension: usize,
}

impl CmiIndex {
    pub fn new(db: Arc<Database>, dimension: usize) -> Self {
        Self { db, dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Upsert the entry for `(module_id, remote_memory_id)`.
    ///
    /// Idempotent: when the stored fields and vector already equal the input,
    /// the row is left untouched (including `updated_at`).
    pub fn index_memory(
        &self,
        user_id: &str,
        module_id: &str,
        remote_memory_id: &str,
        fields: &IndexFields,
        embedding: &[f32],
    ) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(MemoryError::InvalidArgument(format!(
                "compressed embedding dimension {} does not match index dimension {}",
                embedding.len(),
                self.dimension
            )));
        }
        let keywords = serde_json::to_string(&fields.keywords)?;
        let categories = serde_json::to_string(&fields.categories)?;
        let now = fmt_ts(Utc::now());
        self.db.with_writer(|conn| {
            conn.execute(
                "INSERT INTO memory_index
                    (id, user_id, module_id, remote_memory_id, title, summary, keywords,
                     categories, importance_score, embedding, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                 ON CONFLICT(module_id, remote_memory_id) DO UPDATE SET
                    title = excluded.title,
                    summary = excluded.summary,
                    keywords = excluded.keywords,
                    categories = excluded.categories,
                    importance_score = excluded.importance_score,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                 WHERE title <> excluded.title
                    OR summary <> excluded.summary
                    OR keywords <> excluded.keywords
                    OR categories <> excluded.categories
                    OR importance_score <> excluded.importance_score
                    OR embedding <> excluded.embedding",
                params![
                    Uuid::new_v4().to_string(),
                    user_id,
                    module_id,
                    remote_memory_id,
                    fields.title,
                    fields.summary,
                    keywords,
                    categories,
                    fields.importance_score,
                    embedding_to_bytes(embedding),
                    now,
                ],
            )?;
            Ok(())
        })
    }

    /// Refresh summary fields without touching the stored vector. Used by
    /// metadata-only updates.
    pub fn refresh_fields(
        &self,
        user_id: &str,
        module_id: &str,
        remote_memory_id: &str,
        fields: &IndexFields,
    ) -> Result<()> {
        let keywords = serde_json::to_string(&fields.keywords)?;
        let categories = serde_json::to_string(&fields.categories)?;
        self.db.with_writer(|conn| {
            conn.execute(
                "UPDATE memory_index SET
                    title = ?4, summary = ?5, keywords = ?6, categories = ?7,
                    importance_score = ?8, updated_at = ?9
                 WHERE user_id = ?1 AND module_id = ?2 AND remote_memory_id = ?3",
                params![
                    user_id,
                    module_id,
                    remote_memory_id,
                    fields.title,
                    fields.summary,
                    keywords,
                    categories,
                    fields.importance_score,
                    fmt_ts(Utc::now()),
                ],
            )?;
            Ok(())
        })
    }

    /// Idempotent removal. Returns whether an entry existed.
    pub fn remove(&self, user_id: &str, module_id: &str, remote_memory_id: &str) -> Result<bool> {
        self.db.with_writer(|conn| {
            let n = conn.execute(
                "DELETE FROM memory_index
                 WHERE user_id = ?1 AND module_id = ?2 AND remote_memory_id = ?3",
                params![user_id, module_id, remote_memory_id],
            )?;
            Ok(n > 0)
        })
    }

    /// Coarse k-NN over the compressed vectors, restricted to one user and
    /// optionally to a module subset. Ranked by importance-weighted score,
    /// ties by `updated_at` desc then memory id asc.
    pub fn knn(
        &self,
        user_id: &str,
        query: &[f32],
        k: usize,
        modules: Option<&[String]>,
    ) -> Result<Vec<CmiCandidate>> {
        if query.len() != self.dimension {
            return Err(MemoryError::InvalidArgument(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }
        let rows = self.db.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT module_id, remote_memory_id, importance_score, embedding, updated_at
                 FROM memory_index WHERE user_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f32>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        let mut scored: Vec<(CmiCandidate, String)> = Vec::new();
        for (module_id, remote_memory_id, importance, embedding_bytes, updated_at) in rows {
            if let Some(allowed) = modules {
                if !allowed.iter().any(|m| m == &module_id) {
                    continue;
                }
            }
            let Some(embedding) = embedding_from_bytes(&embedding_bytes) else {
                continue;
            };
            let score = cosine_similarity(query, &embedding).clamp(0.0, 1.0);
            let weighted_score = score * (1.0 - IMPORTANCE_WEIGHT * (1.0 - importance));
            scored.push((
                CmiCandidate {
                    module_id,
                    remote_memory_id,
                    score,
                    weighted_score,
                    importance_score: importance,
                },
                updated_at,
            ));
        }

        scored.sort_by(|a, b| {
            b.0.weighted_score
                .partial_cmp(&a.0.weighted_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.0.remote_memory_id.cmp(&b.0.remote_memory_id))
        });
        scored.truncate(k);
        Ok(scored.into_iter().map(|(c, _)| c).collect())
    }

    /// Find which module owns a memory id. The index is the only place this
    /// can be answered without asking every module.
    pub fn resolve(&self, user_id: &str, memory_id: &str) -> Result<Option<String>> {
        self.db.with_reader(|conn| {
            conn.query_row(
                "SELECT module_id FROM memory_index
                 WHERE user_id = ?1 AND remote_memory_id = ?2
                 ORDER BY module_id ASC LIMIT 1",
                params![user_id, memory_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn get_entry(
        &self,
        user_id: &str,
        module_id: &str,
        remote_memory_id: &str,
    ) -> Result<Option<CmiEntry>> {
        self.db.with_reader(|conn| {
            conn.query_row(
                "SELECT user_id, module_id, remote_memory_id, title, summary, keywords,
                        categories, importance_score, embedding, created_at, updated_at
                 FROM memory_index
                 WHERE user_id = ?1 AND module_id = ?2 AND remote_memory_id = ?3",
                params![user_id, module_id, remote_memory_id],
                map_entry,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn count(&self, user_id: Option<&str>) -> Result<i64> {
        self.db.with_reader(|conn| {
            let n = match user_id {
                Some(user_id) => conn.query_row(
                    "SELECT COUNT(*) FROM memory_index WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )?,
                None => {
                    conn.query_row("SELECT COUNT(*) FROM memory_index", [], |row| row.get(0))?
                }
            };
            Ok(n)
        })
    }

    /// Re-derive every index entry from the module tables and drop orphans.
    ///
    /// Idempotent; safe to run at any time. Restores the "every live row has
    /// exactly one entry" invariant after a failed write-through.
    pub fn rebuild(
        &self,
        modules: &[(String, Arc<dyn VectorStore>)],
    ) -> Result<RebuildReport> {
        let mut report = RebuildReport::default();
        for (module_id, store) in modules {
            let mut live: HashSet<String> = HashSet::new();
            let mut offset = 0usize;
            loop {
                let page = store.scan_all(REBUILD_PAGE, offset)?;
                if page.is_empty() {
                    break;
                }
                offset += page.len();
                for record in page {
                    let fields =
                        IndexFields::derive(&record.content, &record.metadata, module_id);
                    let compressed = compress_embedding(&record.embedding, self.dimension);
                    self.index_memory(
                        &record.user_id,
                        module_id,
                        &record.id,
                        &fields,
                        &compressed,
                    )?;
                    live.insert(record.id);
                    report.entries_upserted += 1;
                }
            }

            let indexed: Vec<(String, String)> = self.db.with_reader(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT user_id, remote_memory_id FROM memory_index WHERE module_id = ?1",
                )?;
                let rows = stmt
                    .query_map(params![module_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })?;
            for (user_id, remote_id) in indexed {
                if !live.contains(&remote_id) {
                    if self.remove(&user_id, module_id, &remote_id)? {
                        report.orphans_removed += 1;
                    }
                }
            }
        }
        tracing::info!(
            upserted = report.entries_upserted,
            orphans = report.orphans_removed,
            "index rebuild complete"
        );
        Ok(report)
    }
}

fn map_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CmiEntry> {
    let keywords: String = row.get(5)?;
    let categories: String = row.get(6)?;
    let embedding: Vec<u8> = row.get(8)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    Ok(CmiEntry {
        user_id: row.get(0)?,
        module_id: row.get(1)?,
        remote_memory_id: row.get(2)?,
        title: row.get(3)?,
        summary: row.get(4)?,
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        categories: serde_json::from_str(&categories).unwrap_or_default(),
        importance_score: row.get(7)?,
        embedding: embedding_from_bytes(&embedding).unwrap_or_default(),
        created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_ts(&updated_at).unwrap_or_else(Utc::now),
    })
}

/// Derive index fields from a record the same way the modules do at store
/// time. Shared by rebuild and tests.
pub fn derive_fields(content: &str, metadata: &Value, module_id: &str) -> IndexFields {
    IndexFields::derive(content, metadata, module_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_index(dim: usize) -> (tempfile::TempDir, CmiIndex) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(Some(dir.path().join("t.db")), 1).unwrap());
        (dir, CmiIndex::new(db, dim))
    }

    fn fields(title: &str) -> IndexFields {
        IndexFields::derive(title, &json!({}), "work")
    }

    fn axis(dim: usize, i: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[i] = 1.0;
        v
    }

    #[test]
    fn index_memory_is_idempotent() {
        let (_dir, index) = test_index(4);
        let f = fields("kickoff notes");
        index.index_memory("u1", "work", "m1", &f, &axis(4, 0)).unwrap();
        let first = index.get_entry("u1", "work", "m1").unwrap().unwrap();

        index.index_memory("u1", "work", "m1", &f, &axis(4, 0)).unwrap();
        let second = index.get_entry("u1", "work", "m1").unwrap().unwrap();
        assert_eq!(first.embedding, second.embedding);
        assert_eq!(first.updated_at, second.updated_at);
        assert_eq!(index.count(Some("u1")).unwrap(), 1);
    }

    #[test]
    fn index_memory_updates_on_change() {
        let (_dir, index) = test_index(4);
        index
            .index_memory("u1", "work", "m1", &fields("before"), &axis(4, 0))
            .unwrap();
        index
            .index_memory("u1", "work", "m1", &fields("after"), &axis(4, 1))
            .unwrap();
        let entry = index.get_entry("u1", "work", "m1").unwrap().unwrap();
        assert_eq!(entry.title, "after");
        assert_eq!(entry.embedding, axis(4, 1));
        assert_eq!(index.count(Some("u1")).unwrap(), 1);
    }

    #[test]
    fn refresh_fields_leaves_vector_alone() {
        let (_dir, index) = test_index(4);
        index
            .index_memory("u1", "work", "m1", &fields("original"), &axis(4, 0))
            .unwrap();
        let mut f = fields("original");
        f.importance_score = 0.9;
        f.categories = vec!["projects".to_string()];
        index.refresh_fields("u1", "work", "m1", &f).unwrap();

        let entry = index.get_entry("u1", "work", "m1").unwrap().unwrap();
        assert_eq!(entry.embedding, axis(4, 0));
        assert!((entry.importance_score - 0.9).abs() < 1e-6);
        assert_eq!(entry.categories, vec!["projects"]);
    }

    #[test]
    fn knn_weights_importance() {
        let (_dir, index) = test_index(4);
        let mut low = fields("low importance");
        low.importance_score = 0.0;
        let mut high = fields("high importance");
        high.importance_score = 1.0;
        // Identical vectors: importance must decide the order.
        index.index_memory("u1", "work", "low", &low, &axis(4, 0)).unwrap();
        index.index_memory("u1", "personal", "high", &high, &axis(4, 0)).unwrap();

        let candidates = index.knn("u1", &axis(4, 0), 2, None).unwrap();
        assert_eq!(candidates[0].remote_memory_id, "high");
        assert!((candidates[0].weighted_score - 1.0).abs() < 1e-6);
        assert!((candidates[1].weighted_score - (1.0 - IMPORTANCE_WEIGHT)).abs() < 1e-6);
    }

    #[test]
    fn knn_module_filter_and_user_scope() {
        let (_dir, index) = test_index(4);
        index.index_memory("u1", "work", "a", &fields("a"), &axis(4, 0)).unwrap();
        index.index_memory("u1", "personal", "b", &fields("b"), &axis(4, 0)).unwrap();
        index.index_memory("u2", "work", "c", &fields("c"), &axis(4, 0)).unwrap();

        let only_work = index
            .knn("u1", &axis(4, 0), 10, Some(&["work".to_string()]))
            .unwrap();
        assert_eq!(only_work.len(), 1);
        assert_eq!(only_work[0].remote_memory_id, "a");

        let all = index.knn("u1", &axis(4, 0), 10, None).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|c| c.remote_memory_id != "c"));
    }

    #[test]
    fn resolve_finds_owning_module() {
        let (_dir, index) = test_index(4);
        index.index_memory("u1", "work", "m1", &fields("x"), &axis(4, 0)).unwrap();
        assert_eq!(index.resolve("u1", "m1").unwrap().as_deref(), Some("work"));
        assert!(index.resolve("u1", "missing").unwrap().is_none());
        assert!(index.resolve("u2", "m1").unwrap().is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let (_dir, index) = test_index(4);
        index.index_memory("u1", "work", "m1", &fields("x"), &axis(4, 0)).unwrap();
        assert!(index.remove("u1", "work", "m1").unwrap());
        assert!(!index.remove("u1", "work", "m1").unwrap());
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let (_dir, index) = test_index(4);
        let err = index
            .index_memory("u1", "work", "m1", &fields("x"), &[1.0; 3])
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
        let err = index.knn("u1", &[1.0; 3], 5, None).unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }
}

//! Memory module.
//!
//! A module is a user-scoped typed store of memories with its own
//! full-resolution vector index and metadata view. Every write flows through
//! to the Central Memory Index; delete cascades across relationships, the
//! index entry, and the row. A memory never moves between modules.

pub mod registry;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cancel::{bail_if_cancelled, checked};
use crate::cmi::CmiIndex;
use crate::embeddings::{compress_embedding, EmbeddingProvider, Tier};
use crate::error::{MemoryError, Result};
use crate::memory::{
    extract_keywords, merge_metadata, normalize_metadata, IndexFields, MemoryHit, MemoryRecord,
    ModuleDescriptor,
};
use crate::relationships::RelationshipStore;
use crate::storage::{FilterOrder, MetadataFilter, RowUpdate, TableStats, VectorStore};

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// Mutation request. Content changes re-embed; metadata-only changes do not.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub content: Option<String>,
    /// Shallow-merged into the existing metadata; `null` values delete keys.
    pub metadata: Option<Value>,
}

/// Search options for a single module.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub filter: Option<MetadataFilter>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            filter: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub top_keywords: usize,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self { top_keywords: 10 }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordCount {
    pub keyword: String,
    pub count: i64,
}

/// Aggregation over one user's rows in one module. `total_memories` always
/// agrees with the raw row count.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleAnalysis {
    pub module_id: String,
    pub total_memories: i64,
    pub categories: BTreeMap<String, i64>,
    pub top_keywords: Vec<KeywordCount>,
    /// Value histograms for the descriptor's declared facet keys.
    pub facets: BTreeMap<String, BTreeMap<String, i64>>,
}

// ============================================================================
// MODULE
// ============================================================================

pub struct MemoryModule {
    descriptor: ModuleDescriptor,
    store: Arc<dyn VectorStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    cmi: Arc<CmiIndex>,
    relationships: Arc<RelationshipStore>,
}

impl MemoryModule {
    pub fn new(
        descriptor: ModuleDescriptor,
        store: Arc<dyn VectorStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        cmi: Arc<CmiIndex>,
        relationships: Arc<RelationshipStore>,
    ) -> Self {
        Self {
            descriptor,
            store,
            embeddings,
            cmi,
            relationships,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    pub fn store_adapter(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Store a new memory. Row insert and index write-through are one logical
    /// unit: if indexing fails the row is compensated away and the caller
    /// sees `StorageFailure`.
    pub async fn store(
        &self,
        user_id: &str,
        content: &str,
        metadata: Option<Value>,
        token: &CancellationToken,
    ) -> Result<String> {
        bail_if_cancelled(token)?;
        if content.trim().is_empty() {
            return Err(MemoryError::InvalidArgument(
                "content must not be empty".to_string(),
            ));
        }
        let metadata = normalize_metadata(metadata)?;

        let full = checked(token, self.embeddings.embed(content, Tier::Full)).await?;
        let compressed = compress_embedding(&full, self.cmi.dimension());
        let fields = IndexFields::derive(content, &metadata, &self.descriptor.id);

        let now = Utc::now();
        let record = MemoryRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            embedding: full,
            metadata,
            created_at: now,
            updated_at: now,
            last_accessed: None,
            access_count: 0,
        };

        bail_if_cancelled(token)?;
        self.store.insert(&record)?;

        if let Err(e) =
            self.cmi
                .index_memory(user_id, &self.descriptor.id, &record.id, &fields, &compressed)
        {
            // Compensate: the row must not outlive a missing index entry.
            if let Err(cleanup) = self.store.delete(user_id, &record.id) {
                tracing::error!(
                    module_id = %self.descriptor.id,
                    memory_id = %record.id,
                    error = %cleanup,
                    "compensation delete failed; reindex sweep required"
                );
            }
            return Err(MemoryError::StorageFailure(format!(
                "index write-through failed: {e}"
            )));
        }

        tracing::info!(
            user_id,
            module_id = %self.descriptor.id,
            memory_id = %record.id,
            "memory stored"
        );
        Ok(record.id)
    }

    /// Fetch one memory, bumping access bookkeeping best-effort.
    pub fn get(&self, user_id: &str, id: &str) -> Result<Option<MemoryRecord>> {
        let record = self.store.get_by_id(user_id, id)?;
        if record.is_some() {
            self.touch(user_id, std::slice::from_ref(&id.to_string()));
        }
        Ok(record)
    }

    pub fn get_many(&self, user_id: &str, ids: &[String]) -> Result<Vec<MemoryRecord>> {
        self.store.get_many(user_id, ids)
    }

    /// Mutate content and/or metadata. A content change re-embeds both tiers
    /// and refreshes the index entry; a metadata-only change must not touch
    /// either stored vector.
    pub async fn update(
        &self,
        user_id: &str,
        id: &str,
        request: UpdateRequest,
        token: &CancellationToken,
    ) -> Result<MemoryRecord> {
        bail_if_cancelled(token)?;
        let current = self
            .store
            .get_by_id(user_id, id)?
            .ok_or_else(|| MemoryError::NotFound(format!("memory {id}")))?;

        let merged = match &request.metadata {
            Some(patch) => merge_metadata(&current.metadata, patch),
            None => current.metadata.clone(),
        };
        let content_changed = request
            .content
            .as_deref()
            .is_some_and(|c| c != current.content);

        if content_changed {
            let content = request.content.as_deref().unwrap_or_default();
            if content.trim().is_empty() {
                return Err(MemoryError::InvalidArgument(
                    "content must not be empty".to_string(),
                ));
            }
            let full = checked(token, self.embeddings.embed(content, Tier::Full)).await?;
            let compressed = compress_embedding(&full, self.cmi.dimension());
            let fields = IndexFields::derive(content, &merged, &self.descriptor.id);

            let updated = self
                .store
                .update(
                    user_id,
                    id,
                    &RowUpdate {
                        content: Some(content.to_string()),
                        embedding: Some(full),
                        metadata: Some(merged),
                    },
                )?
                .ok_or_else(|| MemoryError::NotFound(format!("memory {id}")))?;
            self.cmi
                .index_memory(user_id, &self.descriptor.id, id, &fields, &compressed)?;
            Ok(updated)
        } else {
            let fields = IndexFields::derive(&current.content, &merged, &self.descriptor.id);
            let updated = self
                .store
                .update(
                    user_id,
                    id,
                    &RowUpdate {
                        content: None,
                        embedding: None,
                        metadata: Some(merged),
                    },
                )?
                .ok_or_else(|| MemoryError::NotFound(format!("memory {id}")))?;
            self.cmi
                .refresh_fields(user_id, &self.descriptor.id, id, &fields)?;
            Ok(updated)
        }
    }

    /// Delete cascade: relationships, index entry, then the row. Idempotent;
    /// returns whether a row existed.
    pub fn delete(&self, user_id: &str, id: &str) -> Result<bool> {
        self.relationships
            .delete_incident(user_id, &self.descriptor.id, id)?;
        self.cmi.remove(user_id, &self.descriptor.id, id)?;
        let existed = self.store.delete(user_id, id)?;
        if existed {
            tracing::info!(
                user_id,
                module_id = %self.descriptor.id,
                memory_id = %id,
                "memory deleted"
            );
        }
        Ok(existed)
    }

    /// Full-resolution search within this module.
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        options: SearchOptions,
        token: &CancellationToken,
    ) -> Result<Vec<MemoryHit>> {
        if query.trim().is_empty() {
            return Err(MemoryError::InvalidArgument(
                "query must not be empty".to_string(),
            ));
        }
        let limit = options.limit.clamp(1, 100);
        let full = checked(token, self.embeddings.embed(query, Tier::Full)).await?;

        bail_if_cancelled(token)?;
        let pairs = self
            .store
            .knn_search(user_id, &full, limit, options.filter.as_ref())?;
        let ids: Vec<String> = pairs.iter().map(|(id, _)| id.clone()).collect();
        let records = self.store.get_many(user_id, &ids)?;
        let hits = zip_hits(&self.descriptor.id, &pairs, records);

        self.touch(user_id, &ids);
        Ok(hits)
    }

    /// Re-rank candidate rows against a full-resolution query vector. Stage
    /// two of federated search; no access bookkeeping here.
    pub fn rescore(
        &self,
        user_id: &str,
        ids: &[String],
        query_full: &[f32],
    ) -> Result<Vec<MemoryHit>> {
        let records = self.store.get_many(user_id, ids)?;
        Ok(records
            .into_iter()
            .map(|record| {
                let similarity = crate::embeddings::cosine_similarity(query_full, &record.embedding)
                    .clamp(0.0, 1.0);
                MemoryHit {
                    id: record.id,
                    module_id: self.descriptor.id.clone(),
                    content: record.content,
                    metadata: record.metadata,
                    similarity,
                    updated_at: record.updated_at,
                }
            })
            .collect())
    }

    /// Best-effort access bookkeeping; failures are logged, never surfaced.
    pub fn touch(&self, user_id: &str, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self.store.record_access(user_id, ids, Utc::now()) {
            tracing::warn!(
                module_id = %self.descriptor.id,
                error = %e,
                "access bookkeeping failed"
            );
        }
    }

    pub fn get_stats(&self, user_id: &str) -> Result<TableStats> {
        self.store.stats(user_id)
    }

    pub fn count(&self, user_id: Option<&str>) -> Result<i64> {
        self.store.count(user_id)
    }

    /// Aggregate the caller's rows: category distribution, top keywords, and
    /// the descriptor's facet histograms.
    pub fn analyze(&self, user_id: &str, options: AnalyzeOptions) -> Result<ModuleAnalysis> {
        let total = self.store.count(Some(user_id))?;
        let rows = self.store.filter_scan(
            user_id,
            &MetadataFilter::default(),
            FilterOrder::CreatedDesc,
            total.max(0) as usize,
            0,
        )?;

        let mut categories: BTreeMap<String, i64> = BTreeMap::new();
        let mut keyword_counts: BTreeMap<String, i64> = BTreeMap::new();
        let mut facets: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
        for key in &self.descriptor.analyze_facets {
            facets.insert(key.clone(), BTreeMap::new());
        }

        for row in &rows {
            let fields = IndexFields::derive(&row.content, &row.metadata, &self.descriptor.id);
            for category in fields.categories {
                *categories.entry(category).or_default() += 1;
            }
            for keyword in extract_keywords(&row.content, 10) {
                *keyword_counts.entry(keyword).or_default() += 1;
            }
            for key in &self.descriptor.analyze_facets {
                if let Some(value) = row.metadata.get(key) {
                    let label = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    *facets
                        .get_mut(key)
                        .expect("facet key pre-inserted")
                        .entry(label)
                        .or_default() += 1;
                }
            }
        }

        let mut top_keywords: Vec<KeywordCount> = keyword_counts
            .into_iter()
            .map(|(keyword, count)| KeywordCount { keyword, count })
            .collect();
        top_keywords.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.keyword.cmp(&b.keyword)));
        top_keywords.truncate(options.top_keywords);

        Ok(ModuleAnalysis {
            module_id: self.descriptor.id.clone(),
            total_memories: total,
            categories,
            top_keywords,
            facets,
        })
    }
}

/// Join knn pairs with their hydrated rows, preserving knn order.
fn zip_hits(
    module_id: &str,
    pairs: &[(String, f32)],
    records: Vec<MemoryRecord>,
) -> Vec<MemoryHit> {
    let mut by_id: std::collections::HashMap<String, MemoryRecord> = records
        .into_iter()
        .map(|r| (r.id.clone(), r))
        .collect();
    pairs
        .iter()
        .filter_map(|(id, similarity)| {
            by_id.remove(id).map(|record| MemoryHit {
                id: record.id,
                module_id: module_id.to_string(),
                content: record.content,
                metadata: record.metadata,
                similarity: *similarity,
                updated_at: record.updated_at,
            })
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::cache::EmbeddingCache;
    use crate::embeddings::hashed::HashedEmbeddings;
    use crate::relationships::NewRelationship;
    use crate::storage::{Database, SqliteVectorStore};
    use serde_json::json;

    const DIM_FULL: usize = 64;
    const DIM_COMPRESSED: usize = 16;

    struct Fixture {
        _dir: tempfile::TempDir,
        module: MemoryModule,
        cmi: Arc<CmiIndex>,
        relationships: Arc<RelationshipStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(Some(dir.path().join("t.db")), 2).unwrap());
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(EmbeddingCache::new(
            Arc::new(HashedEmbeddings::new(DIM_FULL, DIM_COMPRESSED)),
            64,
        ));
        let cmi = Arc::new(CmiIndex::new(db.clone(), DIM_COMPRESSED));
        let relationships = Arc::new(RelationshipStore::new(db.clone()));
        let store: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::new(db, "work_memories", DIM_FULL).unwrap());
        let descriptor = registry::default_descriptors(DIM_FULL)
            .into_iter()
            .find(|d| d.id == "work")
            .unwrap();
        Fixture {
            _dir: dir,
            module: MemoryModule::new(
                descriptor,
                store,
                embeddings,
                cmi.clone(),
                relationships.clone(),
            ),
            cmi,
            relationships,
        }
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn store_round_trips_content_and_metadata() {
        let fx = fixture();
        let id = fx
            .module
            .store("u1", "Atlas kickoff notes", Some(json!({"projectName": "Atlas"})), &token())
            .await
            .unwrap();

        let record = fx.module.get("u1", &id).unwrap().unwrap();
        assert_eq!(record.content, "Atlas kickoff notes");
        assert_eq!(record.metadata["projectName"], "Atlas");
    }

    #[tokio::test]
    async fn store_writes_through_to_index() {
        let fx = fixture();
        let id = fx
            .module
            .store("u1", "Atlas kickoff notes", None, &token())
            .await
            .unwrap();

        let entry = fx.cmi.get_entry("u1", "work", &id).unwrap().unwrap();
        assert_eq!(entry.title, "Atlas kickoff notes");
        assert_eq!(entry.categories, vec!["work"]);
        assert_eq!(entry.embedding.len(), DIM_COMPRESSED);
        assert!((entry.importance_score - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn failed_index_write_compensates_the_row() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(Some(dir.path().join("t.db")), 1).unwrap());
        // Sabotage the index table so write-through must fail.
        db.with_writer(|conn| {
            conn.execute_batch("DROP TABLE memory_index")?;
            Ok(())
        })
        .unwrap();

        let embeddings: Arc<dyn EmbeddingProvider> =
            Arc::new(HashedEmbeddings::new(DIM_FULL, DIM_COMPRESSED));
        let cmi = Arc::new(CmiIndex::new(db.clone(), DIM_COMPRESSED));
        let relationships = Arc::new(RelationshipStore::new(db.clone()));
        let store: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::new(db, "work_memories", DIM_FULL).unwrap());
        let descriptor = registry::default_descriptors(DIM_FULL)
            .into_iter()
            .find(|d| d.id == "work")
            .unwrap();
        let module = MemoryModule::new(descriptor, store.clone(), embeddings, cmi, relationships);

        let err = module
            .store("u1", "doomed write", None, &token())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "StorageFailure");
        assert_eq!(store.count(Some("u1")).unwrap(), 0);
    }

    #[tokio::test]
    async fn content_update_reembeds_both_tiers() {
        let fx = fixture();
        let id = fx
            .module
            .store("u1", "original content here", None, &token())
            .await
            .unwrap();
        let row_before = fx.module.get("u1", &id).unwrap().unwrap();
        let cmi_before = fx.cmi.get_entry("u1", "work", &id).unwrap().unwrap();

        fx.module
            .update(
                "u1",
                &id,
                UpdateRequest {
                    content: Some("completely different words now".to_string()),
                    metadata: None,
                },
                &token(),
            )
            .await
            .unwrap();

        let row_after = fx.module.get("u1", &id).unwrap().unwrap();
        let cmi_after = fx.cmi.get_entry("u1", "work", &id).unwrap().unwrap();
        assert_ne!(row_before.embedding, row_after.embedding);
        assert_ne!(cmi_before.embedding, cmi_after.embedding);
        assert_eq!(cmi_after.title, "completely different words now");
    }

    #[tokio::test]
    async fn metadata_only_update_keeps_vectors_byte_identical() {
        let fx = fixture();
        let id = fx
            .module
            .store("u1", "stable content", Some(json!({"status": "draft"})), &token())
            .await
            .unwrap();
        let row_before = fx.module.get("u1", &id).unwrap().unwrap();
        let cmi_before = fx.cmi.get_entry("u1", "work", &id).unwrap().unwrap();

        let updated = fx
            .module
            .update(
                "u1",
                &id,
                UpdateRequest {
                    content: None,
                    metadata: Some(json!({"status": "final", "importanceScore": 0.8})),
                },
                &token(),
            )
            .await
            .unwrap();

        assert_eq!(updated.metadata["status"], "final");
        let row_after = fx.module.get("u1", &id).unwrap().unwrap();
        let cmi_after = fx.cmi.get_entry("u1", "work", &id).unwrap().unwrap();
        assert_eq!(row_before.embedding, row_after.embedding);
        assert_eq!(cmi_before.embedding, cmi_after.embedding);
        assert!((cmi_after.importance_score - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn repeated_content_update_is_idempotent() {
        let fx = fixture();
        let id = fx
            .module
            .store("u1", "first version", None, &token())
            .await
            .unwrap();

        let req = UpdateRequest {
            content: Some("second version".to_string()),
            metadata: None,
        };
        fx.module.update("u1", &id, req.clone(), &token()).await.unwrap();
        let after_first = fx.module.get("u1", &id).unwrap().unwrap();
        fx.module.update("u1", &id, req, &token()).await.unwrap();
        let after_second = fx.module.get("u1", &id).unwrap().unwrap();

        assert_eq!(after_first.content, after_second.content);
        assert_eq!(after_first.embedding, after_second.embedding);
    }

    #[tokio::test]
    async fn delete_cascades_relationships_index_and_row() {
        let fx = fixture();
        let id_m = fx.module.store("u1", "memory m", None, &token()).await.unwrap();
        let id_n = fx.module.store("u1", "memory n", None, &token()).await.unwrap();
        fx.relationships
            .create(
                "u1",
                NewRelationship {
                    source_module: "work".to_string(),
                    source_memory_id: id_m.clone(),
                    target_module: "work".to_string(),
                    target_memory_id: id_n.clone(),
                    relationship_type: "references".to_string(),
                    strength: 0.5,
                    metadata: json!({}),
                },
            )
            .unwrap();

        assert!(fx.module.delete("u1", &id_m).unwrap());
        assert!(fx.module.get("u1", &id_m).unwrap().is_none());
        assert!(fx.cmi.get_entry("u1", "work", &id_m).unwrap().is_none());
        assert!(fx.relationships.list_for("u1", "work", &id_m).unwrap().is_empty());

        // N and its index entry are untouched.
        assert!(fx.module.get("u1", &id_n).unwrap().is_some());
        assert!(fx.cmi.get_entry("u1", "work", &id_n).unwrap().is_some());

        // Second delete is a no-op success.
        assert!(!fx.module.delete("u1", &id_m).unwrap());
    }

    #[tokio::test]
    async fn search_finds_overlapping_text_and_bumps_access() {
        let fx = fixture();
        let id = fx
            .module
            .store("u1", "Handling CORS in Express", None, &token())
            .await
            .unwrap();
        fx.module
            .store("u1", "Quarterly budget review", None, &token())
            .await
            .unwrap();

        let hits = fx
            .module
            .search("u1", "CORS", SearchOptions::default(), &token())
            .await
            .unwrap();
        assert_eq!(hits[0].id, id);
        assert!(hits[0].similarity > 0.0);

        let record = fx.module.get_many("u1", &[id.clone()]).unwrap().remove(0);
        assert!(record.access_count >= 1);
        assert!(record.last_accessed.is_some());
    }

    #[tokio::test]
    async fn empty_content_and_query_rejected() {
        let fx = fixture();
        let err = fx.module.store("u1", "  ", None, &token()).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
        let err = fx
            .module
            .search("u1", "", SearchOptions::default(), &token())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }

    #[tokio::test]
    async fn cancelled_token_stops_store() {
        let fx = fixture();
        let token = CancellationToken::new();
        token.cancel();
        let err = fx
            .module
            .store("u1", "never stored", None, &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Cancelled");
        assert_eq!(fx.module.count(Some("u1")).unwrap(), 0);
    }

    #[tokio::test]
    async fn analyze_counts_agree_with_rows() {
        let fx = fixture();
        fx.module
            .store("u1", "Atlas planning doc", Some(json!({"projectName": "Atlas"})), &token())
            .await
            .unwrap();
        fx.module
            .store("u1", "Borealis retro notes", Some(json!({"projectName": "Borealis"})), &token())
            .await
            .unwrap();
        fx.module
            .store("u2", "someone else entirely", None, &token())
            .await
            .unwrap();

        let analysis = fx.module.analyze("u1", AnalyzeOptions::default()).unwrap();
        assert_eq!(analysis.total_memories, 2);
        assert_eq!(analysis.categories.get("work"), Some(&2));
        let projects = analysis.facets.get("projectName").unwrap();
        assert_eq!(projects.get("Atlas"), Some(&1));
        assert_eq!(projects.get("Borealis"), Some(&1));
    }
}

//! Federated router.
//!
//! The read/write front door over the module set. Writes are routed to one
//! module — explicitly or through the pure classifier — and reads fan out
//! from the Central Memory Index to the owning modules in two stages: coarse
//! compressed-vector candidates first, exact full-resolution re-ranking
//! second. A module that fails during fan-out is excluded from that response;
//! the index failing fails the whole call.

pub mod classify;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cancel::{bail_if_cancelled, checked};
use crate::cmi::CmiIndex;
use crate::embeddings::{compress_embedding, EmbeddingProvider, Tier};
use crate::error::{MemoryError, Result};
use crate::memory::{MemoryHit, MemoryRecord, RelationshipRecord};
use crate::module::registry::ModuleRegistry;
use crate::module::{MemoryModule, SearchOptions, UpdateRequest};
use crate::relationships::{NewRelationship, RelationshipStore};

pub use classify::{Classifier, DEFAULT_MODULE};

/// How many coarse candidates to pull per requested result.
const DEFAULT_FANOUT_FACTOR: usize = 3;

/// Outcome of a routed write.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreOutcome {
    pub memory_id: String,
    pub module_id: String,
}

/// A federated search request.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub limit: usize,
    /// Delegate the whole search to one module.
    pub module_id: Option<String>,
    /// Restrict the candidate set to a module subset.
    pub modules: Option<Vec<String>>,
}

pub struct Router {
    registry: Arc<ModuleRegistry>,
    cmi: Arc<CmiIndex>,
    relationships: Arc<RelationshipStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    classifier: Classifier,
    fanout_factor: usize,
}

impl Router {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        cmi: Arc<CmiIndex>,
        relationships: Arc<RelationshipStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let classifier = Classifier::new(&registry.descriptors())?;
        Ok(Self {
            registry,
            cmi,
            relationships,
            embeddings,
            classifier,
            fanout_factor: DEFAULT_FANOUT_FACTOR,
        })
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn cmi(&self) -> &Arc<CmiIndex> {
        &self.cmi
    }

    /// The pure classification function, exposed for probing and tests.
    pub fn classify(&self, content: &str, metadata: &Value) -> &str {
        self.classifier.classify(content, metadata)
    }

    fn module(&self, module_id: &str) -> Result<Arc<MemoryModule>> {
        self.registry.get(module_id).ok_or_else(|| {
            MemoryError::InvalidArgument(format!("unknown module: {module_id}"))
        })
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Route a write. Explicit module id wins; otherwise the classifier
    /// decides. Routing happens at creation only — a memory never moves.
    pub async fn store(
        &self,
        user_id: &str,
        content: &str,
        metadata: Option<Value>,
        module_id: Option<&str>,
        token: &CancellationToken,
    ) -> Result<StoreOutcome> {
        let module = match module_id {
            Some(id) => self.module(id)?,
            None => {
                let metadata_view = metadata.clone().unwrap_or(Value::Null);
                let chosen = self.classifier.classify(content, &metadata_view);
                self.module(chosen)?
            }
        };
        let memory_id = module.store(user_id, content, metadata, token).await?;
        Ok(StoreOutcome {
            memory_id,
            module_id: module.id().to_string(),
        })
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Federated search. Stage one ranks compressed candidates in the index;
    /// stage two re-ranks full-resolution rows in the owning modules.
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        request: SearchRequest,
        token: &CancellationToken,
    ) -> Result<Vec<MemoryHit>> {
        if query.trim().is_empty() {
            return Err(MemoryError::InvalidArgument(
                "query must not be empty".to_string(),
            ));
        }
        let limit = request.limit.clamp(1, 100);

        // A named module handles the whole search itself.
        if let Some(module_id) = &request.module_id {
            let module = self.module(module_id)?;
            return module
                .search(user_id, query, SearchOptions { limit, filter: None }, token)
                .await;
        }

        if let Some(modules) = &request.modules {
            for module_id in modules {
                self.module(module_id)?;
            }
        }

        let full = match checked(token, self.embeddings.embed(query, Tier::Full)).await {
            Ok(v) => v,
            Err(MemoryError::Cancelled) => return Err(MemoryError::Cancelled),
            Err(e) => {
                return Err(MemoryError::SearchUnavailable(format!(
                    "query embedding failed: {e}"
                )))
            }
        };
        let compressed = compress_embedding(&full, self.cmi.dimension());

        bail_if_cancelled(token)?;
        let candidates = self
            .cmi
            .knn(
                user_id,
                &compressed,
                limit * self.fanout_factor,
                request.modules.as_deref(),
            )
            .map_err(|e| MemoryError::SearchUnavailable(format!("index scan failed: {e}")))?;

        // Group candidate ids by owning module, preserving candidate order.
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for candidate in candidates {
            groups
                .entry(candidate.module_id)
                .or_default()
                .push(candidate.remote_memory_id);
        }

        // Stage two: parallel full-resolution re-ranking, one task per
        // module. A failing module is logged and excluded.
        let query_full = Arc::new(full);
        let mut join_set = tokio::task::JoinSet::new();
        for (module_id, ids) in groups {
            let Some(module) = self.registry.get(&module_id) else {
                tracing::warn!(module_id, "index entry references unregistered module");
                continue;
            };
            let user_id = user_id.to_string();
            let query_full = query_full.clone();
            let token = token.child_token();
            join_set.spawn(async move {
                if token.is_cancelled() {
                    return (module_id, Err(MemoryError::Cancelled));
                }
                let hits = module.rescore(&user_id, &ids, &query_full);
                (module_id, hits)
            });
        }

        let mut merged: Vec<MemoryHit> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            if token.is_cancelled() {
                join_set.abort_all();
                return Err(MemoryError::Cancelled);
            }
            match joined {
                Ok((_, Ok(hits))) => merged.extend(hits),
                Ok((module_id, Err(e))) => {
                    tracing::warn!(
                        module_id = %module_id,
                        error = %e,
                        "module_fanout_error: module excluded from this response"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "module_fanout_error: rescore task failed");
                }
            }
        }

        // Stable merge by full-resolution similarity; deterministic ties.
        merged.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        merged.truncate(limit);

        // Best-effort access bookkeeping for the rows actually returned.
        let mut returned: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for hit in &merged {
            returned
                .entry(hit.module_id.clone())
                .or_default()
                .push(hit.id.clone());
        }
        for (module_id, ids) in returned {
            if let Some(module) = self.registry.get(&module_id) {
                module.touch(user_id, &ids);
            }
        }

        Ok(merged)
    }

    /// Resolve a bare memory id to its module and row.
    pub fn get(&self, user_id: &str, memory_id: &str) -> Result<Option<(String, MemoryRecord)>> {
        let Some(module_id) = self.cmi.resolve(user_id, memory_id)? else {
            return Ok(None);
        };
        let Some(module) = self.registry.get(&module_id) else {
            return Ok(None);
        };
        Ok(module
            .get(user_id, memory_id)?
            .map(|record| (module_id, record)))
    }

    /// Update by bare memory id. Never re-routes.
    pub async fn update(
        &self,
        user_id: &str,
        memory_id: &str,
        request: UpdateRequest,
        token: &CancellationToken,
    ) -> Result<(String, MemoryRecord)> {
        let module_id = self
            .cmi
            .resolve(user_id, memory_id)?
            .ok_or_else(|| MemoryError::NotFound(format!("memory {memory_id}")))?;
        let module = self.module(&module_id)?;
        let record = module.update(user_id, memory_id, request, token).await?;
        Ok((module_id, record))
    }

    /// Delete by bare memory id. Idempotent: unknown ids are a no-op success.
    pub fn delete(&self, user_id: &str, memory_id: &str) -> Result<bool> {
        let Some(module_id) = self.cmi.resolve(user_id, memory_id)? else {
            return Ok(false);
        };
        let Some(module) = self.registry.get(&module_id) else {
            return Ok(false);
        };
        module.delete(user_id, memory_id)
    }

    // ========================================================================
    // RELATIONSHIPS
    // ========================================================================

    /// Create a relationship after verifying both endpoints are live.
    pub fn create_relationship(
        &self,
        user_id: &str,
        input: NewRelationship,
    ) -> Result<RelationshipRecord> {
        for (module_id, memory_id) in [
            (&input.source_module, &input.source_memory_id),
            (&input.target_module, &input.target_memory_id),
        ] {
            if self.cmi.get_entry(user_id, module_id, memory_id)?.is_none() {
                return Err(MemoryError::NotFound(format!(
                    "memory {memory_id} in module {module_id}"
                )));
            }
        }
        self.relationships.create(user_id, input)
    }

    pub fn list_relationships(
        &self,
        user_id: &str,
        module_id: &str,
        memory_id: &str,
    ) -> Result<Vec<RelationshipRecord>> {
        self.relationships.list_for(user_id, module_id, memory_id)
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Idempotent reindex sweep; restores index coverage after failed
    /// write-throughs.
    pub fn reindex(&self) -> Result<crate::cmi::RebuildReport> {
        self.cmi.rebuild(&self.registry.store_adapters())
    }
}

// ============================================================================
// TESTS
// ============================================================================

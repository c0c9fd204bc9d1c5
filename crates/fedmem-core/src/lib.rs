//! # Federated Memory Core
//!
//! Multi-user storage and retrieval engine for LLM memories. A user's corpus
//! is partitioned across topical modules — technical, personal, work,
//! learning, communication, creative — each owning a full-resolution vector
//! table, while a single Central Memory Index holds a compressed summary of
//! every memory for cross-module routing.
//!
//! - **Embedding pipeline**: two vector tiers (full + compressed), batched,
//!   cached with single-flight coalescing, retried with backoff
//! - **Module storage**: per-module vector+metadata stores with write-through
//!   index updates, delete cascades, and analytic aggregation
//! - **Federated router**: pure rule-based write classification and two-stage
//!   federated search (coarse index candidates, exact module re-ranking)
//! - **Auth**: opaque URL tokens, API keys, and externally validated OAuth
//!   bearers resolved into one `UserContext`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fedmem_core::prelude::*;
//!
//! let db = Arc::new(Database::open(None, 4)?);
//! let embeddings: Arc<dyn EmbeddingProvider> =
//!     Arc::new(HashedEmbeddings::new(1536, 512));
//! let cmi = Arc::new(CmiIndex::new(db.clone(), 512));
//! let relationships = Arc::new(RelationshipStore::new(db.clone()));
//! let registry = Arc::new(build_registry(
//!     db, embeddings.clone(), cmi.clone(), relationships.clone(),
//!     default_descriptors(1536),
//! )?);
//! let router = Router::new(registry, cmi, relationships, embeddings)?;
//!
//! let outcome = router.store(&user, "kickoff notes", None, None, &token).await?;
//! let hits = router.search(&user, "kickoff", SearchRequest::default(), &token).await?;
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod auth;
pub mod cancel;
pub mod categories;
pub mod cmi;
pub mod embeddings;
pub mod error;
pub mod memory;
pub mod module;
pub mod relationships;
pub mod router;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use auth::{
    ApiKeyStore, AuthResolver, Credential, StaticTokenAuthority, TokenAuthority, UserContext,
    UserRecord, UserStore, ValidatedToken, API_KEY_PREFIX,
};
pub use categories::{CategoryRecord, CategoryStore};
pub use cmi::{CmiCandidate, CmiIndex, RebuildReport, IMPORTANCE_WEIGHT};
pub use embeddings::{
    cache::EmbeddingCache, compress_embedding, cosine_similarity, hashed::HashedEmbeddings,
    remote::{OpenAiEmbeddings, RemoteEmbeddingConfig}, EmbeddingProvider, Tier,
};
pub use error::{MemoryError, Result};
pub use memory::{
    ClassifyHints, CmiEntry, IndexFields, MemoryHit, MemoryRecord, ModuleDescriptor,
    RelationshipRecord,
};
pub use module::registry::{build_registry, default_descriptors, ModuleRegistry};
pub use module::{
    AnalyzeOptions, MemoryModule, ModuleAnalysis, SearchOptions, UpdateRequest,
};
pub use relationships::{NewRelationship, RelationshipStore};
pub use router::{Classifier, Router, SearchRequest, StoreOutcome, DEFAULT_MODULE};
pub use storage::{
    Database, FilterOrder, MetadataFilter, RowUpdate, SqliteVectorStore, TableStats, VectorStore,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default full-resolution embedding dimension
pub const DEFAULT_DIMENSION_FULL: usize = 1536;

/// Default compressed (index) embedding dimension
pub const DEFAULT_DIMENSION_COMPRESSED: usize = 512;

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::{
        build_registry, default_descriptors, AuthResolver, CmiIndex, Credential, Database,
        EmbeddingCache, EmbeddingProvider, HashedEmbeddings, MemoryError, MemoryHit,
        MemoryRecord, ModuleRegistry, RelationshipStore, Result, Router, SearchRequest,
        StoreOutcome, Tier, UpdateRequest, UserContext, UserStore,
    };
    pub use tokio_util::sync::CancellationToken;
}

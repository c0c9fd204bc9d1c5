//! Test harness.
//!
//! Builds a complete server stack on a throwaway database with deterministic
//! hashed embeddings: module registry, central index, router, session
//! manager. Variants can sabotage individual module stores to exercise
//! fan-out containment.

use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use fedmem_core::{
    default_descriptors, CmiIndex, Database, EmbeddingCache, EmbeddingProvider, HashedEmbeddings,
    MemoryError, MemoryModule, MemoryRecord, ModuleRegistry, RelationshipStore, Router,
    SqliteVectorStore, StaticTokenAuthority, UserContext, VectorStore,
};
use fedmem_mcp::config::ServerConfig;
use fedmem_mcp::session::SessionManager;
use fedmem_mcp::state::AppState;

/// Small dimensions keep the brute-force scans fast.
pub const DIM_FULL: usize = 64;
pub const DIM_COMPRESSED: usize = 16;

pub struct TestStack {
    pub dir: TempDir,
    pub state: Arc<AppState>,
    pub sessions: Arc<SessionManager>,
}

impl TestStack {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir);
        let state = AppState::bootstrap_with(
            config,
            Arc::new(HashedEmbeddings::new(DIM_FULL, DIM_COMPRESSED)),
            Arc::new(StaticTokenAuthority),
        )
        .expect("bootstrap");
        let sessions = SessionManager::new(state.clone());
        Self {
            dir,
            state,
            sessions,
        }
    }

    /// A stack whose `learning` module store errors on every read, while
    /// still accepting writes — the shape of a half-broken adapter.
    pub fn with_failing_learning() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(&dir);
        let db = Arc::new(
            Database::open(config.database_path.clone(), config.db_pool_max).expect("db"),
        );
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(EmbeddingCache::new(
            Arc::new(HashedEmbeddings::new(DIM_FULL, DIM_COMPRESSED)),
            256,
        ));
        let cmi = Arc::new(CmiIndex::new(db.clone(), DIM_COMPRESSED));
        let relationships = Arc::new(RelationshipStore::new(db.clone()));

        let mut modules = Vec::new();
        for descriptor in default_descriptors(DIM_FULL) {
            let store: Arc<dyn VectorStore> = if descriptor.id == "learning" {
                Arc::new(ReadFailingStore {
                    inner: SqliteVectorStore::new(
                        db.clone(),
                        &descriptor.table_name,
                        descriptor.embedding_dimension,
                    )
                    .expect("store"),
                })
            } else {
                Arc::new(
                    SqliteVectorStore::new(
                        db.clone(),
                        &descriptor.table_name,
                        descriptor.embedding_dimension,
                    )
                    .expect("store"),
                )
            };
            modules.push(Arc::new(MemoryModule::new(
                descriptor,
                store,
                embeddings.clone(),
                cmi.clone(),
                relationships.clone(),
            )));
        }
        let registry = Arc::new(ModuleRegistry::new(modules).expect("registry"));
        let router = Arc::new(
            Router::new(
                registry.clone(),
                cmi.clone(),
                relationships.clone(),
                embeddings,
            )
            .expect("router"),
        );

        let categories = Arc::new(fedmem_core::CategoryStore::new(db.clone()));
        let users = Arc::new(fedmem_core::UserStore::new(db.clone()));
        let auth = Arc::new(fedmem_core::AuthResolver::new(
            db.clone(),
            Arc::new(StaticTokenAuthority),
        ));

        let state = Arc::new(AppState {
            config,
            db,
            router,
            registry,
            cmi,
            relationships,
            categories,
            users,
            auth,
        });
        let sessions = SessionManager::new(state.clone());
        Self {
            dir,
            state,
            sessions,
        }
    }

    /// Create a fresh user and return its context.
    pub fn user(&self, name: &str) -> UserContext {
        let record = self
            .state
            .users
            .create(Some(&format!("{name}@example.com")), Some(name))
            .expect("create user");
        UserContext::from(&record)
    }

    /// Create a fresh user and return both the context and the opaque token.
    pub fn user_with_token(&self, name: &str) -> (UserContext, String) {
        let record = self
            .state
            .users
            .create(Some(&format!("{name}@example.com")), Some(name))
            .expect("create user");
        let token = record.opaque_token.clone();
        (UserContext::from(&record), token)
    }
}

impl Default for TestStack {
    fn default() -> Self {
        Self::new()
    }
}

fn test_config(dir: &TempDir) -> ServerConfig {
    ServerConfig {
        database_path: Some(dir.path().join("fedmem-test.db")),
        dimension_full: DIM_FULL,
        dimension_compressed: DIM_COMPRESSED,
        ..Default::default()
    }
}

pub fn token() -> CancellationToken {
    CancellationToken::new()
}

/// Accepts writes, fails every read path.
struct ReadFailingStore {
    inner: SqliteVectorStore,
}

impl VectorStore for ReadFailingStore {
    fn table_name(&self) -> &str {
        self.inner.table_name()
    }
    fn insert(&self, row: &MemoryRecord) -> fedmem_core::Result<()> {
        self.inner.insert(row)
    }
    fn get_by_id(&self, _u: &str, _id: &str) -> fedmem_core::Result<Option<MemoryRecord>> {
        Err(MemoryError::StorageFailure("adapter down".into()))
    }
    fn get_many(&self, _u: &str, _ids: &[String]) -> fedmem_core::Result<Vec<MemoryRecord>> {
        Err(MemoryError::StorageFailure("adapter down".into()))
    }
    fn update(
        &self,
        _u: &str,
        _id: &str,
        _f: &fedmem_core::RowUpdate,
    ) -> fedmem_core::Result<Option<MemoryRecord>> {
        Err(MemoryError::StorageFailure("adapter down".into()))
    }
    fn delete(&self, user_id: &str, id: &str) -> fedmem_core::Result<bool> {
        self.inner.delete(user_id, id)
    }
    fn knn_search(
        &self,
        _u: &str,
        _q: &[f32],
        _k: usize,
        _f: Option<&fedmem_core::MetadataFilter>,
    ) -> fedmem_core::Result<Vec<(String, f32)>> {
        Err(MemoryError::StorageFailure("adapter down".into()))
    }
    fn filter_scan(
        &self,
        _u: &str,
        _f: &fedmem_core::MetadataFilter,
        _o: fedmem_core::FilterOrder,
        _l: usize,
        _of: usize,
    ) -> fedmem_core::Result<Vec<MemoryRecord>> {
        Err(MemoryError::StorageFailure("adapter down".into()))
    }
    fn record_access(
        &self,
        _u: &str,
        _ids: &[String],
        _at: chrono::DateTime<chrono::Utc>,
    ) -> fedmem_core::Result<()> {
        Ok(())
    }
    fn scan_all(&self, limit: usize, offset: usize) -> fedmem_core::Result<Vec<MemoryRecord>> {
        self.inner.scan_all(limit, offset)
    }
    fn count(&self, user_id: Option<&str>) -> fedmem_core::Result<i64> {
        self.inner.count(user_id)
    }
    fn stats(&self, _u: &str) -> fedmem_core::Result<fedmem_core::TableStats> {
        Err(MemoryError::StorageFailure("adapter down".into()))
    }
}

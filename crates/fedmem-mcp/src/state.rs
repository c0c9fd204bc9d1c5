//! Shared application state.
//!
//! One [`AppState`] per process, built at startup and shared by every
//! session. Tool handlers receive the session's `UserContext` by parameter —
//! never through globals.

use std::sync::Arc;

use anyhow::Context;

use fedmem_core::{
    build_registry, default_descriptors, AuthResolver, CategoryStore, CmiIndex, Database,
    EmbeddingCache, EmbeddingProvider, HashedEmbeddings, ModuleRegistry, OpenAiEmbeddings,
    RelationshipStore, RemoteEmbeddingConfig, Router, StaticTokenAuthority, TokenAuthority,
    UserStore,
};

use crate::config::{EmbeddingProviderKind, ServerConfig};

pub struct AppState {
    pub config: ServerConfig,
    pub db: Arc<Database>,
    pub router: Arc<Router>,
    pub registry: Arc<ModuleRegistry>,
    pub cmi: Arc<CmiIndex>,
    pub relationships: Arc<RelationshipStore>,
    pub categories: Arc<CategoryStore>,
    pub users: Arc<UserStore>,
    pub auth: Arc<AuthResolver>,
}

impl AppState {
    /// Production bootstrap: provider chosen from config, deny-all token
    /// authority.
    pub fn bootstrap(config: ServerConfig) -> anyhow::Result<Arc<Self>> {
        let embeddings: Arc<dyn EmbeddingProvider> = match config.embedding_provider {
            EmbeddingProviderKind::OpenAi => Arc::new(
                OpenAiEmbeddings::new(RemoteEmbeddingConfig {
                    api_key: config.openai_api_key.clone(),
                    model: config.embedding_model.clone(),
                    dimension_full: config.dimension_full,
                    dimension_compressed: config.dimension_compressed,
                    ..Default::default()
                })
                .context("building embedding client")?,
            ),
            EmbeddingProviderKind::Hashed => Arc::new(HashedEmbeddings::new(
                config.dimension_full,
                config.dimension_compressed,
            )),
        };
        Self::bootstrap_with(config, embeddings, Arc::new(StaticTokenAuthority))
    }

    /// Bootstrap with injected provider and token authority (tests, custom
    /// deployments).
    pub fn bootstrap_with(
        config: ServerConfig,
        provider: Arc<dyn EmbeddingProvider>,
        authority: Arc<dyn TokenAuthority>,
    ) -> anyhow::Result<Arc<Self>> {
        let db = Arc::new(
            Database::open(config.database_path.clone(), config.db_pool_max)
                .context("opening database")?,
        );

        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(EmbeddingCache::new(
            provider,
            config.embedding_cache_size,
        ));

        let cmi = Arc::new(CmiIndex::new(db.clone(), config.dimension_compressed));
        let relationships = Arc::new(RelationshipStore::new(db.clone()));
        let registry = Arc::new(
            build_registry(
                db.clone(),
                embeddings.clone(),
                cmi.clone(),
                relationships.clone(),
                default_descriptors(config.dimension_full),
            )
            .context("building module registry")?,
        );
        let router = Arc::new(
            Router::new(
                registry.clone(),
                cmi.clone(),
                relationships.clone(),
                embeddings,
            )
            .context("building router")?,
        );

        let categories = Arc::new(CategoryStore::new(db.clone()));
        let users = Arc::new(UserStore::new(db.clone()));
        let auth = Arc::new(AuthResolver::new(db.clone(), authority));

        tracing::info!(
            modules = registry.len(),
            dim_full = config.dimension_full,
            dim_compressed = config.dimension_compressed,
            "application state ready"
        );

        Ok(Arc::new(Self {
            config,
            db,
            router,
            registry,
            cmi,
            relationships,
            categories,
            users,
            auth,
        }))
    }
}

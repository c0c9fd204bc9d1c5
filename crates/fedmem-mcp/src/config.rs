//! Server configuration.
//!
//! Everything comes from the environment with sensible defaults; no config
//! file is required. The env lookup is injectable so tests can exercise
//! overrides without touching the process environment.

use std::path::PathBuf;
use std::time::Duration;

/// Which embedding provider to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProviderKind {
    /// OpenAI-compatible remote API (requires `OPENAI_API_KEY`).
    OpenAi,
    /// Deterministic local token-hash embeddings.
    Hashed,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Self URL embedded in WWW-Authenticate and discovery documents.
    pub base_url: String,
    /// SQLite database path. `None` = platform data directory.
    pub database_path: Option<PathBuf>,
    /// Bind address for the HTTP transports.
    pub bind_addr: String,
    pub embedding_provider: EmbeddingProviderKind,
    pub openai_api_key: String,
    pub embedding_model: String,
    pub dimension_full: usize,
    pub dimension_compressed: usize,
    /// Sessions idle longer than this are closed by the sweeper.
    pub session_idle_timeout: Duration,
    /// Hard deadline for one tool invocation.
    pub tool_deadline: Duration,
    /// Reader connection pool bound.
    pub db_pool_max: usize,
    /// Embedding cache capacity (vectors).
    pub embedding_cache_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8787".to_string(),
            database_path: None,
            bind_addr: "127.0.0.1:8787".to_string(),
            embedding_provider: EmbeddingProviderKind::Hashed,
            openai_api_key: String::new(),
            embedding_model: "text-embedding-3-small".to_string(),
            dimension_full: fedmem_core::DEFAULT_DIMENSION_FULL,
            dimension_compressed: fedmem_core::DEFAULT_DIMENSION_COMPRESSED,
            session_idle_timeout: Duration::from_secs(600),
            tool_deadline: Duration::from_secs(30),
            db_pool_max: 4,
            embedding_cache_size: 2048,
        }
    }
}

impl ServerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key))
    }

    /// Load using a custom env lookup function.
    pub fn from_env_with(
        env: impl Fn(&str) -> Result<String, std::env::VarError>,
    ) -> Self {
        let mut config = Self::default();

        if let Ok(val) = env("BASE_URL") {
            config.base_url = val.trim_end_matches('/').to_string();
        }
        if let Ok(val) = env("DATABASE_URL") {
            // Accept both a bare path and a sqlite: URL.
            let path = val
                .strip_prefix("sqlite://")
                .or_else(|| val.strip_prefix("sqlite:"))
                .unwrap_or(&val);
            config.database_path = Some(PathBuf::from(path));
        }
        if let Ok(val) = env("FEDMEM_BIND_ADDR") {
            config.bind_addr = val;
        }
        if let Ok(val) = env("OPENAI_API_KEY") {
            config.openai_api_key = val;
            config.embedding_provider = EmbeddingProviderKind::OpenAi;
        }
        if let Ok(val) = env("EMBEDDING_PROVIDER") {
            config.embedding_provider = match val.as_str() {
                "openai" => EmbeddingProviderKind::OpenAi,
                _ => EmbeddingProviderKind::Hashed,
            };
        }
        if let Ok(val) = env("EMBEDDING_MODEL") {
            config.embedding_model = val;
        }
        if let Ok(val) = env("EMBEDDING_DIMENSION_FULL") {
            if let Ok(dim) = val.parse() {
                config.dimension_full = dim;
            }
        }
        if let Ok(val) = env("EMBEDDING_DIMENSION_COMPRESSED") {
            if let Ok(dim) = val.parse() {
                config.dimension_compressed = dim;
            }
        }
        if let Ok(val) = env("SESSION_IDLE_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                config.session_idle_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(val) = env("TOOL_DEADLINE") {
            if let Ok(secs) = val.parse() {
                config.tool_deadline = Duration::from_secs(secs);
            }
        }
        if let Ok(val) = env("DB_POOL_MAX") {
            if let Ok(n) = val.parse() {
                config.db_pool_max = n;
            }
        }

        config
    }
}

//! Error taxonomy for the memory engine.
//!
//! Every failure that can cross a tool or transport boundary is one of these
//! kinds; the MCP layer maps them onto JSON-RPC error payloads by `kind()`.

use thiserror::Error;

/// Engine error type. One variant per externally observable failure kind.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A private operation was invoked without a resolved user context.
    #[error("authentication required")]
    AuthenticationRequired,
    /// Memory, module, or user does not exist or is not owned by the caller.
    #[error("not found: {0}")]
    NotFound(String),
    /// Input failed validation: unknown module, bad schema, dimension mismatch.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The upstream embedding service exhausted its retry budget.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),
    /// A vector-store write failed after best-effort compensation.
    #[error("storage failure: {0}")]
    StorageFailure(String),
    /// Federated routing could not produce any candidate set.
    #[error("search unavailable: {0}")]
    SearchUnavailable(String),
    /// The owning session closed or the deadline elapsed.
    #[error("operation cancelled")]
    Cancelled,
}

impl MemoryError {
    /// Stable wire identifier carried in JSON-RPC `data.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            MemoryError::AuthenticationRequired => "AuthenticationRequired",
            MemoryError::NotFound(_) => "NotFound",
            MemoryError::InvalidArgument(_) => "InvalidArgument",
            MemoryError::EmbeddingUnavailable(_) => "EmbeddingUnavailable",
            MemoryError::StorageFailure(_) => "StorageFailure",
            MemoryError::SearchUnavailable(_) => "SearchUnavailable",
            MemoryError::Cancelled => "Cancelled",
        }
    }
}

impl From<rusqlite::Error> for MemoryError {
    fn from(e: rusqlite::Error) -> Self {
        MemoryError::StorageFailure(e.to_string())
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::StorageFailure(format!("metadata serialization: {e}"))
    }
}

/// Engine result type.
pub type Result<T> = std::result::Result<T, MemoryError>;

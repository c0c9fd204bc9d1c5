//! Embedding pipeline.
//!
//! Two tiers of vectors: `full` (stored in the module tables, default 1536
//! dimensions) and `compressed` (stored only in the Central Memory Index,
//! default 512). The compressed tier is always derived from the full tier by
//! [`compress_embedding`] — one compression function per deployment.
//!
//! Providers:
//! - [`remote::OpenAiEmbeddings`]: OpenAI-compatible HTTP API, retried with
//!   exponential backoff.
//! - [`hashed::HashedEmbeddings`]: deterministic feature-hashed bag-of-words
//!   for offline deployments and tests.
//! - [`cache::EmbeddingCache`]: bounded LRU + single-flight wrapper around
//!   either.

pub mod cache;
pub mod hashed;
pub mod remote;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;

// ============================================================================
// TIERS
// ============================================================================

/// Embedding resolution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Full-resolution vector stored in the owning module's table.
    Full,
    /// Compressed vector stored only in the Central Memory Index.
    Compressed,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Full => "full",
            Tier::Compressed => "compressed",
        }
    }
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Text-to-vector provider.
///
/// Determinism contract: identical `(text, tier, model_version)` yields an
/// identical vector for the lifetime of the cache in front of the provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts at the given tier, one vector per input, in
    /// input order.
    async fn embed_batch(&self, texts: &[String], tier: Tier) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str, tier: Tier) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()], tier).await?;
        Ok(vectors.pop().unwrap_or_default())
    }

    /// Vector dimension for the tier.
    fn dimensions(&self, tier: Tier) -> usize;

    /// Model identity, part of the cache key.
    fn model_version(&self) -> &str;
}

// ============================================================================
// COMPRESSION
// ============================================================================

/// Derive a compressed vector from a full-resolution one: head truncation to
/// `dim` followed by L2 renormalization. This is the single compression
/// function in a deployment; the index and the modules must agree on it.
pub fn compress_embedding(full: &[f32], dim: usize) -> Vec<f32> {
    let mut vector: Vec<f32> = full.iter().copied().take(dim).collect();
    vector.resize(dim, 0.0);
    l2_normalize(&mut vector);
    vector
}

/// Normalize in place to unit length. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

// ============================================================================
// SIMILARITY AND BYTES
// ============================================================================

/// Cosine similarity between two vectors. Mismatched lengths score 0.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot_product / denominator
    } else {
        0.0
    }
}

/// Convert a vector to little-endian bytes for BLOB storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Restore a vector from BLOB bytes. `None` on length corruption.
pub fn embedding_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

// ============================================================================
// CACHE KEYS
// ============================================================================

/// Cache key: sha256 over model version, tier, and text.
pub fn cache_key(model_version: &str, tier: Tier, text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(model_version.as_bytes());
    hasher.update([0u8]);
    hasher.update(tier.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

// ============================================================================
// TESTS
// ============================================================================

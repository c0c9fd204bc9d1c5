//! Deterministic hashed embeddings.
//!
//! Feature-hashed bag-of-words: each token is hashed into one dimension with
//! a hash-derived sign, then the vector is L2-normalized. No model downloads,
//! no network, fully deterministic — the last-resort provider for offline
//! deployments and the default for tests. Texts sharing tokens get positive
//! cosine similarity; disjoint texts score near zero.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{compress_embedding, l2_normalize, EmbeddingProvider, Tier};
use crate::error::{MemoryError, Result};

/// Deterministic token-hash embedding provider.
pub struct HashedEmbeddings {
    dimension_full: usize,
    dimension_compressed: usize,
}

impl HashedEmbeddings {
    pub fn new(dimension_full: usize, dimension_compressed: usize) -> Self {
        Self {
            dimension_full,
            dimension_compressed,
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension_full];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let hash = u64::from_le_bytes(digest[..8].try_into().expect("8 bytes"));
            let idx = (hash % self.dimension_full as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashedEmbeddings {
    async fn embed_batch(&self, texts: &[String], tier: Tier) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(MemoryError::InvalidArgument(
                "cannot embed empty text".to_string(),
            ));
        }
        let full: Vec<Vec<f32>> = texts.iter().map(|t| self.embed_text(t)).collect();
        match tier {
            Tier::Full => Ok(full),
            Tier::Compressed => Ok(full
                .iter()
                .map(|v| compress_embedding(v, self.dimension_compressed))
                .collect()),
        }
    }

    fn dimensions(&self, tier: Tier) -> usize {
        match tier {
            Tier::Full => self.dimension_full,
            Tier::Compressed => self.dimension_compressed,
        }
    }

    fn model_version(&self) -> &str {
        "hashed-bow-v1"
    }
}

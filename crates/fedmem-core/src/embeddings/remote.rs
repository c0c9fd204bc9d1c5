//! Remote embedding provider.
//!
//! Client for an OpenAI-compatible `/v1/embeddings` endpoint. Transient
//! failures (connect errors, timeouts, 429, 5xx) are retried with exponential
//! backoff up to a bounded attempt count; terminal failure surfaces as
//! `EmbeddingUnavailable` so the caller can roll back the write.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{compress_embedding, EmbeddingProvider, Tier};
use crate::error::{MemoryError, Result};

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded retry budget.
const DEFAULT_ATTEMPTS: u32 = 3;

/// Initial backoff; doubles per attempt.
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Configuration for the remote provider.
#[derive(Debug, Clone)]
pub struct RemoteEmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub dimension_full: usize,
    pub dimension_compressed: usize,
    pub timeout: Duration,
    pub attempts: u32,
}

impl Default for RemoteEmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
            dimension_full: 1536,
            dimension_compressed: 512,
            timeout: DEFAULT_TIMEOUT,
            attempts: DEFAULT_ATTEMPTS,
        }
    }
}

/// OpenAI-compatible embedding client.
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    config: RemoteEmbeddingConfig,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    pub fn new(config: RemoteEmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MemoryError::EmbeddingUnavailable(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    /// One attempt against the upstream API.
    async fn request_full(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, Attempt> {
        let body = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            dimensions: self.config.dimension_full,
        };
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.config.base_url.trim_end_matches('/')))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Attempt::Transient(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(Attempt::Transient(format!("upstream status {status}")));
        }
        if !status.is_success() {
            return Err(Attempt::Terminal(format!("upstream status {status}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Attempt::Terminal(format!("decode response: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(Attempt::Terminal(format!(
                "expected {} vectors, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut vectors = vec![Vec::new(); texts.len()];
        for datum in parsed.data {
            if datum.index >= vectors.len() {
                return Err(Attempt::Terminal(format!("out-of-range index {}", datum.index)));
            }
            vectors[datum.index] = datum.embedding;
        }
        Ok(vectors)
    }

    async fn embed_full(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut backoff = BACKOFF_BASE;
        let mut last_error = String::new();
        for attempt in 1..=self.config.attempts.max(1) {
            match self.request_full(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(Attempt::Terminal(msg)) => {
                    return Err(MemoryError::EmbeddingUnavailable(msg));
                }
                Err(Attempt::Transient(msg)) => {
                    tracing::warn!(attempt, error = %msg, "embedding request failed, retrying");
                    last_error = msg;
                    if attempt < self.config.attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(MemoryError::EmbeddingUnavailable(format!(
            "retries exhausted: {last_error}"
        )))
    }
}

enum Attempt {
    Transient(String),
    Terminal(String),
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed_batch(&self, texts: &[String], tier: Tier) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(MemoryError::InvalidArgument(
                "cannot embed empty text".to_string(),
            ));
        }
        let full = self.embed_full(texts).await?;
        match tier {
            Tier::Full => Ok(full),
            Tier::Compressed => Ok(full
                .iter()
                .map(|v| compress_embedding(v, self.config.dimension_compressed))
                .collect()),
        }
    }

    fn dimensions(&self, tier: Tier) -> usize {
        match tier {
            Tier::Full => self.config.dimension_full,
            Tier::Compressed => self.config.dimension_compressed,
        }
    }

    fn model_version(&self) -> &str {
        &self.config.model
    }
}

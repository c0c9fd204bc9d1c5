//! Embedding cache.
//!
//! Bounded LRU over completed vectors plus single-flight coalescing: while a
//! key is being computed, concurrent requests for the same key wait for that
//! flight instead of calling upstream again. Batch calls partition into
//! cached, in-flight, and owned keys, and make at most one upstream call for
//! the owned set.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::watch;

use super::{cache_key, EmbeddingProvider, Tier};
use crate::error::Result;

type Key = [u8; 32];

/// Caching, coalescing wrapper around any [`EmbeddingProvider`].
pub struct EmbeddingCache {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<Key, Arc<Vec<f32>>>>,
    /// Keys currently being computed. The owner holds the sender; waiters
    /// wake when it is dropped.
    in_flight: tokio::sync::Mutex<HashMap<Key, watch::Receiver<()>>>,
}

impl EmbeddingCache {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity >= 1");
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            in_flight: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    fn cache_get(&self, key: &Key) -> Option<Arc<Vec<f32>>> {
        self.cache
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(key).cloned())
    }

    fn cache_put(&self, key: Key, vector: Arc<Vec<f32>>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, vector);
        }
    }

    /// Number of cached vectors (test hook).
    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingCache {
    async fn embed_batch(&self, texts: &[String], tier: Tier) -> Result<Vec<Vec<f32>>> {
        let model = self.inner.model_version().to_string();
        let keys: Vec<Key> = texts
            .iter()
            .map(|t| cache_key(&model, tier, t))
            .collect();
        let mut results: Vec<Option<Arc<Vec<f32>>>> = vec![None; texts.len()];

        loop {
            // Phase 1: fill from the completed cache.
            for (i, key) in keys.iter().enumerate() {
                if results[i].is_none() {
                    results[i] = self.cache_get(key);
                }
            }
            if results.iter().all(Option::is_some) {
                return Ok(results
                    .into_iter()
                    .map(|v| v.expect("checked").as_ref().clone())
                    .collect());
            }

            // Phase 2: claim missing keys or find their running flights.
            let mut owned: Vec<usize> = Vec::new();
            let mut owned_keys: Vec<Key> = Vec::new();
            let mut senders: Vec<watch::Sender<()>> = Vec::new();
            let mut waiters: Vec<watch::Receiver<()>> = Vec::new();
            {
                let mut in_flight = self.in_flight.lock().await;
                for (i, key) in keys.iter().enumerate() {
                    if results[i].is_some() || owned_keys.contains(key) {
                        continue;
                    }
                    match in_flight.get(key) {
                        Some(rx) => waiters.push(rx.clone()),
                        None => {
                            let (tx, rx) = watch::channel(());
                            in_flight.insert(*key, rx);
                            owned.push(i);
                            owned_keys.push(*key);
                            senders.push(tx);
                        }
                    }
                }
            }

            // Phase 3: one upstream call for everything we own.
            if !owned.is_empty() {
                let owned_texts: Vec<String> =
                    owned.iter().map(|&i| texts[i].clone()).collect();
                let outcome = self.inner.embed_batch(&owned_texts, tier).await;

                {
                    let mut in_flight = self.in_flight.lock().await;
                    for key in &owned_keys {
                        in_flight.remove(key);
                    }
                }
                drop(senders); // wakes every waiter on these keys

                let vectors = outcome?;
                for (slot, vector) in owned.iter().zip(vectors) {
                    let vector = Arc::new(vector);
                    self.cache_put(keys[*slot], vector.clone());
                    results[*slot] = Some(vector);
                }
                continue;
            }

            // Phase 4: nothing to own — wait for someone else's flight. A
            // closed channel means the flight finished (or failed); re-check.
            for mut rx in waiters {
                let _ = rx.changed().await;
            }
        }
    }

    fn dimensions(&self, tier: Tier) -> usize {
        self.inner.dimensions(tier)
    }

    fn model_version(&self) -> &str {
        self.inner.model_version()
    }
}

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::application::EmbeddingService;
use crate::domain::{content_hash, l2_normalize, EmbeddingConfig, IndexError, OpContext};

/// Model-failure retry bounds: 3 attempts with exponential backoff.
const EMBED_ATTEMPTS: u32 = 3;
const EMBED_BACKOFF_BASE_MS: u64 = 100;

/// Batching, deduplicating cache wrapper around an embedding model.
///
/// The cache is a process-wide bounded LRU keyed by content hash; evicted
/// entries optionally spill to a directory of hash-named JSON files. A
/// failing model batch yields no partial results.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingService>,
    cache: Mutex<LruCache<String, Arc<Vec<f32>>>>,
    batch_size: usize,
    overflow_dir: Option<PathBuf>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingService>, capacity: usize, batch_size: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            batch_size: batch_size.max(1),
            overflow_dir: None,
        }
    }

    /// Spill evicted entries to `dir` and consult it on cache misses.
    pub fn with_overflow_dir(mut self, dir: PathBuf) -> Self {
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!("Embedding overflow dir unavailable ({}), disabled", e);
            return self;
        }
        self.overflow_dir = Some(dir);
        self
    }

    /// Embed `(content_hash, text)` pairs, returning vectors in input order.
    ///
    /// Duplicate hashes invoke the model at most once; cache hits skip the
    /// model entirely.
    pub async fn embed_hashed(
        &self,
        items: &[(String, String)],
        ctx: &OpContext,
    ) -> Result<Vec<Arc<Vec<f32>>>, IndexError> {
        let mut resolved: Vec<Option<Arc<Vec<f32>>>> = vec![None; items.len()];

        // Unique misses in first-seen order.
        let mut miss_hashes: Vec<String> = Vec::new();
        let mut miss_texts: Vec<String> = Vec::new();
        {
            let mut cache = self.cache.lock().await;
            for (i, (hash, text)) in items.iter().enumerate() {
                if let Some(vector) = cache.get(hash) {
                    resolved[i] = Some(Arc::clone(vector));
                    continue;
                }
                if let Some(vector) = self.load_overflow(hash) {
                    let vector = Arc::new(vector);
                    self.insert_locked(&mut cache, hash.clone(), Arc::clone(&vector));
                    resolved[i] = Some(vector);
                    continue;
                }
                if !miss_hashes.contains(hash) {
                    miss_hashes.push(hash.clone());
                    miss_texts.push(text.clone());
                }
            }
        }

        if !miss_hashes.is_empty() {
            debug!(
                "Embedding {} unique texts ({} cache hits)",
                miss_hashes.len(),
                items.len() - miss_hashes.len()
            );

            let mut fresh: Vec<(String, Arc<Vec<f32>>)> = Vec::with_capacity(miss_hashes.len());
            for (hash_batch, text_batch) in miss_hashes
                .chunks(self.batch_size)
                .zip(miss_texts.chunks(self.batch_size))
            {
                let vectors = self.embed_with_retry(text_batch, ctx).await?;
                if vectors.len() != text_batch.len() {
                    return Err(IndexError::embedding(format!(
                        "model returned {} vectors for {} texts",
                        vectors.len(),
                        text_batch.len()
                    )));
                }
                for (hash, mut vector) in hash_batch.iter().zip(vectors) {
                    if self.inner.config().normalised() {
                        l2_normalize(&mut vector);
                    }
                    fresh.push((hash.clone(), Arc::new(vector)));
                }
            }

            let mut cache = self.cache.lock().await;
            for (hash, vector) in &fresh {
                self.insert_locked(&mut cache, hash.clone(), Arc::clone(vector));
            }
            // Resolve from the fresh batch first: a batch larger than the
            // cache capacity must still return every vector.
            let fresh_by_hash: std::collections::HashMap<&str, &Arc<Vec<f32>>> =
                fresh.iter().map(|(hash, vector)| (hash.as_str(), vector)).collect();
            for (i, (hash, _)) in items.iter().enumerate() {
                if resolved[i].is_none() {
                    resolved[i] = fresh_by_hash
                        .get(hash.as_str())
                        .map(|v| Arc::clone(v))
                        .or_else(|| cache.get(hash).map(Arc::clone));
                }
            }
        }

        resolved
            .into_iter()
            .map(|v| v.ok_or_else(|| IndexError::embedding("missing vector after embedding")))
            .collect()
    }

    async fn embed_with_retry(
        &self,
        texts: &[String],
        ctx: &OpContext,
    ) -> Result<Vec<Vec<f32>>, IndexError> {
        let mut last_error = None;
        for attempt in 1..=EMBED_ATTEMPTS {
            ctx.checkpoint()?;
            match self.inner.embed_batch(texts, ctx).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    warn!("Embedding attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                    if attempt < EMBED_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(
                            EMBED_BACKOFF_BASE_MS * 2u64.pow(attempt - 1),
                        ))
                        .await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| IndexError::embedding("embedding failed")))
    }

    fn insert_locked(
        &self,
        cache: &mut LruCache<String, Arc<Vec<f32>>>,
        hash: String,
        vector: Arc<Vec<f32>>,
    ) {
        if let Some((evicted_hash, evicted)) = cache.push(hash.clone(), vector) {
            if evicted_hash != hash {
                self.spill_overflow(&evicted_hash, &evicted);
            }
        }
    }

    fn overflow_path(&self, hash: &str) -> Option<PathBuf> {
        self.overflow_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", hash)))
    }

    fn spill_overflow(&self, hash: &str, vector: &[f32]) {
        if let Some(path) = self.overflow_path(hash) {
            if let Ok(text) = serde_json::to_string(vector) {
                let _ = std::fs::write(path, text);
            }
        }
    }

    fn load_overflow(&self, hash: &str) -> Option<Vec<f32>> {
        let path = self.overflow_path(hash)?;
        let text = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }
}

#[async_trait]
impl EmbeddingService for CachedEmbedder {
    async fn embed_batch(
        &self,
        texts: &[String],
        ctx: &OpContext,
    ) -> Result<Vec<Vec<f32>>, IndexError> {
        let items: Vec<(String, String)> = texts
            .iter()
            .map(|t| (content_hash(t), t.clone()))
            .collect();
        let vectors = self.embed_hashed(&items, ctx).await?;
        Ok(vectors.into_iter().map(|v| (*v).clone()).collect())
    }

    async fn embed_query(&self, text: &str, ctx: &OpContext) -> Result<Vec<f32>, IndexError> {
        let items = vec![(content_hash(text), text.to_string())];
        let vectors = self.embed_hashed(&items, ctx).await?;
        Ok((*vectors[0]).clone())
    }

    fn config(&self) -> &EmbeddingConfig {
        self.inner.config()
    }
}

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use rand::Rng;
use rand::SeedableRng;
use tracing::debug;

use crate::application::EmbeddingService;
use crate::domain::{l2_normalize, EmbeddingConfig, IndexError, OpContext};

/// Deterministic local embedding model.
///
/// Seeds a PRNG from the text's hash and emits a unit-length vector, so the
/// same text always maps to the same point. Offline and dependency-free;
/// heavier model backends plug in behind the same trait.
pub struct LocalEmbedding {
    config: EmbeddingConfig,
}

impl LocalEmbedding {
    pub fn new() -> Self {
        Self::with_dimensions(384)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            config: EmbeddingConfig::new(
                format!("local-hash-{}", dimensions),
                dimensions,
                true,
            ),
        }
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut vector: Vec<f32> = (0..self.config.dimensions())
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();

        l2_normalize(&mut vector);
        vector
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingService for LocalEmbedding {
    async fn embed_batch(
        &self,
        texts: &[String],
        ctx: &OpContext,
    ) -> Result<Vec<Vec<f32>>, IndexError> {
        ctx.checkpoint()?;
        let vectors: Vec<Vec<f32>> = texts.iter().map(|t| self.generate(t)).collect();
        debug!("Generated {} local embeddings", vectors.len());
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str, ctx: &OpContext) -> Result<Vec<f32>, IndexError> {
        ctx.checkpoint()?;
        Ok(self.generate(text))
    }

    fn config(&self) -> &EmbeddingConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embedding_is_deterministic() {
        let model = LocalEmbedding::new();
        let ctx = OpContext::new();

        let a = model.embed_query("hello world", &ctx).await.unwrap();
        let b = model.embed_query("hello world", &ctx).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_different_texts_differ() {
        let model = LocalEmbedding::new();
        let ctx = OpContext::new();

        let a = model.embed_query("first", &ctx).await.unwrap();
        let b = model.embed_query("second", &ctx).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_output_is_normalised() {
        let model = LocalEmbedding::with_dimensions(64);
        let ctx = OpContext::new();

        let vector = model.embed_query("anything", &ctx).await.unwrap();
        assert_eq!(vector.len(), 64);

        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let model = LocalEmbedding::new();
        let ctx = OpContext::new();
        let texts = vec!["a".to_string(), "b".to_string(), "a".to_string()];

        let batch = model.embed_batch(&texts, &ctx).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0], batch[2]);
        assert_ne!(batch[0], batch[1]);
    }
}

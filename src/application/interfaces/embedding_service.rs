use async_trait::async_trait;

use crate::domain::{EmbeddingConfig, IndexError, OpContext};

/// Generates vector embeddings for chunk texts and queries.
///
/// Output order matches input order. A failing batch produces no partial
/// results.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed_batch(
        &self,
        texts: &[String],
        ctx: &OpContext,
    ) -> Result<Vec<Vec<f32>>, IndexError>;

    async fn embed_query(&self, text: &str, ctx: &OpContext) -> Result<Vec<f32>, IndexError>;

    fn config(&self) -> &EmbeddingConfig;
}

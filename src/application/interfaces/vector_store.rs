use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{
    ChunkKind, CodeChunk, Embedding, IndexError, OpContext, SearchFilter,
};

/// A symbol table entry used to resolve parser references against the
/// project's chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub chunk_id: String,
    pub name: String,
    pub file_path: String,
    pub kind: ChunkKind,
}

/// Aggregate counters exposed by `stats()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub chunk_count: u64,
    pub vector_count: u64,
    pub file_count: u64,
}

/// Outcome of the corruption-recovery protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The store opened and passed its integrity probe.
    Intact,
    /// The store was rebuilt in place from rows dumped through a read-only
    /// handle; no reindex is required.
    Recovered,
    /// The store was rebuilt empty; the indexer must re-add every file known
    /// to the metadata manager.
    Rebuilt,
}

/// Persistent storage of `{id, vector, metadata}` tuples with filtered
/// nearest-neighbour search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent by chunk id; duplicates overwrite.
    async fn add(
        &self,
        chunks: &[CodeChunk],
        embeddings: &[Embedding],
        ctx: &OpContext,
    ) -> Result<(), IndexError>;

    /// Returns the number of chunks removed.
    async fn delete(&self, ids: &[String], ctx: &OpContext) -> Result<u64, IndexError>;

    /// Nearest-neighbour search over chunks passing `filter`, ordered by
    /// decreasing similarity.
    async fn query(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: &SearchFilter,
        ctx: &OpContext,
    ) -> Result<Vec<(CodeChunk, f32)>, IndexError>;

    /// Fetch chunk metadata by id, for enrichment.
    async fn get(&self, ids: &[String]) -> Result<Vec<CodeChunk>, IndexError>;

    /// `(chunk_id, content_hash)` pairs currently stored for a file.
    async fn ids_for_path(&self, path: &str) -> Result<Vec<(String, String)>, IndexError>;

    /// All chunks of a file, ordered by start line.
    async fn chunks_for_path(&self, path: &str) -> Result<Vec<CodeChunk>, IndexError>;

    /// The stored embedding vector of one chunk.
    async fn vector_of(&self, chunk_id: &str) -> Result<Option<Vec<f32>>, IndexError>;

    /// Every named chunk, for reference resolution.
    async fn symbols(&self) -> Result<Vec<SymbolEntry>, IndexError>;

    async fn count(&self) -> Result<u64, IndexError>;

    async fn stats(&self) -> Result<StoreStats, IndexError>;

    /// Cheap integrity probe; `Err` marks detectable corruption.
    async fn health_check(&self) -> Result<(), IndexError>;

    /// Bounded recovery protocol: try to reopen; else dump recoverable rows
    /// through a read-only handle and rebuild in place from them; else
    /// rebuild empty. Surfaces `StoreUnavailable` on failure.
    async fn recover(&self) -> Result<RecoveryOutcome, IndexError>;

    /// Remove every stored chunk and vector.
    async fn clear(&self) -> Result<(), IndexError>;
}

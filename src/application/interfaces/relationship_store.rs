use async_trait::async_trait;

use crate::domain::{IndexError, RelationKind, Relationship};

/// Persistent bag of directed, typed edges between chunk ids.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// Idempotent by `(source, target, kind)`; weights overwrite.
    async fn upsert(&self, edges: &[Relationship]) -> Result<(), IndexError>;

    /// Edges pointing at `chunk_id`, optionally restricted to one kind.
    async fn incoming(
        &self,
        chunk_id: &str,
        kind: Option<RelationKind>,
    ) -> Result<Vec<Relationship>, IndexError>;

    /// Edges leaving `chunk_id`, optionally restricted to one kind.
    async fn outgoing(
        &self,
        chunk_id: &str,
        kind: Option<RelationKind>,
    ) -> Result<Vec<Relationship>, IndexError>;

    /// Highest-weight sibling chunk ids: same-parent chunks first, then
    /// semantically similar neighbours.
    async fn siblings(&self, chunk_id: &str, top_k: usize) -> Result<Vec<String>, IndexError>;

    /// Every edge of one kind (used to lift the import graph).
    async fn edges_of_kind(&self, kind: RelationKind) -> Result<Vec<Relationship>, IndexError>;

    /// Remove all edges whose source or target is one of `chunk_ids`.
    /// Returns the number of edges removed.
    async fn delete_by_chunks(&self, chunk_ids: &[String]) -> Result<u64, IndexError>;

    /// Remove the edges *originating* at `chunk_ids` (canonical direction
    /// plus their mirror rows), leaving edges contributed by other chunks
    /// intact. Used when a chunk is re-parsed in place.
    async fn delete_edges_from(&self, chunk_ids: &[String]) -> Result<u64, IndexError>;

    async fn count(&self) -> Result<u64, IndexError>;

    async fn clear(&self) -> Result<(), IndexError>;
}

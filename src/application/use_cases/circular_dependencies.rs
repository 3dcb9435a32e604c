use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::application::{RelationshipStore, VectorStore};
use crate::domain::{IndexError, OpContext, RelationKind};

/// Finds non-trivial strongly connected components in the file-level import
/// graph (Tarjan's algorithm).
pub struct CircularDependenciesUseCase {
    vectors: Arc<dyn VectorStore>,
    relationships: Arc<dyn RelationshipStore>,
}

impl CircularDependenciesUseCase {
    pub fn new(vectors: Arc<dyn VectorStore>, relationships: Arc<dyn RelationshipStore>) -> Self {
        Self {
            vectors,
            relationships,
        }
    }

    /// Returns each cycle as a sorted list of file paths; cycles themselves
    /// are ordered by their first member for determinism.
    pub async fn check(&self, ctx: &OpContext) -> Result<Vec<Vec<String>>, IndexError> {
        ctx.checkpoint()?;

        let edges = self.relationships.edges_of_kind(RelationKind::Imports).await?;
        if edges.is_empty() {
            return Ok(Vec::new());
        }

        // Lift chunk-level edges to files.
        let mut chunk_ids: HashSet<String> = HashSet::new();
        for edge in &edges {
            chunk_ids.insert(edge.source_chunk_id().to_string());
            chunk_ids.insert(edge.target_chunk_id().to_string());
        }
        let ids: Vec<String> = chunk_ids.into_iter().collect();
        let file_of: HashMap<String, String> = self
            .vectors
            .get(&ids)
            .await?
            .into_iter()
            .map(|c| (c.id().to_string(), c.file_path().to_string()))
            .collect();

        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut node_of: HashMap<String, NodeIndex> = HashMap::new();
        let mut seen_edges: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();

        for edge in &edges {
            let (source_file, target_file) = match (
                file_of.get(edge.source_chunk_id()),
                file_of.get(edge.target_chunk_id()),
            ) {
                (Some(s), Some(t)) if s != t => (s.clone(), t.clone()),
                _ => continue,
            };

            let source = *node_of
                .entry(source_file.clone())
                .or_insert_with(|| graph.add_node(source_file.clone()));
            let target = *node_of
                .entry(target_file.clone())
                .or_insert_with(|| graph.add_node(target_file.clone()));
            if seen_edges.insert((source, target)) {
                graph.add_edge(source, target, ());
            }
        }

        debug!(
            "Import graph: {} files, {} edges",
            graph.node_count(),
            graph.edge_count()
        );

        let mut cycles: Vec<Vec<String>> = petgraph::algo::tarjan_scc(&graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| {
                let mut files: Vec<String> = component
                    .into_iter()
                    .map(|node| graph[node].clone())
                    .collect();
                files.sort();
                files
            })
            .collect();
        cycles.sort();

        Ok(cycles)
    }
}

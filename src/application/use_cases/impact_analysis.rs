use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::application::{RelationshipStore, VectorStore};
use crate::domain::{IndexError, OpContext, RelationKind};

/// A single node in the impact (blast-radius) graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactNode {
    /// The affected chunk's symbol name (empty for unnamed chunks).
    pub symbol: String,
    pub chunk_id: String,
    /// Hop distance from the root symbol (1 = direct dependant).
    pub depth: usize,
    pub file_path: String,
    /// The edge kind that pulled this node in ("calls" or "imports").
    pub relation: String,
}

/// Full blast-radius report for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactReport {
    pub root_symbol: String,
    /// Total transitively affected chunks (excluding the roots).
    pub total_affected: usize,
    /// Deepest hop level that contained at least one result.
    pub max_depth_reached: usize,
    /// Affected chunks grouped by hop depth (index 0 = depth 1).
    pub by_depth: Vec<Vec<ImpactNode>>,
}

/// BFS outward from a symbol through `called_by` and `imported_by` edges to
/// identify everything that would be affected if the symbol changes.
pub struct ImpactAnalysisUseCase {
    vectors: Arc<dyn VectorStore>,
    relationships: Arc<dyn RelationshipStore>,
}

impl ImpactAnalysisUseCase {
    pub fn new(vectors: Arc<dyn VectorStore>, relationships: Arc<dyn RelationshipStore>) -> Self {
        Self {
            vectors,
            relationships,
        }
    }

    /// `symbol`    – name to analyse (e.g. `"resolve_symbols"`)
    /// `max_depth` – maximum BFS hops; cycles are cut by the visited set
    pub async fn analyze(
        &self,
        symbol: &str,
        max_depth: usize,
        ctx: &OpContext,
    ) -> Result<ImpactReport, IndexError> {
        ctx.checkpoint()?;

        let symbols = self.vectors.symbols().await?;
        let mut roots: Vec<String> = symbols
            .iter()
            .filter(|s| s.name == symbol)
            .map(|s| s.chunk_id.clone())
            .collect();
        roots.sort();
        if roots.is_empty() {
            return Err(IndexError::not_found(format!(
                "symbol '{}' is not in the index",
                symbol
            )));
        }

        let names: HashMap<String, (String, String)> = symbols
            .into_iter()
            .map(|s| (s.chunk_id, (s.name, s.file_path)))
            .collect();

        let mut visited: HashSet<String> = roots.iter().cloned().collect();
        let mut queue: VecDeque<(String, usize)> =
            roots.into_iter().map(|id| (id, 0)).collect();
        let mut by_depth: Vec<Vec<ImpactNode>> = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            ctx.checkpoint()?;

            // Dependants: chunks that call or import the current one.
            let mut dependants = Vec::new();
            for kind in [RelationKind::Calls, RelationKind::Imports] {
                for edge in self.relationships.incoming(&current, Some(kind)).await? {
                    dependants.push((edge.source_chunk_id().to_string(), kind));
                }
            }
            if dependants.is_empty() {
                continue;
            }
            dependants.sort_by(|a, b| a.0.cmp(&b.0));

            let next_depth = depth + 1;
            while by_depth.len() < next_depth {
                by_depth.push(Vec::new());
            }

            for (dependant_id, kind) in dependants {
                if visited.contains(&dependant_id) {
                    continue;
                }
                visited.insert(dependant_id.clone());

                let (symbol_name, file_path) = match names.get(&dependant_id) {
                    Some((name, path)) => (name.clone(), path.clone()),
                    None => {
                        let fetched = self.vectors.get(&[dependant_id.clone()]).await?;
                        match fetched.first() {
                            Some(chunk) => (
                                chunk.name().unwrap_or_default().to_string(),
                                chunk.file_path().to_string(),
                            ),
                            None => continue,
                        }
                    }
                };

                by_depth[next_depth - 1].push(ImpactNode {
                    symbol: symbol_name,
                    chunk_id: dependant_id.clone(),
                    depth: next_depth,
                    file_path,
                    relation: kind.as_str().to_string(),
                });

                queue.push_back((dependant_id, next_depth));
            }
        }

        let total_affected = by_depth.iter().map(|d| d.len()).sum();
        let max_depth_reached = by_depth
            .iter()
            .rposition(|d| !d.is_empty())
            .map(|i| i + 1)
            .unwrap_or(0);

        Ok(ImpactReport {
            root_symbol: symbol.to_string(),
            total_affected,
            max_depth_reached,
            by_depth,
        })
    }
}

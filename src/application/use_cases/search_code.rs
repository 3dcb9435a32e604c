use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::application::{EmbeddingService, VectorStore};
use crate::connector::CachedEmbedder;
use crate::domain::{
    ChunkKind, CodeChunk, IndexConfig, IndexError, OpContext, RankWeights, ResultContext,
    SearchFilter, SearchOptions, SearchResult,
};

/// Hard bound on how far the adaptive threshold may drop below the
/// configured default.
const MAX_THRESHOLD_DROP: f32 = 0.2;

/// Queries remembered for the adaptive threshold (zero-result counts).
const HISTORY_CAPACITY: usize = 256;

/// Longest query accepted before truncation.
const MAX_QUERY_CHARS: usize = 8192;

/// Query pipeline: embed → store k-NN with filters → re-rank → threshold.
///
/// Stateless across calls except for a bounded query history that only
/// influences the adaptive threshold.
pub struct SearchCodeUseCase {
    config: Arc<IndexConfig>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<CachedEmbedder>,
    history: Mutex<LruCache<String, u32>>,
    boilerplate: BoilerplateFilter,
}

impl SearchCodeUseCase {
    pub fn new(
        config: Arc<IndexConfig>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<CachedEmbedder>,
    ) -> Self {
        Self {
            config,
            vectors,
            embedder,
            history: Mutex::new(LruCache::new(
                NonZeroUsize::new(HISTORY_CAPACITY).expect("non-zero history capacity"),
            )),
            boilerplate: BoilerplateFilter::new(),
        }
    }

    pub async fn search(
        &self,
        query_text: &str,
        k: usize,
        filter: &SearchFilter,
        options: &SearchOptions,
        ctx: &OpContext,
    ) -> Result<Vec<SearchResult>, IndexError> {
        ctx.checkpoint()?;
        let start_time = Instant::now();

        let query = normalize_query(query_text)?;
        let k = k.max(1);

        // Path-shaped queries may ask for "code similar to this file".
        let query_vector = if options.find_similar_path() && looks_like_path(&query) {
            match self.file_probe_vector(&query).await? {
                Some(vector) => vector,
                None => self.embedder.embed_query(&query, ctx).await?,
            }
        } else {
            self.embedder.embed_query(&query, ctx).await?
        };

        let threshold = self.effective_threshold(&query, options).await;

        // Over-fetch so re-ranking has a meaningful candidate pool.
        let fetch_k = (k * 4).min(100).max(k);
        let candidates = self
            .vectors
            .query(&query_vector, fetch_k, filter, ctx)
            .await?;
        debug!(
            "Query '{}': {} candidates, threshold {:.2}",
            query,
            candidates.len(),
            threshold
        );

        let weights = options
            .rank_weights()
            .copied()
            .unwrap_or(self.config.rank_weights);
        let symbol_query = is_symbol_like(&query);

        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .map(|(chunk, similarity)| {
                let score = self.rerank_score(&chunk, similarity, symbol_query, &weights);
                SearchResult::new(chunk, score, similarity)
            })
            .filter(|r| r.score() >= threshold)
            .collect();

        results.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk().id().cmp(b.chunk().id()))
        });
        results.truncate(k);

        if options.enrich_context() {
            results = self.enrich(results).await?;
        }

        self.record_history(&query, results.is_empty()).await;

        info!(
            "Found {} results in {:.2}s",
            results.len(),
            start_time.elapsed().as_secs_f64()
        );
        Ok(results)
    }

    /// Nearest neighbours of an already-indexed chunk (or of a whole file),
    /// excluding the probe itself.
    pub async fn search_similar(
        &self,
        chunk_id_or_path: &str,
        k: usize,
        ctx: &OpContext,
    ) -> Result<Vec<SearchResult>, IndexError> {
        ctx.checkpoint()?;
        let k = k.max(1);

        let (probe_vector, excluded_ids) = match self
            .vectors
            .vector_of(chunk_id_or_path)
            .await?
        {
            Some(vector) => (vector, vec![chunk_id_or_path.to_string()]),
            None => {
                let chunks = self.vectors.chunks_for_path(chunk_id_or_path).await?;
                if chunks.is_empty() {
                    return Err(IndexError::not_found(format!(
                        "no chunk or file '{}' in the index",
                        chunk_id_or_path
                    )));
                }
                let ids: Vec<String> = chunks.iter().map(|c| c.id().to_string()).collect();
                let vector = self.average_vector(&ids).await?.ok_or_else(|| {
                    IndexError::not_found(format!("no stored vectors for '{}'", chunk_id_or_path))
                })?;
                (vector, ids)
            }
        };

        let fetch_k = (k + excluded_ids.len()).min(100).max(k);
        let results = self
            .vectors
            .query(&probe_vector, fetch_k, &SearchFilter::new(), ctx)
            .await?;

        Ok(results
            .into_iter()
            .filter(|(chunk, _)| !excluded_ids.iter().any(|id| id == chunk.id()))
            .take(k)
            .map(|(chunk, similarity)| SearchResult::new(chunk, similarity, similarity))
            .collect())
    }

    // ── Scoring ──────────────────────────────────────────────────────────

    fn rerank_score(
        &self,
        chunk: &CodeChunk,
        similarity: f32,
        symbol_query: bool,
        weights: &RankWeights,
    ) -> f32 {
        let quality = chunk.quality().quality_score();
        let structural = if symbol_query {
            match chunk.kind() {
                ChunkKind::Function | ChunkKind::Method => 1.0,
                ChunkKind::Class => 0.5,
                _ => 0.0,
            }
        } else {
            0.0
        };
        let boilerplate = if self.boilerplate.matches(chunk) { 1.0 } else { 0.0 };

        weights.vector * similarity + weights.quality * quality + weights.structural * structural
            - weights.boilerplate * boilerplate
    }

    /// The similarity floor a query will be held to: an explicit option
    /// wins, otherwise the adaptive threshold applies.
    pub async fn effective_threshold(&self, query: &str, options: &SearchOptions) -> f32 {
        match options.threshold() {
            Some(explicit) => explicit,
            None => self.adaptive_threshold(query).await,
        }
    }

    /// Effective threshold = configured default minus a bounded drop that
    /// grows with query brevity, repeated empty results and uncommon tokens.
    async fn adaptive_threshold(&self, query: &str) -> f32 {
        let base = self.config.similarity_threshold;
        let mut drop = 0.0f32;

        if query.len() < 12 {
            drop += 0.08;
        }

        let misses = {
            let mut history = self.history.lock().await;
            history.get(&history_key(query)).copied().unwrap_or(0)
        };
        drop += 0.04 * misses.min(2) as f32;

        if query
            .split_whitespace()
            .any(|t| t.contains('_') || t.chars().any(|c| c.is_uppercase()))
        {
            drop += 0.05;
        }

        let drop = drop.min(MAX_THRESHOLD_DROP);
        (base - drop).max(0.0)
    }

    async fn record_history(&self, query: &str, empty: bool) {
        let mut history = self.history.lock().await;
        let key = history_key(query);
        if empty {
            let misses = history.get(&key).copied().unwrap_or(0);
            history.push(key, misses.saturating_add(1));
        } else {
            history.push(key, 0);
        }
    }

    // ── Probes and enrichment ────────────────────────────────────────────

    async fn file_probe_vector(&self, path: &str) -> Result<Option<Vec<f32>>, IndexError> {
        let chunks = self.vectors.chunks_for_path(path).await?;
        if chunks.is_empty() {
            return Ok(None);
        }
        let ids: Vec<String> = chunks.iter().map(|c| c.id().to_string()).collect();
        self.average_vector(&ids).await
    }

    async fn average_vector(&self, chunk_ids: &[String]) -> Result<Option<Vec<f32>>, IndexError> {
        let mut sum: Vec<f32> = Vec::new();
        let mut count = 0usize;

        for id in chunk_ids {
            if let Some(vector) = self.vectors.vector_of(id).await? {
                if sum.is_empty() {
                    sum = vector;
                } else if sum.len() == vector.len() {
                    for (s, v) in sum.iter_mut().zip(vector.iter()) {
                        *s += v;
                    }
                }
                count += 1;
            }
        }

        if count == 0 {
            return Ok(None);
        }
        for s in &mut sum {
            *s /= count as f32;
        }
        crate::domain::l2_normalize(&mut sum);
        Ok(Some(sum))
    }

    async fn enrich(&self, results: Vec<SearchResult>) -> Result<Vec<SearchResult>, IndexError> {
        let mut enriched = Vec::with_capacity(results.len());
        for result in results {
            let file_path = result.chunk().file_path().to_string();
            let neighbour_names: Vec<String> = self
                .vectors
                .chunks_for_path(&file_path)
                .await?
                .iter()
                .filter(|c| c.id() != result.chunk().id())
                .filter_map(|c| c.name().map(|n| n.to_string()))
                .collect();
            enriched.push(result.with_context(ResultContext {
                file_path,
                neighbour_names,
            }));
        }
        Ok(enriched)
    }
}

fn normalize_query(query_text: &str) -> Result<String, IndexError> {
    let trimmed = query_text.trim();
    if trimmed.is_empty() {
        return Err(IndexError::invalid_input("query must not be empty"));
    }
    let mut query = trimmed.to_string();
    if query.len() > MAX_QUERY_CHARS {
        let mut end = MAX_QUERY_CHARS;
        while end > 0 && !query.is_char_boundary(end) {
            end -= 1;
        }
        query.truncate(end);
    }
    Ok(query)
}

fn history_key(query: &str) -> String {
    query.to_lowercase()
}

fn looks_like_path(query: &str) -> bool {
    !query.contains(char::is_whitespace)
        && (query.contains('/') || std::path::Path::new(query).extension().is_some())
}

/// Single identifier-shaped token.
fn is_symbol_like(query: &str) -> bool {
    let mut tokens = query.split_whitespace();
    let first = match tokens.next() {
        Some(t) => t,
        None => return false,
    };
    tokens.next().is_none()
        && first
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == ':' || c == '.')
}

/// Deterministic patterns for chunks that are plumbing rather than logic:
/// getters/setters, empty bodies, trivial constructors.
struct BoilerplateFilter {
    accessor: Regex,
    trivial_init: Regex,
}

impl BoilerplateFilter {
    fn new() -> Self {
        Self {
            accessor: Regex::new(r"^(get|set)[_A-Z]").expect("valid accessor pattern"),
            trivial_init: Regex::new(r"^(__init__|initialize|constructor)$")
                .expect("valid constructor pattern"),
        }
    }

    fn matches(&self, chunk: &CodeChunk) -> bool {
        if !chunk.is_callable() {
            return false;
        }

        if let Some(name) = chunk.name() {
            if self.accessor.is_match(name) {
                return true;
            }
            if self.trivial_init.is_match(name) && chunk.line_count() <= 6 {
                return true;
            }
        }

        // Empty or near-empty bodies.
        let body_lines = chunk
            .content()
            .lines()
            .skip(1)
            .filter(|l| {
                let t = l.trim();
                !t.is_empty() && t != "}" && t != "end" && t != "pass"
            })
            .count();
        body_lines == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Language;

    fn named_chunk(name: &str, content: &str, lines: u32) -> CodeChunk {
        CodeChunk::new(
            "src/app.py".to_string(),
            content.to_string(),
            1,
            lines,
            ChunkKind::Function,
            Language::Python,
        )
        .with_name(name)
    }

    #[test]
    fn test_normalize_query() {
        assert!(normalize_query("  ").is_err());
        assert_eq!(normalize_query(" find me ").unwrap(), "find me");
    }

    #[test]
    fn test_symbol_like_queries() {
        assert!(is_symbol_like("parse_file"));
        assert!(is_symbol_like("HttpClient.send"));
        assert!(!is_symbol_like("how do we parse files"));
        assert!(!is_symbol_like("parse file"));
    }

    #[test]
    fn test_looks_like_path() {
        assert!(looks_like_path("src/app.py"));
        assert!(looks_like_path("main.dart"));
        assert!(!looks_like_path("find the parser"));
    }

    #[test]
    fn test_boilerplate_accessors() {
        let filter = BoilerplateFilter::new();

        assert!(filter.matches(&named_chunk(
            "get_name",
            "def get_name(self):\n    return self.name",
            2
        )));
        assert!(filter.matches(&named_chunk(
            "setValue",
            "function setValue(v) {\n  this.v = v;\n}",
            3
        )));
        assert!(!filter.matches(&named_chunk(
            "resolve_imports",
            "def resolve_imports(tree):\n    for node in tree:\n        visit(node)",
            3
        )));
    }

    #[test]
    fn test_boilerplate_empty_body() {
        let filter = BoilerplateFilter::new();
        assert!(filter.matches(&named_chunk("noop", "def noop():\n    pass", 2)));
    }

    #[test]
    fn test_boilerplate_trivial_init() {
        let filter = BoilerplateFilter::new();
        assert!(filter.matches(&named_chunk(
            "__init__",
            "def __init__(self, a):\n    self.a = a",
            2
        )));
    }
}

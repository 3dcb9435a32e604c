use serde::{Deserialize, Serialize};

use super::{CodeChunk, Grade};

/// Boolean metadata predicate applied at store level before ranking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    languages: Option<Vec<String>>,
    kinds: Option<Vec<String>>,
    path_prefix: Option<String>,
    path_glob: Option<String>,
    path_regex: Option<String>,
    max_grade: Option<Grade>,
    max_smell_count: Option<u32>,
    complexity_range: Option<(u32, u32)>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = Some(languages);
        self
    }

    pub fn with_kinds(mut self, kinds: Vec<String>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn with_path_glob(mut self, glob: impl Into<String>) -> Self {
        self.path_glob = Some(glob.into());
        self
    }

    pub fn with_path_regex(mut self, regex: impl Into<String>) -> Self {
        self.path_regex = Some(regex.into());
        self
    }

    /// Admit only chunks graded at `grade` or better (A is best).
    pub fn with_max_grade(mut self, grade: Grade) -> Self {
        self.max_grade = Some(grade);
        self
    }

    pub fn with_max_smell_count(mut self, count: u32) -> Self {
        self.max_smell_count = Some(count);
        self
    }

    pub fn with_complexity_range(mut self, lo: u32, hi: u32) -> Self {
        self.complexity_range = Some((lo, hi));
        self
    }

    pub fn languages(&self) -> Option<&[String]> {
        self.languages.as_deref()
    }

    pub fn kinds(&self) -> Option<&[String]> {
        self.kinds.as_deref()
    }

    pub fn path_prefix(&self) -> Option<&str> {
        self.path_prefix.as_deref()
    }

    pub fn path_glob(&self) -> Option<&str> {
        self.path_glob.as_deref()
    }

    pub fn path_regex(&self) -> Option<&str> {
        self.path_regex.as_deref()
    }

    pub fn max_grade(&self) -> Option<Grade> {
        self.max_grade
    }

    pub fn max_smell_count(&self) -> Option<u32> {
        self.max_smell_count
    }

    pub fn complexity_range(&self) -> Option<(u32, u32)> {
        self.complexity_range
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_none()
            && self.kinds.is_none()
            && self.path_prefix.is_none()
            && self.path_glob.is_none()
            && self.path_regex.is_none()
            && self.max_grade.is_none()
            && self.max_smell_count.is_none()
            && self.complexity_range.is_none()
    }

    /// In-memory evaluation of the predicate against a chunk.
    pub fn matches(&self, chunk: &CodeChunk) -> bool {
        if let Some(languages) = &self.languages {
            if !languages.iter().any(|l| l == chunk.language().as_str()) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.iter().any(|k| k == chunk.kind().as_str()) {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !chunk.file_path().starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(grade) = self.max_grade {
            if chunk.quality().grade() > grade {
                return false;
            }
        }
        if let Some(max_smells) = self.max_smell_count {
            if chunk.quality().smell_count() > max_smells {
                return false;
            }
        }
        if let Some((lo, hi)) = self.complexity_range {
            let cyclomatic = chunk.quality().cyclomatic();
            if cyclomatic < lo || cyclomatic > hi {
                return false;
            }
        }
        // Glob and regex predicates need compiled matchers; the store
        // evaluates them (see the vector store adapter).
        true
    }
}

/// Per-query knobs for the search pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    threshold: Option<f32>,
    find_similar_path: bool,
    enrich_context: bool,
    rank_weights: Option<RankWeights>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Treat a path-shaped query as "find code similar to this file".
    pub fn with_find_similar_path(mut self, enabled: bool) -> Self {
        self.find_similar_path = enabled;
        self
    }

    pub fn with_enrich_context(mut self, enabled: bool) -> Self {
        self.enrich_context = enabled;
        self
    }

    pub fn with_rank_weights(mut self, weights: RankWeights) -> Self {
        self.rank_weights = Some(weights);
        self
    }

    pub fn threshold(&self) -> Option<f32> {
        self.threshold
    }

    pub fn find_similar_path(&self) -> bool {
        self.find_similar_path
    }

    pub fn enrich_context(&self) -> bool {
        self.enrich_context
    }

    pub fn rank_weights(&self) -> Option<&RankWeights> {
        self.rank_weights.as_ref()
    }
}

/// Weights for the second-stage re-ranker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankWeights {
    pub vector: f32,
    pub quality: f32,
    pub structural: f32,
    pub boilerplate: f32,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            quality: 0.15,
            structural: 0.1,
            boilerplate: 0.25,
        }
    }
}

/// One ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    chunk: CodeChunk,
    score: f32,
    vector_similarity: f32,
    context: Option<ResultContext>,
}

impl SearchResult {
    pub fn new(chunk: CodeChunk, score: f32, vector_similarity: f32) -> Self {
        Self {
            chunk,
            score,
            vector_similarity,
            context: None,
        }
    }

    pub fn with_context(mut self, context: ResultContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn chunk(&self) -> &CodeChunk {
        &self.chunk
    }

    pub fn into_chunk(self) -> CodeChunk {
        self.chunk
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn vector_similarity(&self) -> f32 {
        self.vector_similarity
    }

    pub fn context(&self) -> Option<&ResultContext> {
        self.context.as_ref()
    }

    pub fn display_line(&self) -> String {
        format!("{} (score: {:.3})", self.chunk.location(), self.score)
    }
}

/// Surrounding-file context attached to a result on request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultContext {
    pub file_path: String,
    pub neighbour_names: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChunkKind, Language, QualityMetrics, Smell, SmellKind, Severity};

    fn graded_chunk(grade: Grade, smells: usize) -> CodeChunk {
        let smells = (0..smells)
            .map(|_| Smell::new(SmellKind::LongMethod, Severity::Warning))
            .collect();
        CodeChunk::new(
            "src/app.py".to_string(),
            "def f():\n    pass".to_string(),
            1,
            2,
            ChunkKind::Function,
            Language::Python,
        )
        .with_quality(QualityMetrics::new(3, 2, 1, 1, 2, 0, smells, grade))
    }

    #[test]
    fn test_filter_by_language_and_grade() {
        let filter = SearchFilter::new()
            .with_languages(vec!["python".to_string()])
            .with_max_grade(Grade::B);

        assert!(filter.matches(&graded_chunk(Grade::A, 0)));
        assert!(filter.matches(&graded_chunk(Grade::B, 0)));
        assert!(!filter.matches(&graded_chunk(Grade::C, 0)));
    }

    #[test]
    fn test_filter_by_smell_count() {
        let filter = SearchFilter::new().with_max_smell_count(1);

        assert!(filter.matches(&graded_chunk(Grade::A, 1)));
        assert!(!filter.matches(&graded_chunk(Grade::A, 3)));
    }

    #[test]
    fn test_filter_by_complexity_range() {
        let filter = SearchFilter::new().with_complexity_range(1, 5);
        assert!(filter.matches(&graded_chunk(Grade::A, 0)));

        let narrow = SearchFilter::new().with_complexity_range(10, 20);
        assert!(!narrow.matches(&graded_chunk(Grade::A, 0)));
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let filter = SearchFilter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&graded_chunk(Grade::F, 5)));
    }

    #[test]
    fn test_default_rank_weights() {
        let weights = RankWeights::default();
        assert!((weights.vector - 0.7).abs() < 1e-6);
        assert!((weights.boilerplate - 0.25).abs() < 1e-6);
    }
}

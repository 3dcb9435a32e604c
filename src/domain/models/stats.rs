use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-language aggregate counters collected while indexing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageStats {
    pub file_count: u64,
    pub chunk_count: u64,
}

/// Snapshot of a project index returned by `get_status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectStats {
    pub file_count: u64,
    pub chunk_count: u64,
    pub relationship_count: u64,
    pub languages: HashMap<String, LanguageStats>,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub state_dir: String,
}

/// Outcome of one indexing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSummary {
    pub files_seen: u64,
    pub files_indexed: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub chunks_added: u64,
    pub chunks_updated: u64,
    pub chunks_deleted: u64,
    pub elapsed_ms: u64,
}

impl IndexSummary {
    /// The overall operation succeeds if anything was indexed, and reports a
    /// mixed outcome when some files failed.
    pub fn is_clean(&self) -> bool {
        self.files_failed == 0
    }

    pub fn touched_store(&self) -> bool {
        self.chunks_added + self.chunks_updated + self.chunks_deleted > 0
    }
}

/// Per-file outcome handed to the progress callback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileStats {
    pub path: String,
    pub chunks_added: u64,
    pub chunks_updated: u64,
    pub chunks_deleted: u64,
    pub skipped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_flags() {
        let mut summary = IndexSummary::default();
        assert!(summary.is_clean());
        assert!(!summary.touched_store());

        summary.chunks_added = 3;
        summary.files_failed = 1;
        assert!(!summary.is_clean());
        assert!(summary.touched_store());
    }
}

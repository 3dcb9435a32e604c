use serde::{Deserialize, Serialize};

use super::{EmbeddingConfig, RankWeights};
use crate::domain::IndexError;

fn default_extensions() -> Vec<String> {
    [
        "py", "pyi", "js", "jsx", "mjs", "cjs", "ts", "tsx", "dart", "php", "rb", "rake", "html",
        "htm", "md", "markdown", "txt", "rst",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

fn default_embedding_model() -> String {
    "local-hash-384".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_chunk_size() -> usize {
    1200
}

fn default_chunk_overlap() -> usize {
    120
}

fn default_similarity_threshold() -> f32 {
    0.75
}

fn default_max_chunk_size() -> usize {
    64 * 1024
}

fn default_max_file_size() -> u64 {
    2 * 1024 * 1024
}

fn default_pool_size() -> usize {
    4
}

fn default_read_concurrency() -> usize {
    4
}

fn default_max_workers() -> usize {
    8
}

fn default_embedding_dimensions() -> usize {
    384
}

/// Immutable configuration of a project index, constructed once and shared
/// by reference. Changing `embedding_model` requires a full reindex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_extensions")]
    pub file_extensions: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub respect_gitignore: bool,
    #[serde(default = "default_true")]
    pub skip_dotfiles: bool,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Must match the model designation; recorded so that a mismatch is a
    /// configuration error rather than silent score skew.
    #[serde(default = "default_true")]
    pub embedding_normalised: bool,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_read_concurrency")]
    pub read_concurrency: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub rank_weights: RankWeights,
    #[serde(default)]
    pub auto_index: AutoIndexConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            file_extensions: default_extensions(),
            exclude_patterns: Vec::new(),
            respect_gitignore: true,
            skip_dotfiles: true,
            embedding_model: default_embedding_model(),
            embedding_normalised: true,
            embedding_dimensions: default_embedding_dimensions(),
            batch_size: default_batch_size(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            similarity_threshold: default_similarity_threshold(),
            max_chunk_size: default_max_chunk_size(),
            max_file_size: default_max_file_size(),
            pool_size: default_pool_size(),
            read_concurrency: default_read_concurrency(),
            max_workers: default_max_workers(),
            rank_weights: RankWeights::default(),
            auto_index: AutoIndexConfig::default(),
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.file_extensions.is_empty() {
            return Err(IndexError::config("file_extensions must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(IndexError::config("batch_size must be positive"));
        }
        if self.pool_size == 0 || self.read_concurrency == 0 || self.max_workers == 0 {
            return Err(IndexError::config(
                "pool_size, read_concurrency and max_workers must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(IndexError::config(
                "similarity_threshold must be within [0.0, 1.0]",
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IndexError::config(
                "chunk_overlap must be smaller than chunk_size",
            ));
        }
        if self.embedding_dimensions == 0 {
            return Err(IndexError::config("embedding_dimensions must be positive"));
        }
        Ok(())
    }

    /// Dot-directories admitted even when `skip_dotfiles` is set.
    pub fn whitelisted_dot_dirs() -> &'static [&'static str] {
        &[".github", ".gitlab-ci", ".circleci"]
    }

    pub fn admits_extension(&self, ext: &str) -> bool {
        let lowered = ext.to_lowercase();
        self.file_extensions.iter().any(|e| *e == lowered)
    }

    pub fn embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig::new(
            self.embedding_model.clone(),
            self.embedding_dimensions,
            self.embedding_normalised,
        )
    }

    pub fn worker_count(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores.min(self.max_workers).max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoIndexConfig {
    pub enabled: bool,
    /// Seconds between change checks when auto indexing is driven by an
    /// external watcher or scheduler.
    pub check_interval: u64,
}

impl Default for AutoIndexConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = IndexConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 32);
        assert!((config.similarity_threshold - 0.75).abs() < 1e-6);
        assert_eq!(config.max_file_size, 2 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_batch_size() {
        let config = IndexConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_threshold() {
        let config = IndexConfig {
            similarity_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlap_must_be_below_chunk_size() {
        let config = IndexConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extension_admission_is_case_insensitive() {
        let config = IndexConfig::default();
        assert!(config.admits_extension("PY"));
        assert!(config.admits_extension("md"));
        assert!(!config.admits_extension("exe"));
    }

    #[test]
    fn test_dot_dir_whitelist_is_fixed() {
        assert_eq!(
            IndexConfig::whitelisted_dot_dirs(),
            &[".github", ".gitlab-ci", ".circleci"]
        );
    }

    #[test]
    fn test_config_deserialises_with_partial_keys() {
        let config: IndexConfig =
            serde_json::from_str(r#"{"exclude_patterns": ["vendor/"]}"#).unwrap();
        assert_eq!(config.exclude_patterns, vec!["vendor/".to_string()]);
        assert_eq!(config.batch_size, 32);
    }
}

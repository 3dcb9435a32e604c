use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::domain::{IndexConfig, IndexError, Language};

/// A file admitted into the indexing pipeline.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub absolute_path: PathBuf,
    /// Project-relative path with `/` separators.
    pub relative_path: String,
    pub language: Language,
    pub size: u64,
    pub mtime: i64,
}

/// Result of a traversal: admitted files plus skipped paths with reasons.
#[derive(Debug, Default)]
pub struct DiscoveredFiles {
    pub files: Vec<CandidateFile>,
    pub skipped: Vec<(String, String)>,
}

/// Decides which files enter the pipeline.
///
/// Traversal honours the `.gitignore` hierarchy when configured, applies the
/// dotfile policy with its fixed whitelist, evaluates exclude globs, and
/// enforces the extension set, the size ceiling and the content rules:
/// NUL-bearing files are skipped as binary, and content that is not UTF-8
/// is admitted only for text kinds (which decode via latin-1, flagged
/// lossy, at read time).
pub struct PathFilter {
    root: PathBuf,
    config: Arc<IndexConfig>,
    excludes: GlobSet,
}

impl PathFilter {
    pub fn new(root: impl Into<PathBuf>, config: Arc<IndexConfig>) -> Result<Self, IndexError> {
        let excludes = compile_exclude_patterns(&config.exclude_patterns)?;
        Ok(Self {
            root: root.into(),
            config,
            excludes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the tree depth-first and return every admissible file.
    pub fn discover(&self) -> DiscoveredFiles {
        let mut discovered = DiscoveredFiles::default();

        let skip_dotfiles = self.config.skip_dotfiles;
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .require_git(false)
            .filter_entry(move |entry| {
                let name = entry.file_name().to_string_lossy();
                if !name.starts_with('.') {
                    return true;
                }
                // Depth 0 is the root itself, which may legitimately be a
                // dot-directory.
                if entry.depth() == 0 {
                    return true;
                }
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    if IndexConfig::whitelisted_dot_dirs().contains(&name.as_ref()) {
                        return true;
                    }
                }
                !skip_dotfiles
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error walking directory: {}", e);
                    discovered
                        .skipped
                        .push((e.to_string(), "unreadable".to_string()));
                    continue;
                }
            };

            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }

            match self.admit(entry.path()) {
                Ok(candidate) => discovered.files.push(candidate),
                Err(reason) => {
                    debug!("Skipping {}: {}", entry.path().display(), reason);
                    discovered
                        .skipped
                        .push((entry.path().display().to_string(), reason));
                }
            }
        }

        discovered
    }

    /// Evaluate a single path against the filter rules. Returns the
    /// candidate or a human-readable skip reason.
    pub fn admit(&self, path: &Path) -> Result<CandidateFile, String> {
        let relative_path = self.relative_path_of(path);

        if self.excludes.is_match(relative_path.as_str()) {
            return Err("excluded by pattern".to_string());
        }

        let extension = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => ext,
            None => return Err("no extension".to_string()),
        };
        if !self.config.admits_extension(extension) {
            return Err(format!("extension '{}' not configured", extension));
        }

        let metadata = std::fs::metadata(path).map_err(|e| format!("unreadable: {}", e))?;
        if metadata.len() > self.config.max_file_size {
            return Err(format!(
                "file too large ({} bytes > {} limit)",
                metadata.len(),
                self.config.max_file_size
            ));
        }

        let language = match Language::from_path(path) {
            Language::Unknown => Language::PlainText,
            known => known,
        };

        // Content rules: a NUL byte marks a binary file regardless of its
        // extension; non-UTF-8 content is only admitted for text kinds.
        let bytes = std::fs::read(path).map_err(|e| format!("unreadable: {}", e))?;
        let probe = &bytes[..bytes.len().min(8192)];
        if probe.contains(&0u8) {
            return Err("binary".to_string());
        }
        if !language.is_text_kind() && std::str::from_utf8(&bytes).is_err() {
            return Err("not valid UTF-8".to_string());
        }

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Ok(CandidateFile {
            absolute_path: path.to_path_buf(),
            relative_path,
            language,
            size: metadata.len(),
            mtime,
        })
    }

    pub fn relative_path_of(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// Read a candidate's bytes and decode them.
///
/// Returns `(text, lossy)` where `lossy` notes a latin-1 fallback decode
/// (permitted only for text kinds). Binary content is rejected: `admit`
/// already enforced the content rules, but a file may change between
/// discovery and read, so the outcome is re-checked here.
pub fn read_candidate(candidate: &CandidateFile) -> Result<(Vec<u8>, String, bool), String> {
    let bytes = std::fs::read(&candidate.absolute_path).map_err(|e| format!("read: {}", e))?;

    let probe = &bytes[..bytes.len().min(8192)];
    if probe.contains(&0u8) {
        return Err("binary".to_string());
    }

    match String::from_utf8(bytes.clone()) {
        Ok(text) => Ok((bytes, text, false)),
        Err(_) if candidate.language.is_text_kind() => {
            let text: String = bytes.iter().map(|&b| b as char).collect();
            Ok((bytes, text, true))
        }
        Err(_) => Err("not valid UTF-8".to_string()),
    }
}

/// Compile exclude patterns with `fnmatch` semantics.
///
/// Patterns ending in `/` name directories and match everything beneath
/// them; bare patterns also match at any depth.
fn compile_exclude_patterns(patterns: &[String]) -> Result<GlobSet, IndexError> {
    let mut builder = GlobSetBuilder::new();

    for pattern in patterns {
        let expanded: Vec<String> = if let Some(dir) = pattern.strip_suffix('/') {
            vec![format!("{}/**", dir), format!("**/{}/**", dir)]
        } else {
            vec![pattern.clone(), format!("**/{}", pattern)]
        };
        for glob in expanded {
            let compiled = Glob::new(&glob).map_err(|e| {
                IndexError::config(format!("invalid exclude pattern '{}': {}", pattern, e))
            })?;
            builder.add(compiled);
        }
    }

    builder
        .build()
        .map_err(|e| IndexError::config(format!("invalid exclude patterns: {}", e)))
}

use serde::{Deserialize, Serialize};

use super::Language;

/// Bookkeeping record for an indexed file.
///
/// Invariant: if the on-disk bytes of `path` still hash to `file_hash`, the
/// `chunk_ids` stored here are authoritative and complete for that file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    path: String,
    size: u64,
    mtime: i64,
    file_hash: String,
    chunk_ids: Vec<String>,
    language: Language,
    indexed_at: i64,
}

impl FileRecord {
    pub fn new(
        path: String,
        size: u64,
        mtime: i64,
        file_hash: String,
        chunk_ids: Vec<String>,
        language: Language,
    ) -> Self {
        let indexed_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Self {
            path,
            size,
            mtime,
            file_hash,
            chunk_ids,
            language,
            indexed_at,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn file_hash(&self) -> &str {
        &self.file_hash
    }

    pub fn chunk_ids(&self) -> &[String] {
        &self.chunk_ids
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn indexed_at(&self) -> i64 {
        self.indexed_at
    }
}

/// Computes the 256-bit gatekeeper hash over a file's exact bytes.
///
/// Binary read, independent of OS line endings: a false negative here would
/// silently skip reindexing, so the wide digest is deliberate.
pub fn file_hash(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(bytes);
    format!("{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_record_creation() {
        let record = FileRecord::new(
            "src/app.py".to_string(),
            128,
            1_700_000_000,
            "abc123".to_string(),
            vec!["c1".to_string(), "c2".to_string()],
            Language::Python,
        );

        assert_eq!(record.path(), "src/app.py");
        assert_eq!(record.file_hash(), "abc123");
        assert_eq!(record.chunk_ids().len(), 2);
        assert!(record.indexed_at() > 0);
    }

    #[test]
    fn test_file_hash_is_stable() {
        let bytes = b"def main():\n    pass\n";
        let hash = file_hash(bytes);

        // SHA-256 produces a 64-character hex string.
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, file_hash(bytes));
        assert_ne!(hash, file_hash(b"def main():\r\n    pass\r\n"));
    }
}

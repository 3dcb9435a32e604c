use async_trait::async_trait;

use crate::domain::{FileRecord, IndexError};

/// Persistent `path → FileRecord` bookkeeping.
///
/// Updates are atomic (write-to-temp + rename). The store never holds chunk
/// vectors, only bookkeeping.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<FileRecord>, IndexError>;

    async fn put(&self, record: FileRecord) -> Result<(), IndexError>;

    async fn delete(&self, path: &str) -> Result<(), IndexError>;

    async fn all_paths(&self) -> Result<Vec<String>, IndexError>;

    async fn all_records(&self) -> Result<Vec<FileRecord>, IndexError>;

    /// Replace a set of records and remove others in one atomic write.
    /// On failure the on-disk document is left at its previous state.
    async fn bulk_replace(
        &self,
        records: Vec<FileRecord>,
        removed_paths: &[String],
    ) -> Result<(), IndexError>;

    async fn clear(&self) -> Result<(), IndexError>;
}

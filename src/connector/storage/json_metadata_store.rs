use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::MetadataStore;
use crate::domain::{FileRecord, IndexError};

/// On-disk form of the metadata document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MetadataDocument {
    version: u32,
    files: BTreeMap<String, FileRecord>,
}

/// `path → FileRecord` bookkeeping in a single JSON document.
///
/// Every mutation rewrites the document via write-to-temp + rename, so
/// readers observe either the previous or the new state, never a torn one.
#[derive(Debug)]
pub struct JsonMetadataStore {
    path: Option<PathBuf>,
    state: Mutex<MetadataDocument>,
}

impl JsonMetadataStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let state = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text)
                .map_err(|e| IndexError::integrity(format!("corrupt metadata document: {}", e)))?
        } else {
            MetadataDocument {
                version: 1,
                files: BTreeMap::new(),
            }
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(MetadataDocument {
                version: 1,
                files: BTreeMap::new(),
            }),
        }
    }

    fn persist(&self, document: &MetadataDocument) -> Result<(), IndexError> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };

        let text = serde_json::to_string_pretty(document)
            .map_err(|e| IndexError::store(format!("failed to encode metadata: {}", e)))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        debug!("Persisted metadata for {} files", document.files.len());
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for JsonMetadataStore {
    async fn get(&self, path: &str) -> Result<Option<FileRecord>, IndexError> {
        let state = self.state.lock().await;
        Ok(state.files.get(path).cloned())
    }

    async fn put(&self, record: FileRecord) -> Result<(), IndexError> {
        let mut state = self.state.lock().await;
        let mut staged = MetadataDocument {
            version: state.version,
            files: state.files.clone(),
        };
        staged.files.insert(record.path().to_string(), record);
        self.persist(&staged)?;
        *state = staged;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), IndexError> {
        let mut state = self.state.lock().await;
        let mut staged = MetadataDocument {
            version: state.version,
            files: state.files.clone(),
        };
        staged.files.remove(path);
        self.persist(&staged)?;
        *state = staged;
        Ok(())
    }

    async fn all_paths(&self) -> Result<Vec<String>, IndexError> {
        let state = self.state.lock().await;
        Ok(state.files.keys().cloned().collect())
    }

    async fn all_records(&self) -> Result<Vec<FileRecord>, IndexError> {
        let state = self.state.lock().await;
        Ok(state.files.values().cloned().collect())
    }

    async fn bulk_replace(
        &self,
        records: Vec<FileRecord>,
        removed_paths: &[String],
    ) -> Result<(), IndexError> {
        let mut state = self.state.lock().await;

        // Stage the change on a copy so a failed persist leaves the
        // in-memory view matching the on-disk document.
        let mut staged = MetadataDocument {
            version: state.version,
            files: state.files.clone(),
        };
        for path in removed_paths {
            staged.files.remove(path);
        }
        for record in records {
            staged.files.insert(record.path().to_string(), record);
        }

        self.persist(&staged)?;
        *state = staged;
        Ok(())
    }

    async fn clear(&self) -> Result<(), IndexError> {
        let mut state = self.state.lock().await;
        let staged = MetadataDocument {
            version: state.version,
            files: BTreeMap::new(),
        };
        self.persist(&staged)?;
        *state = staged;
        Ok(())
    }
}

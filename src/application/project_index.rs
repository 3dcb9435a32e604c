use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::application::{
    CircularDependenciesUseCase, ImpactAnalysisUseCase, ImpactReport, IndexProgress,
    IndexProjectUseCase, MetadataStore, RecoveryOutcome, RelationshipStore, SearchCodeUseCase,
    VectorStore,
};
use crate::connector::{
    CachedEmbedder, DuckdbRelationshipStore, DuckdbVectorStore, JsonMetadataStore, LocalEmbedding,
    ParserRegistry,
};
use crate::domain::{
    EmbeddingConfig, IndexConfig, IndexError, IndexSummary, LanguageStats, OpContext, ProjectStats,
    SearchFilter, SearchOptions, SearchResult,
};

/// Default depth for impact analysis.
const DEFAULT_IMPACT_DEPTH: usize = 5;

/// Similarity floor and neighbour count for the `semantically_similar`
/// background job.
const SIMILAR_LINK_FLOOR: f32 = 0.75;
const SIMILAR_LINK_TOP_K: usize = 5;

/// Embedder cache capacity (entries).
const EMBED_CACHE_CAPACITY: usize = 4096;

/// File-change notification kinds accepted by `on_change`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// Owns a project's configuration and stores, and exposes the public
/// operations. Single-writer: indexing operations serialise on an internal
/// lease; readers run concurrently.
pub struct ProjectIndex {
    config: Arc<IndexConfig>,
    state_dir: PathBuf,
    metadata: Arc<dyn MetadataStore>,
    vectors: Arc<DuckdbVectorStore>,
    relationships: Arc<dyn RelationshipStore>,
    indexer: IndexProjectUseCase,
    searcher: SearchCodeUseCase,
    impact: ImpactAnalysisUseCase,
    cycles: CircularDependenciesUseCase,
    writer: Mutex<()>,
}

impl std::fmt::Debug for ProjectIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectIndex")
            .field("state_dir", &self.state_dir)
            .finish_non_exhaustive()
    }
}

impl ProjectIndex {
    /// Create the state directory and write the config document. Fails if
    /// the project is already initialized.
    pub fn initialize(state_dir: &Path, config: &IndexConfig) -> Result<(), IndexError> {
        config.validate()?;

        let config_path = state_dir.join("config.json");
        if config_path.exists() {
            return Err(IndexError::config(format!(
                "project already initialized at {}",
                state_dir.display()
            )));
        }

        std::fs::create_dir_all(state_dir)?;
        std::fs::create_dir_all(state_dir.join("vectors"))?;
        std::fs::create_dir_all(state_dir.join("cache").join("embeddings"))?;

        let text = serde_json::to_string_pretty(config)
            .map_err(|e| IndexError::config(format!("failed to encode config: {}", e)))?;
        let tmp = config_path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &config_path)?;

        info!("Initialized project state at {}", state_dir.display());
        Ok(())
    }

    /// Open an initialized project. Runs store recovery (and the follow-up
    /// reindex of known files) when the vector store was found corrupt.
    pub async fn open(root: &Path, state_dir: &Path) -> Result<Self, IndexError> {
        let config_path = state_dir.join("config.json");
        let text = std::fs::read_to_string(&config_path).map_err(|_| {
            IndexError::config(format!(
                "no config.json under {} (run initialize first)",
                state_dir.display()
            ))
        })?;
        let config: IndexConfig = serde_json::from_str(&text)
            .map_err(|e| IndexError::config(format!("invalid config.json: {}", e)))?;
        config.validate()?;

        if EmbeddingConfig::model_is_normalised(&config.embedding_model)
            != config.embedding_normalised
        {
            return Err(IndexError::config(format!(
                "embedding_normalised={} contradicts model '{}'",
                config.embedding_normalised, config.embedding_model
            )));
        }

        let config = Arc::new(config);
        let root = root
            .canonicalize()
            .map_err(|e| IndexError::invalid_input(format!("invalid project root: {}", e)))?;

        // DuckDB opening (and possible recovery backoff) blocks.
        let vectors = {
            let dir = state_dir.join("vectors");
            let config = Arc::clone(&config);
            tokio::task::spawn_blocking(move || DuckdbVectorStore::open(&dir, &config))
                .await
                .map_err(|e| IndexError::store(format!("store open task failed: {}", e)))??
        };
        let vectors = Arc::new(vectors);

        let relationships = {
            let path = state_dir.join("relationships.db");
            tokio::task::spawn_blocking(move || DuckdbRelationshipStore::open(&path))
                .await
                .map_err(|e| IndexError::store(format!("store open task failed: {}", e)))??
        };
        let relationships: Arc<dyn RelationshipStore> = Arc::new(relationships);

        let metadata: Arc<dyn MetadataStore> =
            Arc::new(JsonMetadataStore::open(state_dir.join("metadata.json"))?);

        let model = Arc::new(LocalEmbedding::with_dimensions(config.embedding_dimensions));
        let embedder = Arc::new(
            CachedEmbedder::new(model, EMBED_CACHE_CAPACITY, config.batch_size)
                .with_overflow_dir(state_dir.join("cache").join("embeddings")),
        );

        let parser = Arc::new(ParserRegistry::new(Arc::clone(&config)));

        let indexer = IndexProjectUseCase::new(
            Arc::clone(&config),
            root,
            Arc::clone(&metadata),
            vectors.clone() as Arc<dyn VectorStore>,
            Arc::clone(&relationships),
            Arc::clone(&embedder),
            parser,
        );
        let searcher = SearchCodeUseCase::new(
            Arc::clone(&config),
            vectors.clone() as Arc<dyn VectorStore>,
            Arc::clone(&embedder),
        );
        let impact = ImpactAnalysisUseCase::new(
            vectors.clone() as Arc<dyn VectorStore>,
            Arc::clone(&relationships),
        );
        let cycles = CircularDependenciesUseCase::new(
            vectors.clone() as Arc<dyn VectorStore>,
            Arc::clone(&relationships),
        );

        let index = Self {
            config,
            state_dir: state_dir.to_path_buf(),
            metadata,
            vectors,
            relationships,
            indexer,
            searcher,
            impact,
            cycles,
            writer: Mutex::new(()),
        };

        if index.vectors.take_rebuilt_flag() {
            warn!("Vector store was rebuilt after corruption; restoring known files");
            let _guard = index.writer.lock().await;
            index.indexer.reindex_known_files(&OpContext::new()).await?;
        }

        Ok(index)
    }

    /// Remove the persistent state directory entirely.
    pub fn reset(state_dir: &Path) -> Result<(), IndexError> {
        if state_dir.exists() {
            std::fs::remove_dir_all(state_dir)?;
            info!("Removed project state at {}", state_dir.display());
        }
        Ok(())
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub async fn index_project(
        &self,
        force: bool,
        progress: &dyn IndexProgress,
        ctx: &OpContext,
    ) -> Result<IndexSummary, IndexError> {
        let _guard = self.writer.lock().await;
        self.indexer.index_project(force, progress, ctx).await
    }

    pub async fn index_path(&self, path: &str, ctx: &OpContext) -> Result<(), IndexError> {
        let _guard = self.writer.lock().await;
        self.indexer.index_path(path, ctx).await?;
        Ok(())
    }

    pub async fn remove_path(&self, path: &str, ctx: &OpContext) -> Result<u64, IndexError> {
        let _guard = self.writer.lock().await;
        self.indexer.remove_path(path, ctx).await
    }

    /// Change-notification entry point for an external file watcher.
    pub async fn on_change(
        &self,
        path: &str,
        kind: ChangeKind,
        ctx: &OpContext,
    ) -> Result<(), IndexError> {
        match kind {
            ChangeKind::Created | ChangeKind::Modified => self.index_path(path, ctx).await,
            ChangeKind::Removed => self.remove_path(path, ctx).await.map(|_| ()),
        }
    }

    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
        options: &SearchOptions,
        ctx: &OpContext,
    ) -> Result<Vec<SearchResult>, IndexError> {
        match self.searcher.search(query, k, filter, options, ctx).await {
            Err(e) if e.is_store_error() => {
                self.recover_and_restore(ctx).await?;
                self.searcher.search(query, k, filter, options, ctx).await
            }
            other => other,
        }
    }

    pub async fn search_similar(
        &self,
        chunk_id_or_path: &str,
        k: usize,
        ctx: &OpContext,
    ) -> Result<Vec<SearchResult>, IndexError> {
        match self.searcher.search_similar(chunk_id_or_path, k, ctx).await {
            Err(e) if e.is_store_error() => {
                self.recover_and_restore(ctx).await?;
                self.searcher.search_similar(chunk_id_or_path, k, ctx).await
            }
            other => other,
        }
    }

    pub async fn analyze_impact(
        &self,
        symbol: &str,
        max_depth: Option<usize>,
        ctx: &OpContext,
    ) -> Result<ImpactReport, IndexError> {
        self.impact
            .analyze(symbol, max_depth.unwrap_or(DEFAULT_IMPACT_DEPTH), ctx)
            .await
    }

    pub async fn check_circular_dependencies(
        &self,
        ctx: &OpContext,
    ) -> Result<Vec<Vec<String>>, IndexError> {
        self.cycles.check(ctx).await
    }

    /// Record `semantically_similar` edges for every indexed chunk.
    pub async fn link_similar(&self, ctx: &OpContext) -> Result<u64, IndexError> {
        let _guard = self.writer.lock().await;
        self.indexer
            .link_similar(SIMILAR_LINK_TOP_K, SIMILAR_LINK_FLOOR, ctx)
            .await
    }

    pub async fn status(&self) -> Result<ProjectStats, IndexError> {
        let records = self.metadata.all_records().await?;
        let mut languages: std::collections::HashMap<String, LanguageStats> =
            std::collections::HashMap::new();
        for record in &records {
            let entry = languages
                .entry(record.language().as_str().to_string())
                .or_default();
            entry.file_count += 1;
            entry.chunk_count += record.chunk_ids().len() as u64;
        }

        Ok(ProjectStats {
            file_count: records.len() as u64,
            chunk_count: self.vectors.count().await?,
            relationship_count: self.relationships.count().await?,
            languages,
            embedding_model: self.config.embedding_model.clone(),
            embedding_dimensions: self.config.embedding_dimensions,
            state_dir: self.state_dir.display().to_string(),
        })
    }

    /// Store-level failure path: run the recovery protocol; when the store
    /// came back empty, re-add everything the metadata manager knows.
    async fn recover_and_restore(&self, ctx: &OpContext) -> Result<(), IndexError> {
        warn!("Vector store error; running recovery protocol");
        let outcome = self.vectors.recover().await?;
        if outcome == RecoveryOutcome::Rebuilt {
            let _guard = self.writer.lock().await;
            self.indexer.reindex_known_files(ctx).await?;
        }
        Ok(())
    }
}

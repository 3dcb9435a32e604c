//! Incremental-protocol tests for the indexer and search use cases,
//! composed against in-memory stores.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use codescope::{
    CachedEmbedder, DuckdbRelationshipStore, DuckdbVectorStore, IndexConfig, IndexError,
    IndexProjectUseCase, JsonMetadataStore, LocalEmbedding, MetadataStore, NoopProgress,
    OpContext, ParserRegistry, SearchCodeUseCase, SearchOptions, VectorStore,
};
use tokio_util::sync::CancellationToken;

struct Env {
    _dir: tempfile::TempDir,
    root: PathBuf,
    config: Arc<IndexConfig>,
    metadata: Arc<JsonMetadataStore>,
    vectors: Arc<DuckdbVectorStore>,
    embedder: Arc<CachedEmbedder>,
    indexer: IndexProjectUseCase,
}

impl Env {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();

        let config = Arc::new(IndexConfig {
            embedding_dimensions: 32,
            ..Default::default()
        });

        let metadata = Arc::new(JsonMetadataStore::in_memory());
        let vectors = Arc::new(DuckdbVectorStore::in_memory(&config).expect("vector store"));
        let relationships = Arc::new(DuckdbRelationshipStore::in_memory().expect("edge store"));
        let embedder = Arc::new(CachedEmbedder::new(
            Arc::new(LocalEmbedding::with_dimensions(config.embedding_dimensions)),
            1024,
            config.batch_size,
        ));
        let parser = Arc::new(ParserRegistry::new(Arc::clone(&config)));

        let indexer = IndexProjectUseCase::new(
            Arc::clone(&config),
            &root,
            metadata.clone() as Arc<dyn MetadataStore>,
            vectors.clone() as Arc<dyn VectorStore>,
            relationships,
            Arc::clone(&embedder),
            parser,
        );

        Self {
            _dir: dir,
            root,
            config,
            metadata,
            vectors,
            embedder,
            indexer,
        }
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    async fn stored_ids(&self, path: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .vectors
            .ids_for_path(path)
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        ids
    }

    fn searcher(&self) -> SearchCodeUseCase {
        SearchCodeUseCase::new(
            Arc::clone(&self.config),
            self.vectors.clone() as Arc<dyn VectorStore>,
            Arc::clone(&self.embedder),
        )
    }
}

const SAMPLE: &str = "def greet(name):\n    return f'hello {name}'\n\n\ndef part(name):\n    return f'bye {name}'\n";

#[tokio::test]
async fn test_remove_then_reindex_restores_same_chunk_ids() {
    let env = Env::new();
    env.write("mod.py", SAMPLE);

    env.indexer
        .index_path("mod.py", &OpContext::new())
        .await
        .unwrap();
    let original = env.stored_ids("mod.py").await;
    assert_eq!(original.len(), 2);

    env.indexer
        .remove_path("mod.py", &OpContext::new())
        .await
        .unwrap();
    assert!(env.stored_ids("mod.py").await.is_empty());
    assert!(env.metadata.get("mod.py").await.unwrap().is_none());

    env.indexer
        .index_path("mod.py", &OpContext::new())
        .await
        .unwrap();
    assert_eq!(env.stored_ids("mod.py").await, original);
}

#[tokio::test]
async fn test_record_matches_store_after_index_path() {
    let env = Env::new();
    env.write("mod.py", SAMPLE);

    env.indexer
        .index_path("mod.py", &OpContext::new())
        .await
        .unwrap();

    let record = env.metadata.get("mod.py").await.unwrap().unwrap();
    let mut recorded: Vec<String> = record.chunk_ids().to_vec();
    recorded.sort();

    assert_eq!(recorded, env.stored_ids("mod.py").await);
}

#[tokio::test]
async fn test_gatekeeper_short_circuits_unchanged_tree() {
    let env = Env::new();
    env.write("a.py", SAMPLE);
    env.write("b.py", "def solo():\n    return 0\n");

    let first = env
        .indexer
        .index_project(false, &NoopProgress, &OpContext::new())
        .await
        .unwrap();
    assert_eq!(first.files_indexed, 2);

    let second = env
        .indexer
        .index_project(false, &NoopProgress, &OpContext::new())
        .await
        .unwrap();
    assert_eq!(second.files_indexed, 0);
    assert_eq!(second.files_skipped, 2);
    assert!(!second.touched_store());
}

#[tokio::test]
async fn test_force_reprocesses_everything() {
    let env = Env::new();
    env.write("a.py", SAMPLE);

    env.indexer
        .index_project(false, &NoopProgress, &OpContext::new())
        .await
        .unwrap();
    let forced = env
        .indexer
        .index_project(true, &NoopProgress, &OpContext::new())
        .await
        .unwrap();

    // Forced runs re-parse, but unchanged chunks are neither added nor
    // updated.
    assert_eq!(forced.files_indexed, 1);
    assert_eq!(forced.chunks_added, 0);
    assert_eq!(forced.chunks_updated, 0);
}

#[tokio::test]
async fn test_pre_cancelled_context_indexes_nothing() {
    let env = Env::new();
    env.write("a.py", SAMPLE);

    let token = CancellationToken::new();
    token.cancel();
    let ctx = OpContext::with_cancel(token);

    let err = env
        .indexer
        .index_project(false, &NoopProgress, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Cancelled));
    assert!(env.metadata.all_paths().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_expired_deadline_is_deadline_exceeded() {
    let env = Env::new();
    env.write("a.py", SAMPLE);

    let ctx = OpContext::new().with_timeout(std::time::Duration::ZERO);
    let err = env
        .indexer
        .index_project(false, &NoopProgress, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::DeadlineExceeded));
}

#[tokio::test]
async fn test_invalid_file_still_searchable() {
    let env = Env::new();
    env.write("broken.py", "def broken(:\n  nope\n");

    let summary = env
        .indexer
        .index_project(false, &NoopProgress, &OpContext::new())
        .await
        .unwrap();
    assert_eq!(summary.files_indexed, 1);
    assert_eq!(summary.chunks_added, 1);

    let chunks = env.vectors.chunks_for_path("broken.py").await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].parse_quality().as_str(), "invalid");
}

#[tokio::test]
async fn test_adaptive_threshold_is_bounded() {
    let env = Env::new();
    let searcher = env.searcher();
    let base = env.config.similarity_threshold;
    let options = SearchOptions::new();
    let floor = base - 0.2;

    // A long query of ordinary words gets the configured default.
    let relaxed = searcher
        .effective_threshold("where do we resolve imported module names", &options)
        .await;
    assert!((relaxed - base).abs() < 1e-6);

    // Brevity and uncommon tokens lower the floor.
    let brief = searcher.effective_threshold("x", &options).await;
    assert!(brief < base);
    assert!(brief >= floor);

    // Repeated empty results lower it further, but never below the bound.
    for _ in 0..3 {
        let results = searcher
            .search("x", 5, &Default::default(), &options, &OpContext::new())
            .await
            .unwrap();
        assert!(results.is_empty());
    }
    let after_misses = searcher.effective_threshold("x", &options).await;
    assert!(after_misses < brief);
    assert!(after_misses >= floor);

    // An explicit threshold always wins.
    let explicit = searcher
        .effective_threshold("x", &SearchOptions::new().with_threshold(0.9))
        .await;
    assert!((explicit - 0.9).abs() < 1e-6);
}

#[tokio::test]
async fn test_results_ordered_by_score_then_id() {
    let env = Env::new();
    let body = "def pair():\n    return 1\n";
    env.write("one.py", body);
    env.write("two.py", body);

    env.indexer
        .index_project(false, &NoopProgress, &OpContext::new())
        .await
        .unwrap();

    let searcher = env.searcher();
    let results = searcher
        .search(
            "def pair():\n    return 1",
            10,
            &Default::default(),
            &SearchOptions::new().with_threshold(0.5),
            &OpContext::new(),
        )
        .await
        .unwrap();

    // Identical content gives identical scores; ties break by id ascending.
    assert_eq!(results.len(), 2);
    assert!(results[0].score() >= results[1].score());
    assert!(results[0].chunk().id() < results[1].chunk().id());
}

#[tokio::test]
async fn test_markdown_tree_indexes_sections() {
    let env = Env::new();
    env.write(
        "docs/guide.md",
        "# Setup\n\nInstall the binary, then initialize a project state directory before running any indexing command.\n\n# Query\n\nRun searches with metadata filters to narrow the results down to one language, path prefix or grade.\n",
    );

    let summary = env
        .indexer
        .index_project(false, &NoopProgress, &OpContext::new())
        .await
        .unwrap();
    assert_eq!(summary.files_indexed, 1);

    let chunks = env.vectors.chunks_for_path("docs/guide.md").await.unwrap();
    let sections: Vec<_> = chunks
        .iter()
        .filter(|c| c.kind().as_str() == "section")
        .collect();
    assert_eq!(sections.len(), 2);
    assert!(chunks.iter().any(|c| c.kind().as_str() == "file"));
}

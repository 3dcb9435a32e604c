//! Integration tests for CodeScope.
//!
//! These tests drive the full pipeline through the `ProjectIndex` facade:
//! initialize → index → search/analyse, against real state directories.

use std::fs;
use std::path::PathBuf;

use codescope::{
    ChangeKind, IndexConfig, IndexError, NoopProgress, OpContext, ProjectIndex, SearchFilter,
    SearchOptions,
};

struct TestProject {
    _dir: tempfile::TempDir,
    root: PathBuf,
    state_dir: PathBuf,
}

impl TestProject {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("project");
        fs::create_dir_all(&root).unwrap();
        let state_dir = dir.path().join("state");
        Self {
            _dir: dir,
            root,
            state_dir,
        }
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn initialize(&self) {
        let config = IndexConfig {
            embedding_dimensions: 48,
            ..Default::default()
        };
        ProjectIndex::initialize(&self.state_dir, &config).unwrap();
    }

    async fn open(&self) -> ProjectIndex {
        ProjectIndex::open(&self.root, &self.state_dir)
            .await
            .expect("open project index")
    }
}

fn sample_python() -> &'static str {
    r#"def resolve_symbols(table, names):
    """Resolves names against the symbol table."""
    found = []
    for name in names:
        if name in table:
            found.append(table[name])
    return found


def load_table(path):
    with open(path) as f:
        return parse_table(f.read())
"#
}

async fn index_all(index: &ProjectIndex) -> codescope::IndexSummary {
    index
        .index_project(false, &NoopProgress, &OpContext::new())
        .await
        .expect("index project")
}

#[tokio::test]
async fn test_initialize_is_idempotent_error() {
    let project = TestProject::new();
    project.initialize();

    let config = IndexConfig::default();
    let err = ProjectIndex::initialize(&project.state_dir, &config).unwrap_err();
    assert!(matches!(err, IndexError::Config(_)));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_open_without_initialize_is_config_error() {
    let project = TestProject::new();
    let err = ProjectIndex::open(&project.root, &project.state_dir)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Config(_)));
}

#[tokio::test]
async fn test_index_and_search_roundtrip() {
    let project = TestProject::new();
    project.write("src/resolver.py", sample_python());
    project.write("README.md", "# Resolver\n\nResolves symbol names against a table of declarations for the project.\n");
    project.initialize();

    let index = project.open().await;
    let summary = index_all(&index).await;
    assert_eq!(summary.files_indexed, 2);
    assert!(summary.chunks_added >= 3);

    // Querying with a chunk's own text pins similarity at 1.0.
    let probe = "def load_table(path):\n    with open(path) as f:\n        return parse_table(f.read())";
    let results = index
        .search(
            probe,
            5,
            &SearchFilter::new(),
            &SearchOptions::new().with_threshold(0.5),
            &OpContext::new(),
        )
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].chunk().name(), Some("load_table"));
    assert!(results[0].vector_similarity() > 0.99);
}

#[tokio::test]
async fn test_second_run_skips_everything() {
    let project = TestProject::new();
    project.write("a.py", sample_python());
    project.write("b.py", "def other():\n    return 2\n");
    project.initialize();

    let index = project.open().await;
    index_all(&index).await;

    let second = index_all(&index).await;
    assert_eq!(second.files_indexed, 0);
    assert_eq!(second.files_skipped, 2);
    assert_eq!(second.chunks_added, 0);
    assert_eq!(second.chunks_updated, 0);
    assert_eq!(second.chunks_deleted, 0);
}

#[tokio::test]
async fn test_single_byte_change_reindexes_one_file() {
    let project = TestProject::new();
    project.write("a.py", "def alpha():\n    return 1\n");
    project.write("b.py", "def beta():\n    return 2\n");
    project.initialize();

    let index = project.open().await;
    index_all(&index).await;

    project.write("a.py", "def alpha():\n    return 9\n");
    let summary = index_all(&index).await;

    assert_eq!(summary.files_indexed, 1);
    assert_eq!(summary.files_skipped, 1);
    assert_eq!(summary.chunks_updated, 1);
    assert_eq!(summary.chunks_added, 0);
}

#[tokio::test]
async fn test_deleted_file_chunks_are_dropped() {
    let project = TestProject::new();
    project.write("gone.py", "def vanishing():\n    return 1\n");
    project.write("kept.py", "def kept():\n    return 2\n");
    project.initialize();

    let index = project.open().await;
    index_all(&index).await;
    assert_eq!(index.status().await.unwrap().file_count, 2);

    fs::remove_file(project.root.join("gone.py")).unwrap();
    let summary = index_all(&index).await;
    assert!(summary.chunks_deleted >= 1);

    let stats = index.status().await.unwrap();
    assert_eq!(stats.file_count, 1);
}

#[tokio::test]
async fn test_identical_bodies_share_content_hash_and_vector() {
    let project = TestProject::new();
    let body = "def compute(values):\n    total = 0\n    for v in values:\n        total += v\n    return total\n";
    project.write("first.py", body);
    project.write("second.py", body);
    project.initialize();

    let index = project.open().await;
    index_all(&index).await;

    let probe = "def compute(values):\n    total = 0\n    for v in values:\n        total += v\n    return total";
    let results = index
        .search(
            probe,
            5,
            &SearchFilter::new(),
            &SearchOptions::new().with_threshold(0.5),
            &OpContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(
        results[0].chunk().content_hash(),
        results[1].chunk().content_hash()
    );
    // Same content, same vector: both results score identically.
    assert!((results[0].vector_similarity() - results[1].vector_similarity()).abs() < 1e-6);
}

#[tokio::test]
async fn test_filter_correctness() {
    let project = TestProject::new();
    project.write("app.py", "def py_func():\n    return 'python'\n");
    project.write("app.rb", "def rb_func\n  'ruby'\nend\n");
    project.initialize();

    let index = project.open().await;
    index_all(&index).await;

    let filter = SearchFilter::new().with_languages(vec!["python".to_string()]);
    let results = index
        .search(
            "function returning a language name",
            10,
            &filter,
            &SearchOptions::new().with_threshold(-1.0),
            &OpContext::new(),
        )
        .await
        .unwrap();

    assert!(!results.is_empty());
    for result in &results {
        assert_eq!(result.chunk().language().as_str(), "python");
    }
}

#[tokio::test]
async fn test_notify_modified_and_removed() {
    let project = TestProject::new();
    project.write("w.py", "def watched():\n    return 1\n");
    project.initialize();

    let index = project.open().await;
    index_all(&index).await;

    project.write("w.py", "def watched():\n    return 2\n\ndef extra():\n    return 3\n");
    index
        .on_change("w.py", ChangeKind::Modified, &OpContext::new())
        .await
        .unwrap();
    let stats = index.status().await.unwrap();
    assert_eq!(stats.chunk_count, 2);

    fs::remove_file(project.root.join("w.py")).unwrap();
    index
        .on_change("w.py", ChangeKind::Removed, &OpContext::new())
        .await
        .unwrap();
    let stats = index.status().await.unwrap();
    assert_eq!(stats.file_count, 0);
    assert_eq!(stats.chunk_count, 0);
}

#[tokio::test]
async fn test_import_cycle_detection() {
    let project = TestProject::new();
    project.write("a.py", "import b\n\ndef fa():\n    return b.fb()\n");
    project.write("b.py", "import c\n\ndef fb():\n    return c.fc()\n");
    project.write("c.py", "import a\n\ndef fc():\n    return 1\n");
    project.initialize();

    let index = project.open().await;
    index_all(&index).await;

    let cycles = index
        .check_circular_dependencies(&OpContext::new())
        .await
        .unwrap();

    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0], vec!["a.py", "b.py", "c.py"]);
}

#[tokio::test]
async fn test_impact_analysis_follows_callers() {
    let project = TestProject::new();
    project.write(
        "core.py",
        "def fetch_rows(query):\n    return run(query)\n",
    );
    project.write(
        "service.py",
        "def list_users():\n    return fetch_rows('select * from users')\n",
    );
    project.write(
        "api.py",
        "def users_endpoint():\n    return list_users()\n",
    );
    project.initialize();

    let index = project.open().await;
    index_all(&index).await;

    let report = index
        .analyze_impact("fetch_rows", None, &OpContext::new())
        .await
        .unwrap();

    assert_eq!(report.root_symbol, "fetch_rows");
    assert!(report.total_affected >= 2);
    assert!(report.max_depth_reached >= 2);

    let depth1: Vec<&str> = report.by_depth[0].iter().map(|n| n.symbol.as_str()).collect();
    assert!(depth1.contains(&"list_users"));
}

#[tokio::test]
async fn test_unknown_symbol_impact_is_not_found() {
    let project = TestProject::new();
    project.write("a.py", "def real():\n    return 1\n");
    project.initialize();

    let index = project.open().await;
    index_all(&index).await;

    let err = index
        .analyze_impact("imaginary", None, &OpContext::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_search_similar_excludes_probe() {
    let project = TestProject::new();
    project.write("x.py", "def target():\n    return compute(1, 2, 3)\n");
    project.write("y.py", "def lookalike():\n    return compute(4, 5, 6)\n");
    project.initialize();

    let index = project.open().await;
    index_all(&index).await;

    let results = index
        .search_similar("x.py", 10, &OpContext::new())
        .await
        .unwrap();

    assert!(results.iter().all(|r| r.chunk().file_path() != "x.py"));
}

#[tokio::test]
async fn test_reset_then_reindex_restores_chunk_count() {
    let project = TestProject::new();
    project.write("a.py", sample_python());
    project.initialize();

    let index = project.open().await;
    index_all(&index).await;
    let before = index.status().await.unwrap().chunk_count;
    drop(index);

    ProjectIndex::reset(&project.state_dir).unwrap();
    assert!(!project.state_dir.exists());

    project.initialize();
    let index = project.open().await;
    index_all(&index).await;
    assert_eq!(index.status().await.unwrap().chunk_count, before);
}

#[tokio::test]
async fn test_corrupt_store_recovers_on_open() {
    let project = TestProject::new();
    project.write("a.py", sample_python());
    project.initialize();

    {
        let index = project.open().await;
        index_all(&index).await;
    }

    // Smash the primary store file; metadata survives.
    let db_path = project.state_dir.join("vectors").join("index.duckdb");
    fs::write(&db_path, b"garbage that is definitely not a database").unwrap();

    // Re-opening detects the corruption, rebuilds, and restores every file
    // the metadata manager knows about.
    let index = project.open().await;
    let stats = index.status().await.unwrap();
    assert!(stats.chunk_count >= 2);

    let probe = "def load_table(path):\n    with open(path) as f:\n        return parse_table(f.read())";
    let results = index
        .search(
            probe,
            5,
            &SearchFilter::new(),
            &SearchOptions::new().with_threshold(0.5),
            &OpContext::new(),
        )
        .await
        .unwrap();
    assert_eq!(results[0].chunk().name(), Some("load_table"));
}

#[tokio::test]
async fn test_empty_file_yields_single_root_chunk() {
    let project = TestProject::new();
    project.write("empty.py", "");
    project.initialize();

    let index = project.open().await;
    let summary = index_all(&index).await;

    assert_eq!(summary.files_indexed, 1);
    assert_eq!(summary.chunks_added, 1);
}

#[tokio::test]
async fn test_unicode_filenames() {
    let project = TestProject::new();
    project.write("café.py", "def brew():\n    return 'espresso'\n");
    project.initialize();

    let index = project.open().await;
    let summary = index_all(&index).await;
    assert_eq!(summary.files_indexed, 1);

    let results = index
        .search(
            "def brew():\n    return 'espresso'",
            5,
            &SearchFilter::new(),
            &SearchOptions::new().with_threshold(0.5),
            &OpContext::new(),
        )
        .await
        .unwrap();
    assert_eq!(results[0].chunk().file_path(), "café.py");
}

#[tokio::test]
async fn test_state_directory_layout() {
    let project = TestProject::new();
    project.write("a.py", "def f():\n    return 1\n");
    project.initialize();

    let index = project.open().await;
    index_all(&index).await;
    drop(index);

    assert!(project.state_dir.join("config.json").exists());
    assert!(project.state_dir.join("metadata.json").exists());
    assert!(project.state_dir.join("vectors").join("index.duckdb").exists());
    assert!(project.state_dir.join("relationships.db").exists());
    assert!(project.state_dir.join("cache").join("embeddings").exists());
}

#[tokio::test]
async fn test_dotfile_state_dir_not_indexed() {
    // The default state dir lives inside the project root; the dotfile
    // policy must keep it out of the index.
    let project = TestProject::new();
    let state_dir = project.root.join(".codescope");
    project.write("a.py", "def f():\n    return 1\n");

    let config = IndexConfig {
        embedding_dimensions: 48,
        ..Default::default()
    };
    ProjectIndex::initialize(&state_dir, &config).unwrap();

    let index = ProjectIndex::open(&project.root, &state_dir).await.unwrap();
    let summary = index
        .index_project(false, &NoopProgress, &OpContext::new())
        .await
        .unwrap();

    assert_eq!(summary.files_indexed, 1);
}

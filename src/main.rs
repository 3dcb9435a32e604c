//! CodeScope CLI - local incremental code intelligence.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use codescope::{
    ChangeKind, FileStats, Grade, IndexConfig, IndexError, IndexProgress, OpContext, ProjectIndex,
    SearchFilter, SearchOptions,
};

/// CodeScope - semantic code chunks, embeddings and search for one project
#[derive(Parser)]
#[command(name = "codescope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root directory
    #[arg(short, long, global = true, default_value = ".")]
    root: String,

    /// State directory (defaults to <root>/.codescope)
    #[arg(short, long, global = true)]
    state_dir: Option<String>,

    /// Abort the operation after this many seconds
    #[arg(short, long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the project state directory
    Init {
        /// Comma-separated file extensions to index (defaults to the
        /// built-in set)
        #[arg(long)]
        extensions: Option<String>,

        /// Glob patterns to exclude (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// Embedding model identifier
        #[arg(long)]
        model: Option<String>,
    },

    /// Index the project tree incrementally
    Index {
        /// Ignore recorded file hashes and rebuild everything
        #[arg(short, long)]
        force: bool,

        /// Also record semantic-similarity edges between chunks
        #[arg(long)]
        link_similar: bool,
    },

    /// Re-index or remove a single file after an external change
    Notify {
        /// Project-relative path
        path: String,

        /// Change kind: created, modified or removed
        #[arg(long, default_value = "modified")]
        kind: String,
    },

    /// Search for code
    Search {
        /// The search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long, default_value = "10")]
        limit: usize,

        /// Explicit similarity threshold (otherwise adaptive)
        #[arg(long)]
        threshold: Option<f32>,

        /// Filter by language (repeatable)
        #[arg(short = 'L', long)]
        language: Vec<String>,

        /// Filter by chunk kind (repeatable)
        #[arg(short = 'K', long)]
        kind: Vec<String>,

        /// Filter by path prefix
        #[arg(long)]
        path_prefix: Option<String>,

        /// Filter by path glob
        #[arg(long)]
        path_glob: Option<String>,

        /// Admit only chunks graded at this letter or better
        #[arg(long)]
        max_grade: Option<String>,

        /// Treat a path-shaped query as "find code similar to this file"
        #[arg(long)]
        find_similar: bool,

        /// Attach neighbouring chunk names to each result
        #[arg(long)]
        context: bool,
    },

    /// Find chunks similar to an indexed chunk id or file
    Similar {
        /// Chunk id or project-relative file path
        target: String,

        /// Maximum number of results
        #[arg(short = 'k', long, default_value = "10")]
        limit: usize,
    },

    /// Show what would be affected if a symbol changes
    Impact {
        /// Symbol name to analyse
        symbol: String,

        /// Maximum traversal depth
        #[arg(short, long)]
        depth: Option<usize>,
    },

    /// Detect circular imports
    Cycles,

    /// Remove a file from the index
    Remove {
        /// Project-relative path
        path: String,
    },

    /// Show index statistics
    Status,

    /// Delete the project state directory
    Reset,
}

/// Renders index progress on an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} {bar:40.green/dim} {pos}/{len} {msg:.dim}")
                .expect("Invalid progress bar template")
                .progress_chars("━━─"),
        );
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl IndexProgress for CliProgress {
    fn on_discovered(&self, total_files: u64) {
        self.bar.set_length(total_files);
    }

    fn on_file_started(&self, path: &str) {
        self.bar.set_message(path.to_string());
    }

    fn on_file_finished(&self, _stats: &FileStats) {
        self.bar.inc(1);
    }

    fn on_error(&self, _path: &str, _error: &IndexError) {
        self.bar.inc(1);
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Warning: failed to install log subscriber");
    }

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), IndexError> {
    let root = PathBuf::from(&cli.root);
    let state_dir = cli
        .state_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| root.join(".codescope"));

    // Ctrl-C cancels cooperatively; a --timeout becomes a deadline.
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
    }
    let mut ctx = OpContext::with_cancel(token);
    if let Some(seconds) = cli.timeout {
        ctx = ctx.with_timeout(Duration::from_secs(seconds));
    }

    match cli.command {
        Commands::Init {
            extensions,
            exclude,
            model,
        } => {
            let mut config = IndexConfig::default();
            if let Some(extensions) = extensions {
                config.file_extensions = extensions
                    .split(',')
                    .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect();
            }
            config.exclude_patterns = exclude;
            if let Some(model) = model {
                config.embedding_normalised =
                    codescope::EmbeddingConfig::model_is_normalised(&model);
                config.embedding_model = model;
            }

            ProjectIndex::initialize(&state_dir, &config)?;
            println!("Initialized {}", state_dir.display());
        }

        Commands::Index {
            force,
            link_similar,
        } => {
            let index = ProjectIndex::open(&root, &state_dir).await?;
            let progress = CliProgress::new();
            let summary = index.index_project(force, &progress, &ctx).await;
            progress.finish();
            let summary = summary?;

            println!(
                "Indexed {} files ({} unchanged, {} failed): +{} ~{} -{} chunks in {:.2}s",
                summary.files_indexed,
                summary.files_skipped,
                summary.files_failed,
                summary.chunks_added,
                summary.chunks_updated,
                summary.chunks_deleted,
                summary.elapsed_ms as f64 / 1000.0
            );

            if link_similar {
                let edges = index.link_similar(&ctx).await?;
                println!("Recorded {} similarity edges", edges);
            }

            if !summary.is_clean() {
                return Err(IndexError::store(format!(
                    "{} files failed; see the log",
                    summary.files_failed
                )));
            }
        }

        Commands::Notify { path, kind } => {
            let change = match kind.as_str() {
                "created" => ChangeKind::Created,
                "removed" => ChangeKind::Removed,
                _ => ChangeKind::Modified,
            };
            let index = ProjectIndex::open(&root, &state_dir).await?;
            index.on_change(&path, change, &ctx).await?;
            println!("Updated {}", path);
        }

        Commands::Search {
            query,
            limit,
            threshold,
            language,
            kind,
            path_prefix,
            path_glob,
            max_grade,
            find_similar,
            context,
        } => {
            let index = ProjectIndex::open(&root, &state_dir).await?;

            let mut filter = SearchFilter::new();
            if !language.is_empty() {
                filter = filter.with_languages(language);
            }
            if !kind.is_empty() {
                filter = filter.with_kinds(kind);
            }
            if let Some(prefix) = path_prefix {
                filter = filter.with_path_prefix(prefix);
            }
            if let Some(glob) = path_glob {
                filter = filter.with_path_glob(glob);
            }
            if let Some(grade) = max_grade {
                filter = filter.with_max_grade(Grade::parse(&grade));
            }

            let mut options = SearchOptions::new()
                .with_find_similar_path(find_similar)
                .with_enrich_context(context);
            if let Some(threshold) = threshold {
                options = options.with_threshold(threshold);
            }

            let results = index.search(&query, limit, &filter, &options, &ctx).await?;
            print_results(&results);
        }

        Commands::Similar { target, limit } => {
            let index = ProjectIndex::open(&root, &state_dir).await?;
            let results = index.search_similar(&target, limit, &ctx).await?;
            print_results(&results);
        }

        Commands::Impact { symbol, depth } => {
            let index = ProjectIndex::open(&root, &state_dir).await?;
            let report = index.analyze_impact(&symbol, depth, &ctx).await?;

            println!(
                "{} affects {} chunks (max depth {})",
                report.root_symbol, report.total_affected, report.max_depth_reached
            );
            for level in &report.by_depth {
                for node in level {
                    println!(
                        "  {}{} {} ({})",
                        "  ".repeat(node.depth - 1),
                        node.relation,
                        node.symbol,
                        node.file_path
                    );
                }
            }
        }

        Commands::Cycles => {
            let index = ProjectIndex::open(&root, &state_dir).await?;
            let cycles = index.check_circular_dependencies(&ctx).await?;

            if cycles.is_empty() {
                println!("No circular imports found.");
            } else {
                println!("Found {} import cycles:\n", cycles.len());
                for (i, cycle) in cycles.iter().enumerate() {
                    println!("{}. {}", i + 1, cycle.join(" -> "));
                }
            }
        }

        Commands::Remove { path } => {
            let index = ProjectIndex::open(&root, &state_dir).await?;
            let deleted = index.remove_path(&path, &ctx).await?;
            println!("Removed {} ({} chunks)", path, deleted);
        }

        Commands::Status => {
            let index = ProjectIndex::open(&root, &state_dir).await?;
            let stats = index.status().await?;

            println!("CodeScope Status");
            println!("================");
            println!("Files:         {}", stats.file_count);
            println!("Chunks:        {}", stats.chunk_count);
            println!("Relationships: {}", stats.relationship_count);
            println!(
                "Model:         {} ({} dims)",
                stats.embedding_model, stats.embedding_dimensions
            );
            println!("State dir:     {}", stats.state_dir);
            if !stats.languages.is_empty() {
                println!("Languages:");
                let mut languages: Vec<_> = stats.languages.iter().collect();
                languages.sort_by(|a, b| a.0.cmp(b.0));
                for (language, counts) in languages {
                    println!(
                        "  {:<12} {} files, {} chunks",
                        language, counts.file_count, counts.chunk_count
                    );
                }
            }
        }

        Commands::Reset => {
            ProjectIndex::reset(&state_dir)?;
            println!("Removed {}", state_dir.display());
        }
    }

    Ok(())
}

fn print_results(results: &[codescope::SearchResult]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    println!("Found {} results:\n", results.len());
    for (i, result) in results.iter().enumerate() {
        println!("{}. {}", i + 1, result.display_line());

        if let Some(name) = result.chunk().name() {
            println!("   Symbol: {} ({})", name, result.chunk().kind());
        }
        if let Some(context) = result.context() {
            if !context.neighbour_names.is_empty() {
                println!("   Nearby: {}", context.neighbour_names.join(", "));
            }
        }

        let preview: String = result
            .chunk()
            .content()
            .lines()
            .take(3)
            .map(|l| format!("   | {}", l))
            .collect::<Vec<_>>()
            .join("\n");
        println!("{}", preview);
        println!();
    }
}

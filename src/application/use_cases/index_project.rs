use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::application::{
    EmbeddingService, IndexProgress, MetadataStore, ParserService, RecoveryOutcome,
    RelationshipStore, SymbolEntry, VectorStore,
};
use crate::connector::{read_candidate, CandidateFile, CachedEmbedder, PathFilter};
use crate::domain::{
    file_hash, ChunkKind, CodeChunk, Embedding, FileRecord, FileStats, IndexConfig, IndexError,
    IndexSummary, OpContext, RelationKind, Relationship, SymbolRef, SymbolRefKind,
};

/// Drives the pipeline and owns the incremental-update protocol.
///
/// Single-writer: the facade serialises calls into this use case. Per-file
/// work runs on a bounded worker pool; the per-file sequence is sequential
/// and isolated.
pub struct IndexProjectUseCase {
    config: Arc<IndexConfig>,
    root: std::path::PathBuf,
    metadata: Arc<dyn MetadataStore>,
    vectors: Arc<dyn VectorStore>,
    relationships: Arc<dyn RelationshipStore>,
    embedder: Arc<CachedEmbedder>,
    parser: Arc<dyn ParserService>,
}

/// Everything the relationship-resolution phase needs from one file.
struct ProcessedFile {
    record: FileRecord,
    chunks: Vec<CodeChunk>,
    references: Vec<SymbolRef>,
    stats: FileStats,
}

impl IndexProjectUseCase {
    pub fn new(
        config: Arc<IndexConfig>,
        root: impl Into<std::path::PathBuf>,
        metadata: Arc<dyn MetadataStore>,
        vectors: Arc<dyn VectorStore>,
        relationships: Arc<dyn RelationshipStore>,
        embedder: Arc<CachedEmbedder>,
        parser: Arc<dyn ParserService>,
    ) -> Self {
        Self {
            config,
            root: root.into(),
            metadata,
            vectors,
            relationships,
            embedder,
            parser,
        }
    }

    /// Full traversal. With `force`, the metadata gatekeeper is ignored and
    /// every admitted file is re-processed.
    pub async fn index_project(
        &self,
        force: bool,
        progress: &dyn IndexProgress,
        ctx: &OpContext,
    ) -> Result<IndexSummary, IndexError> {
        let start_time = Instant::now();
        ctx.checkpoint()?;

        let filter = PathFilter::new(&self.root, Arc::clone(&self.config))?;
        let discovered = filter.discover();
        let mut candidates = discovered.files;
        prioritize(&mut candidates);

        info!(
            "Found {} files to consider ({} skipped by filter)",
            candidates.len(),
            discovered.skipped.len()
        );
        progress.on_discovered(candidates.len() as u64);

        // Files that vanished since the last run.
        let known_paths = self.metadata.all_paths().await?;
        let current_paths: HashSet<&str> =
            candidates.iter().map(|c| c.relative_path.as_str()).collect();
        let deleted_paths: Vec<String> = known_paths
            .into_iter()
            .filter(|p| !current_paths.contains(p.as_str()))
            .collect();

        let mut summary = IndexSummary {
            files_seen: candidates.len() as u64,
            ..Default::default()
        };

        for path in &deleted_paths {
            ctx.checkpoint()?;
            summary.chunks_deleted += self.drop_file_state(path, ctx).await?;
        }

        // Per-file pipeline on a bounded worker pool. A child context lets
        // a store failure halt in-flight workers at their next checkpoint.
        let workers = self.config.worker_count();
        let worker_ctx = ctx.child();

        let mut outcomes = stream::iter(candidates.into_iter().map(|candidate| {
            let this = &*self;
            let worker_ctx = &worker_ctx;
            async move {
                let path = candidate.relative_path.clone();
                progress.on_file_started(&path);
                match this.process_file(&candidate, force, worker_ctx).await {
                    Ok(processed) => {
                        progress.on_file_finished(&processed.stats);
                        Ok(processed)
                    }
                    Err(e) => {
                        progress.on_error(&path, &e);
                        Err((path, e))
                    }
                }
            }
        }))
        .buffer_unordered(workers);

        let mut processed: Vec<ProcessedFile> = Vec::new();
        let mut store_failure: Option<IndexError> = None;
        let mut cancelled: Option<IndexError> = None;
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Ok(file) => {
                    if file.stats.skipped {
                        summary.files_skipped += 1;
                    } else {
                        summary.files_indexed += 1;
                        summary.chunks_added += file.stats.chunks_added;
                        summary.chunks_updated += file.stats.chunks_updated;
                        summary.chunks_deleted += file.stats.chunks_deleted;
                    }
                    processed.push(file);
                }
                Err((path, e)) if e.is_cancellation() => {
                    if store_failure.is_none() && cancelled.is_none() {
                        warn!("Indexing cancelled at {}", path);
                        cancelled = Some(e);
                        worker_ctx.cancel_token().cancel();
                    }
                    // Secondary cancellations from the halted pool are noise.
                }
                Err((path, e)) if e.is_store_error() => {
                    if store_failure.is_none() {
                        warn!("Store failure at {}: {}", path, e);
                        summary.files_failed += 1;
                        store_failure = Some(e);
                        worker_ctx.cancel_token().cancel();
                    }
                }
                Err((path, e)) => {
                    warn!("Failed to index {}: {}", path, e);
                    summary.files_failed += 1;
                }
            }
        }
        drop(outcomes);

        if let Some(e) = cancelled {
            // Flush what completed, then surface the cancellation.
            self.flush_metadata(&processed, &deleted_paths).await?;
            return Err(e);
        }

        // A store-level failure halts the batch and runs the recovery
        // protocol before anything else.
        if store_failure.is_some() {
            self.flush_metadata(&processed, &deleted_paths).await?;
            self.recover_store(ctx).await?;
            return Err(IndexError::store(
                "vector store failed mid-batch; recovery completed, re-run indexing",
            ));
        }

        // Resolve references into relationship edges now that every chunk
        // is in the store.
        let resolvable: Vec<&ProcessedFile> =
            processed.iter().filter(|f| !f.stats.skipped).collect();
        if !resolvable.is_empty() {
            self.resolve_relationships(&resolvable, ctx).await?;
        }

        // FileRecords land last: a crash before this point re-processes the
        // affected files on the next run.
        self.flush_metadata(&processed, &deleted_paths).await?;

        summary.elapsed_ms = start_time.elapsed().as_millis() as u64;
        info!(
            "Indexing complete: {} indexed, {} skipped, {} failed, +{} ~{} -{} chunks in {:.2}s",
            summary.files_indexed,
            summary.files_skipped,
            summary.files_failed,
            summary.chunks_added,
            summary.chunks_updated,
            summary.chunks_deleted,
            summary.elapsed_ms as f64 / 1000.0
        );

        Ok(summary)
    }

    /// Re-index a single file (e.g. after a watcher event). Bypasses the
    /// gatekeeper so the chunk set is reconciled even for unchanged bytes.
    pub async fn index_path(&self, path: &str, ctx: &OpContext) -> Result<FileStats, IndexError> {
        ctx.checkpoint()?;
        let filter = PathFilter::new(&self.root, Arc::clone(&self.config))?;
        let absolute = self.root.join(path);

        if !absolute.exists() {
            let deleted = self.remove_path(path, ctx).await?;
            return Ok(FileStats {
                path: path.to_string(),
                chunks_deleted: deleted,
                ..Default::default()
            });
        }

        let candidate = filter
            .admit(&absolute)
            .map_err(|reason| IndexError::invalid_input(format!("{}: {}", path, reason)))?;

        let processed = self.process_file(&candidate, true, ctx).await?;
        if processed.stats.skipped {
            return Ok(processed.stats);
        }
        self.resolve_relationships(&[&processed], ctx).await?;
        self.metadata.put(processed.record).await?;
        Ok(processed.stats)
    }

    /// Delete a file's chunks, edges and FileRecord. Returns the number of
    /// chunks removed.
    pub async fn remove_path(&self, path: &str, ctx: &OpContext) -> Result<u64, IndexError> {
        ctx.checkpoint()?;
        let deleted = self.drop_file_state(path, ctx).await?;
        self.metadata.delete(path).await?;
        Ok(deleted)
    }

    /// Recovery support: re-add every file the metadata manager knows about.
    pub async fn reindex_known_files(&self, ctx: &OpContext) -> Result<u64, IndexError> {
        let records = self.metadata.all_records().await?;
        let mut reindexed = 0u64;

        for record in records {
            ctx.checkpoint()?;
            match self.index_path(record.path(), ctx).await {
                Ok(_) => reindexed += 1,
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => warn!("Failed to restore {}: {}", record.path(), e),
            }
        }

        info!("Restored {} files into the rebuilt store", reindexed);
        Ok(reindexed)
    }

    /// Optional background job: record `semantically_similar` edges for
    /// every indexed chunk above `floor`, keeping the top `top_k`.
    pub async fn link_similar(
        &self,
        top_k: usize,
        floor: f32,
        ctx: &OpContext,
    ) -> Result<u64, IndexError> {
        let records = self.metadata.all_records().await?;
        let mut edges: Vec<Relationship> = Vec::new();

        for record in records {
            for chunk_id in record.chunk_ids() {
                ctx.checkpoint()?;
                let vector = match self.vectors.vector_of(chunk_id).await? {
                    Some(v) => v,
                    None => continue,
                };
                let neighbours = self
                    .vectors
                    .query(&vector, top_k + 1, &Default::default(), ctx)
                    .await?;
                for (neighbour, score) in neighbours {
                    if neighbour.id() == chunk_id.as_str() || score < floor {
                        continue;
                    }
                    edges.push(Relationship::new(
                        chunk_id.clone(),
                        neighbour.id().to_string(),
                        RelationKind::SemanticallySimilar,
                        score,
                    ));
                }
            }
        }

        let count = edges.len() as u64;
        self.relationships.upsert(&edges).await?;
        info!("Linked {} semantic-similarity edges", count);
        Ok(count)
    }

    // ── Per-file protocol ────────────────────────────────────────────────

    async fn process_file(
        &self,
        candidate: &CandidateFile,
        force: bool,
        ctx: &OpContext,
    ) -> Result<ProcessedFile, IndexError> {
        ctx.checkpoint()?;
        let path = candidate.relative_path.as_str();

        // The path filter already refused binary and undecodable content at
        // discovery; a file that changed underneath us since then is still
        // skipped with the same reason. Real I/O failures get one retry,
        // then report.
        let (bytes, text, lossy) = match read_candidate(candidate) {
            Ok(read) => read,
            Err(reason) if reason == "binary" || reason.contains("UTF-8") => {
                debug!("Skipping {}: {}", path, reason);
                return Ok(ProcessedFile {
                    record: FileRecord::new(
                        path.to_string(),
                        candidate.size,
                        candidate.mtime,
                        String::new(),
                        Vec::new(),
                        candidate.language,
                    ),
                    chunks: Vec::new(),
                    references: Vec::new(),
                    stats: FileStats {
                        path: path.to_string(),
                        skipped: true,
                        ..Default::default()
                    },
                });
            }
            Err(first) => {
                debug!("Retrying read of {} after: {}", path, first);
                read_candidate(candidate)
                    .map_err(|e| IndexError::Io(std::io::Error::other(format!("{}: {}", path, e))))?
            }
        };
        if lossy {
            debug!("{} decoded with latin-1 fallback", path);
        }

        // Gatekeeper: identical bytes mean no parse/embed/store work.
        let digest = file_hash(&bytes);
        let existing_record = self.metadata.get(path).await?;
        if !force {
            if let Some(record) = &existing_record {
                if record.file_hash() == digest {
                    return Ok(ProcessedFile {
                        record: record.clone(),
                        chunks: Vec::new(),
                        references: Vec::new(),
                        stats: FileStats {
                            path: path.to_string(),
                            skipped: true,
                            ..Default::default()
                        },
                    });
                }
            }
        }

        let parsed = self
            .parser
            .parse_file(&text, path, candidate.language)
            .await?;
        ctx.checkpoint()?;

        // Diff against what the store holds for this path.
        let stored: HashMap<String, String> =
            self.vectors.ids_for_path(path).await?.into_iter().collect();
        let new_ids: HashSet<&str> = parsed.chunks.iter().map(|c| c.id()).collect();

        let to_delete: Vec<String> = stored
            .keys()
            .filter(|id| !new_ids.contains(id.as_str()))
            .cloned()
            .collect();
        let mut to_write: Vec<CodeChunk> = Vec::new();
        let mut added = 0u64;
        let mut updated = 0u64;
        for chunk in &parsed.chunks {
            match stored.get(chunk.id()) {
                None => {
                    added += 1;
                    to_write.push(chunk.clone());
                }
                Some(stored_hash) if stored_hash != chunk.content_hash() => {
                    updated += 1;
                    to_write.push(chunk.clone());
                }
                Some(_) => {}
            }
        }

        // Preserve creation timestamps for rewritten chunks.
        let rewritten_ids: Vec<String> = to_write
            .iter()
            .filter(|c| stored.contains_key(c.id()))
            .map(|c| c.id().to_string())
            .collect();
        if !rewritten_ids.is_empty() {
            let existing: HashMap<String, i64> = self
                .vectors
                .get(&rewritten_ids)
                .await?
                .into_iter()
                .map(|c| (c.id().to_string(), c.created_at()))
                .collect();
            for chunk in &mut to_write {
                if let Some(created_at) = existing.get(chunk.id()) {
                    *chunk = chunk.clone().with_created_at(*created_at);
                }
            }
        }

        // Embed unique content hashes; the cache deduplicates.
        if !to_write.is_empty() {
            let items: Vec<(String, String)> = to_write
                .iter()
                .map(|c| (c.content_hash().to_string(), c.content().to_string()))
                .collect();
            let vectors = self.embedder.embed_hashed(&items, ctx).await?;

            let mut unique: HashMap<&str, Embedding> = HashMap::new();
            for (chunk, vector) in to_write.iter().zip(vectors.iter()) {
                unique.entry(chunk.content_hash()).or_insert_with(|| {
                    Embedding::new(
                        chunk.content_hash().to_string(),
                        (**vector).clone(),
                        self.embedder.config().model_name().to_string(),
                    )
                });
            }
            let embeddings: Vec<Embedding> = unique.into_values().collect();

            self.vectors.add(&to_write, &embeddings, ctx).await?;
        }

        if !to_delete.is_empty() {
            self.vectors.delete(&to_delete, ctx).await?;
            self.relationships.delete_by_chunks(&to_delete).await?;
        }
        if !rewritten_ids.is_empty() {
            self.relationships.delete_edges_from(&rewritten_ids).await?;
        }

        let chunk_ids: Vec<String> = parsed.chunks.iter().map(|c| c.id().to_string()).collect();
        let record = FileRecord::new(
            path.to_string(),
            candidate.size,
            candidate.mtime,
            digest,
            chunk_ids,
            candidate.language,
        );

        debug!(
            "Indexed {}: +{} ~{} -{} chunks",
            path,
            added,
            updated,
            to_delete.len()
        );

        Ok(ProcessedFile {
            record,
            chunks: parsed.chunks,
            references: parsed.references,
            stats: FileStats {
                path: path.to_string(),
                chunks_added: added,
                chunks_updated: updated,
                chunks_deleted: to_delete.len() as u64,
                skipped: false,
            },
        })
    }

    async fn drop_file_state(&self, path: &str, ctx: &OpContext) -> Result<u64, IndexError> {
        let mut ids: HashSet<String> = self
            .vectors
            .ids_for_path(path)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        if let Some(record) = self.metadata.get(path).await? {
            ids.extend(record.chunk_ids().iter().cloned());
        }

        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = ids.into_iter().collect();
        let deleted = self.vectors.delete(&ids, ctx).await?;
        self.relationships.delete_by_chunks(&ids).await?;
        debug!("Removed {} chunks for deleted file {}", deleted, path);
        Ok(deleted)
    }

    async fn flush_metadata(
        &self,
        processed: &[ProcessedFile],
        removed_paths: &[String],
    ) -> Result<(), IndexError> {
        let records: Vec<FileRecord> = processed
            .iter()
            .filter(|f| !f.stats.skipped)
            .map(|f| f.record.clone())
            .collect();
        if records.is_empty() && removed_paths.is_empty() {
            return Ok(());
        }
        self.metadata.bulk_replace(records, removed_paths).await
    }

    async fn recover_store(&self, ctx: &OpContext) -> Result<(), IndexError> {
        match self.vectors.recover().await? {
            RecoveryOutcome::Intact | RecoveryOutcome::Recovered => Ok(()),
            RecoveryOutcome::Rebuilt => {
                self.reindex_known_files(ctx).await?;
                Ok(())
            }
        }
    }

    // ── Relationship derivation ──────────────────────────────────────────

    async fn resolve_relationships(
        &self,
        files: &[&ProcessedFile],
        ctx: &OpContext,
    ) -> Result<(), IndexError> {
        ctx.checkpoint()?;

        let symbols = self.vectors.symbols().await?;
        let mut by_name: HashMap<&str, Vec<&SymbolEntry>> = HashMap::new();
        for symbol in &symbols {
            by_name.entry(symbol.name.as_str()).or_default().push(symbol);
        }
        for entries in by_name.values_mut() {
            entries.sort_by(|a, b| {
                (a.file_path.as_str(), a.chunk_id.as_str())
                    .cmp(&(b.file_path.as_str(), b.chunk_id.as_str()))
            });
        }

        // Lazily resolved first chunk per target file.
        let first_chunk_cache: Mutex<HashMap<String, Option<String>>> =
            Mutex::new(HashMap::new());

        let known_paths: Vec<String> = {
            let mut paths: HashSet<String> = self.metadata.all_paths().await?.into_iter().collect();
            paths.extend(files.iter().map(|f| f.record.path().to_string()));
            paths.into_iter().collect()
        };

        let mut edges: Vec<Relationship> = Vec::new();

        for file in files {
            // Containment from parent links.
            for chunk in &file.chunks {
                if let Some(parent_id) = chunk.parent_id() {
                    let edge = Relationship::new(
                        parent_id.to_string(),
                        chunk.id().to_string(),
                        RelationKind::Contains,
                        1.0,
                    );
                    edges.push(edge.inverse());
                    edges.push(edge);
                }
            }

            for reference in &file.references {
                let source_id = match enclosing_chunk(&file.chunks, reference.line()) {
                    Some(id) => id,
                    None => continue,
                };

                match reference.kind() {
                    SymbolRefKind::Call => {
                        let target = by_name.get(reference.name()).and_then(|candidates| {
                            candidates
                                .iter()
                                .filter(|s| s.chunk_id != source_id)
                                .filter(|s| {
                                    matches!(
                                        s.kind,
                                        ChunkKind::Function | ChunkKind::Method | ChunkKind::Class
                                    )
                                })
                                .min_by_key(|s| {
                                    // Prefer a same-file definition.
                                    (s.file_path != file.record.path(), s.file_path.clone())
                                })
                        });
                        if let Some(target) = target {
                            let edge = Relationship::new(
                                source_id.clone(),
                                target.chunk_id.clone(),
                                RelationKind::Calls,
                                1.0,
                            );
                            edges.push(edge.inverse());
                            edges.push(edge);
                        }
                    }
                    SymbolRefKind::Import => {
                        let target_path =
                            match resolve_import(reference.name(), file.record.path(), &known_paths)
                            {
                                Some(p) => p,
                                None => continue,
                            };
                        let target_id = {
                            let mut cache = first_chunk_cache.lock().await;
                            match cache.get(&target_path) {
                                Some(cached) => cached.clone(),
                                None => {
                                    let first = self
                                        .vectors
                                        .chunks_for_path(&target_path)
                                        .await?
                                        .first()
                                        .map(|c| c.id().to_string());
                                    cache.insert(target_path.clone(), first.clone());
                                    first
                                }
                            }
                        };
                        if let Some(target_id) = target_id {
                            if target_id == source_id {
                                continue;
                            }
                            let edge = Relationship::new(
                                source_id.clone(),
                                target_id,
                                RelationKind::Imports,
                                1.0,
                            );
                            edges.push(edge.inverse());
                            edges.push(edge);
                        }
                    }
                }
            }
        }

        if !edges.is_empty() {
            debug!("Upserting {} relationship edges", edges.len());
            self.relationships.upsert(&edges).await?;
        }
        Ok(())
    }
}

/// Initial-traversal ordering: entry points first, then top-level docs,
/// then everything else. An optimisation, not a correctness requirement.
fn prioritize(candidates: &mut [CandidateFile]) {
    fn rank(candidate: &CandidateFile) -> u8 {
        let path = candidate.relative_path.as_str();
        let stem = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();

        if matches!(stem.as_str(), "main" | "index" | "app" | "lib" | "mod") {
            return 0;
        }
        if !path.contains('/') && (stem.starts_with("readme") || candidate.language.is_text_kind())
        {
            return 1;
        }
        2
    }

    candidates.sort_by(|a, b| {
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.relative_path.cmp(&b.relative_path))
    });
}

/// Tightest non-root chunk covering `line`, else the file's first chunk.
fn enclosing_chunk(chunks: &[CodeChunk], line: u32) -> Option<String> {
    chunks
        .iter()
        .filter(|c| c.kind() != ChunkKind::File)
        .filter(|c| c.start_line() <= line && c.end_line() >= line)
        .min_by_key(|c| c.end_line() - c.start_line())
        .or_else(|| {
            chunks
                .iter()
                .find(|c| c.kind() == ChunkKind::File)
                .or_else(|| chunks.first())
        })
        .map(|c| c.id().to_string())
}

/// Best-effort import resolution: the import's final segment must match an
/// indexed file's stem. Unresolved imports are dropped.
fn resolve_import(import_name: &str, importer: &str, known_paths: &[String]) -> Option<String> {
    let segment = import_name
        .rsplit(['/', '.', ':'])
        .find(|s| !s.is_empty())?
        .to_lowercase();

    let mut candidates: Vec<&String> = known_paths
        .iter()
        .filter(|p| p.as_str() != importer)
        .filter(|p| {
            Path::new(p.as_str())
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|stem| stem.to_lowercase() == segment)
                .unwrap_or(false)
        })
        .collect();

    candidates.sort();
    candidates.first().map(|p| p.to_string())
}

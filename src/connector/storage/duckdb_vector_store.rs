use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use duckdb::{params, AccessMode, Config, Connection, Row};
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::application::{RecoveryOutcome, StoreStats, SymbolEntry, VectorStore};
use crate::domain::{
    ChunkKind, CodeChunk, Embedding, EmbeddingConfig, IndexConfig, IndexError, Language, OpContext,
    ParseQuality, QualityMetrics, SearchFilter, Smell,
};

/// Recovery protocol bounds: 3 attempts, 200 ms base, exponential backoff.
const RECOVERY_ATTEMPTS: u32 = 3;
const RECOVERY_BASE_DELAY_MS: u64 = 200;

/// Persistent vector store on DuckDB.
///
/// One write connection serialises mutations (exclusive lease); a small set
/// of cloned read connections serves queries round-robin (shared leases).
/// Similarity is computed in Rust over the filtered candidate rows, so no
/// database extension is required.
pub struct DuckdbVectorStore {
    pool: RwLock<Pool>,
    db_path: Option<PathBuf>,
    embedding: EmbeddingConfig,
    lease_timeout: Duration,
    pool_size: usize,
    read_concurrency: usize,
    rebuilt_on_open: AtomicBool,
}

struct Pool {
    write: Arc<Mutex<Connection>>,
    readers: Vec<Arc<Mutex<Connection>>>,
    next_reader: AtomicUsize,
    read_permits: Arc<Semaphore>,
}

/// One row dumped through the read-only recovery handle: the chunk plus its
/// `(vector_json, model)` payload when the vector row survived.
struct SalvagedRow {
    chunk: CodeChunk,
    vector: Option<(String, String)>,
}

impl DuckdbVectorStore {
    /// Open (or create) the store beneath `dir`. A corrupt database is taken
    /// through the recovery protocol before the constructor returns.
    ///
    /// Blocking: call from a blocking task when already on the runtime.
    pub fn open(dir: &Path, config: &IndexConfig) -> Result<Self, IndexError> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join("index.duckdb");
        let pool_size = config.pool_size.max(2);
        let read_concurrency = config.read_concurrency.max(1);

        let mut rebuilt = false;
        let pool = match Self::build_pool(Some(&db_path), pool_size, read_concurrency) {
            Ok(pool) => pool,
            Err(e) => {
                warn!("Vector store failed to open ({}), entering recovery", e);
                let (pool, outcome) =
                    Self::recover_pool_blocking(&db_path, pool_size, read_concurrency)?;
                rebuilt = outcome == RecoveryOutcome::Rebuilt;
                pool
            }
        };

        Ok(Self {
            pool: RwLock::new(pool),
            db_path: Some(db_path),
            embedding: config.embedding_config(),
            lease_timeout: Duration::from_secs(30),
            pool_size,
            read_concurrency,
            rebuilt_on_open: AtomicBool::new(rebuilt),
        })
    }

    /// Ephemeral store for tests.
    pub fn in_memory(config: &IndexConfig) -> Result<Self, IndexError> {
        let pool_size = config.pool_size.max(2);
        let read_concurrency = config.read_concurrency.max(1);
        let pool = Self::build_pool(None, pool_size, read_concurrency)?;
        Ok(Self {
            pool: RwLock::new(pool),
            db_path: None,
            embedding: config.embedding_config(),
            lease_timeout: Duration::from_secs(30),
            pool_size,
            read_concurrency,
            rebuilt_on_open: AtomicBool::new(false),
        })
    }

    /// True once when the on-open recovery had to rebuild an empty store;
    /// the caller must then re-add every file known to the metadata manager.
    pub fn take_rebuilt_flag(&self) -> bool {
        self.rebuilt_on_open.swap(false, Ordering::SeqCst)
    }

    fn open_connection(db_path: Option<&Path>) -> Result<Connection, IndexError> {
        let conn = match db_path {
            Some(path) => Connection::open(path)
                .map_err(|e| IndexError::store(format!("failed to open vector store: {}", e)))?,
            None => Connection::open_in_memory()
                .map_err(|e| IndexError::store(format!("failed to open in-memory store: {}", e)))?,
        };
        Self::init_schema(&conn)?;
        Self::probe(&conn)?;
        Ok(conn)
    }

    /// One handle takes writes; the rest serve reads, gated by the
    /// read-concurrency semaphore (shared leases).
    fn pool_from(
        conn: Connection,
        pool_size: usize,
        read_concurrency: usize,
    ) -> Result<Pool, IndexError> {
        let reader_count = pool_size.saturating_sub(1).max(1);
        let mut readers = Vec::with_capacity(reader_count);
        for _ in 0..reader_count {
            let reader = conn
                .try_clone()
                .map_err(|e| IndexError::store(format!("failed to clone connection: {}", e)))?;
            readers.push(Arc::new(Mutex::new(reader)));
        }

        Ok(Pool {
            write: Arc::new(Mutex::new(conn)),
            readers,
            next_reader: AtomicUsize::new(0),
            read_permits: Arc::new(Semaphore::new(read_concurrency)),
        })
    }

    fn build_pool(
        db_path: Option<&Path>,
        pool_size: usize,
        read_concurrency: usize,
    ) -> Result<Pool, IndexError> {
        Self::pool_from(Self::open_connection(db_path)?, pool_size, read_concurrency)
    }

    fn init_schema(conn: &Connection) -> Result<(), IndexError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                start_line BIGINT NOT NULL,
                end_line BIGINT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT,
                language TEXT NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                docstring TEXT,
                leading_comment TEXT,
                parent_id TEXT,
                parse_quality TEXT NOT NULL,
                cyclomatic BIGINT NOT NULL,
                cognitive BIGINT NOT NULL,
                nesting_depth BIGINT NOT NULL,
                parameter_count BIGINT NOT NULL,
                lines_of_code BIGINT NOT NULL,
                method_count BIGINT NOT NULL,
                smells TEXT NOT NULL,
                smell_count BIGINT NOT NULL,
                grade TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vectors (
                chunk_id TEXT PRIMARY KEY,
                vector TEXT NOT NULL,
                model TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS chunks_file_path_idx ON chunks(file_path);
            "#,
        )
        .map_err(|e| IndexError::store(format!("failed to initialize schema: {}", e)))
    }

    /// Integrity probe: both tables must be readable.
    fn probe(conn: &Connection) -> Result<(), IndexError> {
        conn.query_row("SELECT count(*) FROM chunks", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| IndexError::store(format!("integrity probe failed: {}", e)))?;
        conn.query_row("SELECT count(*) FROM vectors", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| IndexError::store(format!("integrity probe failed: {}", e)))?;
        Ok(())
    }

    async fn write_conn(&self, ctx: &OpContext) -> Result<Arc<Mutex<Connection>>, IndexError> {
        ctx.checkpoint()?;
        let pool = self.pool.read().await;
        Ok(Arc::clone(&pool.write))
    }

    async fn read_conn(
        &self,
    ) -> Result<(Arc<Mutex<Connection>>, OwnedSemaphorePermit), IndexError> {
        let pool = self.pool.read().await;
        let permit = tokio::time::timeout(
            self.lease_timeout,
            Arc::clone(&pool.read_permits).acquire_owned(),
        )
        .await
        .map_err(|_| IndexError::store("timed out acquiring read lease"))?
        .map_err(|_| IndexError::store("read lease pool closed"))?;

        let index = pool.next_reader.fetch_add(1, Ordering::Relaxed) % pool.readers.len().max(1);
        let conn = pool
            .readers
            .get(index)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&pool.write));
        Ok((conn, permit))
    }

    async fn lock_with_timeout<'a>(
        &self,
        conn: &'a Mutex<Connection>,
    ) -> Result<tokio::sync::MutexGuard<'a, Connection>, IndexError> {
        tokio::time::timeout(self.lease_timeout, conn.lock())
            .await
            .map_err(|_| IndexError::store("timed out acquiring store lease"))
    }

    /// Synchronous recovery used by the constructor.
    fn recover_pool_blocking(
        db_path: &Path,
        pool_size: usize,
        read_concurrency: usize,
    ) -> Result<(Pool, RecoveryOutcome), IndexError> {
        for attempt in 1..=RECOVERY_ATTEMPTS {
            std::thread::sleep(Duration::from_millis(
                RECOVERY_BASE_DELAY_MS * 2u64.pow(attempt - 1),
            ));
            if let Ok(pool) = Self::build_pool(Some(db_path), pool_size, read_concurrency) {
                info!("Vector store recovered on attempt {}", attempt);
                return Ok((pool, RecoveryOutcome::Intact));
            }
        }

        Self::rebuild_pool(Some(db_path), pool_size, read_concurrency)
    }

    /// Tier 1 of the recovery protocol: open the damaged database
    /// read-only and dump every row still reachable.
    fn salvage_rows(db_path: &Path) -> Result<Vec<SalvagedRow>, IndexError> {
        let config = Config::default()
            .access_mode(AccessMode::ReadOnly)
            .map_err(|e| IndexError::store(format!("failed to configure read-only open: {}", e)))?;
        let conn = Connection::open_with_flags(db_path, config)
            .map_err(|e| IndexError::store(format!("read-only open failed: {}", e)))?;
        Self::probe(&conn)?;

        let sql = format!(
            "SELECT {}, v.vector, v.model FROM chunks c LEFT JOIN vectors v ON v.chunk_id = c.id",
            Self::CHUNK_COLUMNS
                .split(", ")
                .map(|c| format!("c.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| IndexError::store(format!("failed to prepare salvage dump: {}", e)))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| IndexError::store(format!("failed to run salvage dump: {}", e)))?;

        let mut salvaged = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| IndexError::store(format!("failed to read salvage row: {}", e)))?
        {
            let chunk = Self::row_to_chunk(row)
                .map_err(|e| IndexError::store(format!("failed to map salvage row: {}", e)))?;
            let vector_json: Option<String> = row
                .get(24)
                .map_err(|e| IndexError::store(format!("failed to read salvage vector: {}", e)))?;
            let model: Option<String> = row
                .get(25)
                .map_err(|e| IndexError::store(format!("failed to read salvage model: {}", e)))?;
            salvaged.push(SalvagedRow {
                chunk,
                vector: vector_json.zip(model),
            });
        }
        Ok(salvaged)
    }

    /// Tiers 1 and 2: dump what a read-only handle can still reach, move
    /// the damaged file aside, and rebuild in place from the dump. A file
    /// the read-only handle cannot salvage comes back empty, and the
    /// indexer must re-add every known file.
    fn rebuild_pool(
        db_path: Option<&Path>,
        pool_size: usize,
        read_concurrency: usize,
    ) -> Result<(Pool, RecoveryOutcome), IndexError> {
        let salvaged = match db_path {
            Some(path) if path.exists() => match Self::salvage_rows(path) {
                Ok(rows) => {
                    info!("Salvaged {} chunks through a read-only handle", rows.len());
                    Some(rows)
                }
                Err(e) => {
                    warn!("Read-only salvage failed: {}", e);
                    None
                }
            },
            _ => None,
        };

        if let Some(path) = db_path {
            let corrupt = path.with_extension("duckdb.corrupt");
            if path.exists() {
                let _ = std::fs::rename(path, &corrupt);
                warn!("Corrupt vector store moved to {}", corrupt.display());
            }
            let _ = std::fs::remove_file(path.with_extension("duckdb.wal"));
        }

        let conn = Self::open_connection(db_path)
            .map_err(|e| IndexError::store_unavailable(format!("rebuild failed: {}", e)))?;

        let outcome = match salvaged {
            Some(rows) => match Self::restore_rows(&conn, &rows) {
                Ok(()) => {
                    info!("Vector store rebuilt from {} salvaged chunks", rows.len());
                    RecoveryOutcome::Recovered
                }
                Err(e) => {
                    warn!("Failed to restore salvaged rows ({}), rebuilding empty", e);
                    let _ = conn.execute_batch("DELETE FROM chunks; DELETE FROM vectors;");
                    RecoveryOutcome::Rebuilt
                }
            },
            None => {
                info!("Vector store rebuilt empty; a reindex of known files is required");
                RecoveryOutcome::Rebuilt
            }
        };

        let pool = Self::pool_from(conn, pool_size, read_concurrency)
            .map_err(|e| IndexError::store_unavailable(format!("rebuild failed: {}", e)))?;
        Ok((pool, outcome))
    }

    fn restore_rows(conn: &Connection, rows: &[SalvagedRow]) -> Result<(), IndexError> {
        conn.execute_batch("BEGIN TRANSACTION;")
            .map_err(|e| IndexError::store(format!("failed to begin restore: {}", e)))?;
        let result = (|| -> Result<(), IndexError> {
            for row in rows {
                Self::insert_chunk(conn, &row.chunk)?;
                if let Some((vector_json, model)) = &row.vector {
                    Self::insert_vector(conn, row.chunk.id(), vector_json, model)?;
                }
            }
            Ok(())
        })();
        match result {
            Ok(()) => conn
                .execute_batch("COMMIT;")
                .map_err(|e| IndexError::store(format!("failed to commit restore: {}", e))),
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK;");
                Err(e)
            }
        }
    }

    fn row_to_chunk(row: &Row) -> Result<CodeChunk, duckdb::Error> {
        let smells_json: String = row.get(19)?;
        let smells: Vec<Smell> = serde_json::from_str(&smells_json).unwrap_or_default();

        let quality = QualityMetrics::new(
            row.get::<_, i64>(13)? as u32,
            row.get::<_, i64>(14)? as u32,
            row.get::<_, i64>(15)? as u32,
            row.get::<_, i64>(16)? as u32,
            row.get::<_, i64>(17)? as u32,
            row.get::<_, i64>(18)? as u32,
            smells,
            crate::domain::Grade::parse(&row.get::<_, String>(21)?),
        );

        Ok(CodeChunk::reconstitute(
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)? as u32,
            row.get::<_, i64>(3)? as u32,
            ChunkKind::parse(&row.get::<_, String>(4)?),
            row.get::<_, Option<String>>(5)?,
            Language::parse(&row.get::<_, String>(6)?),
            row.get::<_, String>(7)?,
            row.get::<_, String>(8)?,
            row.get::<_, Option<String>>(9)?,
            row.get::<_, Option<String>>(10)?,
            row.get::<_, Option<String>>(11)?,
            quality,
            ParseQuality::parse(&row.get::<_, String>(12)?),
            row.get::<_, i64>(22)?,
            row.get::<_, i64>(23)?,
        ))
    }

    const CHUNK_COLUMNS: &'static str = "id, file_path, start_line, end_line, kind, name, \
         language, content, content_hash, docstring, leading_comment, parent_id, parse_quality, \
         cyclomatic, cognitive, nesting_depth, parameter_count, lines_of_code, method_count, \
         smells, smell_count, grade, created_at, updated_at";

    /// Idempotent by id: any previous row for the chunk is replaced.
    fn insert_chunk(conn: &Connection, chunk: &CodeChunk) -> Result<(), IndexError> {
        let smells = serde_json::to_string(chunk.quality().smells())
            .map_err(|e| IndexError::store(format!("failed to encode smells: {}", e)))?;

        conn.execute("DELETE FROM chunks WHERE id = ?", params![chunk.id()])
            .map_err(|e| IndexError::store(format!("failed to delete chunk: {}", e)))?;
        conn.execute(
            "INSERT INTO chunks VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                chunk.id(),
                chunk.file_path(),
                chunk.start_line() as i64,
                chunk.end_line() as i64,
                chunk.kind().as_str(),
                chunk.name(),
                chunk.language().as_str(),
                chunk.content(),
                chunk.content_hash(),
                chunk.docstring(),
                chunk.leading_comment(),
                chunk.parent_id(),
                chunk.parse_quality().as_str(),
                chunk.quality().cyclomatic() as i64,
                chunk.quality().cognitive() as i64,
                chunk.quality().nesting_depth() as i64,
                chunk.quality().parameter_count() as i64,
                chunk.quality().lines_of_code() as i64,
                chunk.quality().method_count() as i64,
                smells,
                chunk.quality().smell_count() as i64,
                chunk.quality().grade().as_str(),
                chunk.created_at(),
                chunk.updated_at(),
            ],
        )
        .map_err(|e| IndexError::store(format!("failed to insert chunk: {}", e)))?;
        Ok(())
    }

    fn insert_vector(
        conn: &Connection,
        chunk_id: &str,
        vector_json: &str,
        model: &str,
    ) -> Result<(), IndexError> {
        conn.execute("DELETE FROM vectors WHERE chunk_id = ?", params![chunk_id])
            .map_err(|e| IndexError::store(format!("failed to delete vector: {}", e)))?;
        conn.execute(
            "INSERT INTO vectors VALUES (?, ?, ?)",
            params![chunk_id, vector_json, model],
        )
        .map_err(|e| IndexError::store(format!("failed to insert vector: {}", e)))?;
        Ok(())
    }

    fn quoted_list(values: &[String]) -> String {
        values
            .iter()
            .map(|v| format!("'{}'", v.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// WHERE clauses the database can evaluate; glob/regex predicates are
    /// applied in Rust afterwards.
    fn filter_clauses(filter: &SearchFilter) -> Vec<String> {
        let mut clauses = Vec::new();

        if let Some(languages) = filter.languages() {
            clauses.push(format!(
                "language IN ({})",
                Self::quoted_list(languages)
            ));
        }
        if let Some(kinds) = filter.kinds() {
            clauses.push(format!("kind IN ({})", Self::quoted_list(kinds)));
        }
        if let Some(prefix) = filter.path_prefix() {
            let escaped = prefix.replace('\'', "''").replace('%', "\\%").replace('_', "\\_");
            clauses.push(format!("file_path LIKE '{}%' ESCAPE '\\'", escaped));
        }
        if let Some(grade) = filter.max_grade() {
            // Single-character grades order lexicographically (A < B < … < F).
            clauses.push(format!("grade <= '{}'", grade.as_str()));
        }
        if let Some(max_smells) = filter.max_smell_count() {
            clauses.push(format!("smell_count <= {}", max_smells));
        }
        if let Some((lo, hi)) = filter.complexity_range() {
            clauses.push(format!("cyclomatic BETWEEN {} AND {}", lo, hi));
        }

        clauses
    }

    fn compile_path_predicates(
        filter: &SearchFilter,
    ) -> Result<(Option<globset::GlobMatcher>, Option<regex::Regex>), IndexError> {
        let glob = filter
            .path_glob()
            .map(|g| {
                globset::Glob::new(g)
                    .map(|g| g.compile_matcher())
                    .map_err(|e| IndexError::invalid_input(format!("bad path glob: {}", e)))
            })
            .transpose()?;
        let regex = filter
            .path_regex()
            .map(|r| {
                regex::Regex::new(r)
                    .map_err(|e| IndexError::invalid_input(format!("bad path regex: {}", e)))
            })
            .transpose()?;
        Ok((glob, regex))
    }
}

#[async_trait]
impl VectorStore for DuckdbVectorStore {
    async fn add(
        &self,
        chunks: &[CodeChunk],
        embeddings: &[Embedding],
        ctx: &OpContext,
    ) -> Result<(), IndexError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let conn = self.write_conn(ctx).await?;
        let guard = self.lock_with_timeout(&conn).await?;

        guard
            .execute_batch("BEGIN TRANSACTION;")
            .map_err(|e| IndexError::store(format!("failed to begin transaction: {}", e)))?;

        let result = (|| -> Result<(), IndexError> {
            for chunk in chunks {
                Self::insert_chunk(&guard, chunk)?;
            }

            for embedding in embeddings {
                let vector_json = serde_json::to_string(embedding.vector())
                    .map_err(|e| IndexError::store(format!("failed to encode vector: {}", e)))?;
                // The embedding is keyed by content hash; every chunk sharing
                // that hash points at the same vector payload.
                for chunk in chunks
                    .iter()
                    .filter(|c| c.content_hash() == embedding.content_hash())
                {
                    Self::insert_vector(&guard, chunk.id(), &vector_json, embedding.model())?;
                }
            }

            Ok(())
        })();

        match result {
            Ok(()) => {
                guard
                    .execute_batch("COMMIT;")
                    .map_err(|e| IndexError::store(format!("failed to commit: {}", e)))?;
                debug!("Stored {} chunks", chunks.len());
                Ok(())
            }
            Err(e) => {
                let _ = guard.execute_batch("ROLLBACK;");
                Err(e)
            }
        }
    }

    async fn delete(&self, ids: &[String], ctx: &OpContext) -> Result<u64, IndexError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.write_conn(ctx).await?;
        let guard = self.lock_with_timeout(&conn).await?;
        let id_list = Self::quoted_list(ids);

        let deleted = guard
            .execute(
                &format!("DELETE FROM chunks WHERE id IN ({})", id_list),
                [],
            )
            .map_err(|e| IndexError::store(format!("failed to delete chunks: {}", e)))?;
        guard
            .execute(
                &format!("DELETE FROM vectors WHERE chunk_id IN ({})", id_list),
                [],
            )
            .map_err(|e| IndexError::store(format!("failed to delete vectors: {}", e)))?;

        Ok(deleted as u64)
    }

    async fn query(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: &SearchFilter,
        ctx: &OpContext,
    ) -> Result<Vec<(CodeChunk, f32)>, IndexError> {
        ctx.checkpoint()?;
        let (glob, regex) = Self::compile_path_predicates(filter)?;

        let mut sql = format!(
            "SELECT {}, v.vector FROM chunks c JOIN vectors v ON v.chunk_id = c.id",
            Self::CHUNK_COLUMNS
                .split(", ")
                .map(|c| format!("c.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let clauses = Self::filter_clauses(filter);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let (conn, _permit) = self.read_conn().await?;
        let guard = self.lock_with_timeout(&conn).await?;

        let mut stmt = guard
            .prepare(&sql)
            .map_err(|e| IndexError::store(format!("failed to prepare query: {}", e)))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| IndexError::store(format!("failed to run query: {}", e)))?;

        let mut scored: Vec<(CodeChunk, f32)> = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| IndexError::store(format!("failed to read row: {}", e)))?
        {
            let chunk = Self::row_to_chunk(row)
                .map_err(|e| IndexError::store(format!("failed to map row: {}", e)))?;

            if let Some(glob) = &glob {
                if !glob.is_match(chunk.file_path()) {
                    continue;
                }
            }
            if let Some(regex) = &regex {
                if !regex.is_match(chunk.file_path()) {
                    continue;
                }
            }

            let vector_json: String = row
                .get(24)
                .map_err(|e| IndexError::store(format!("failed to read vector: {}", e)))?;
            let vector: Vec<f32> = serde_json::from_str(&vector_json)
                .map_err(|e| IndexError::integrity(format!("undecodable vector: {}", e)))?;

            let similarity = self.embedding.similarity(query_vector, &vector);
            scored.push((chunk, similarity));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id().cmp(b.0.id()))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn get(&self, ids: &[String]) -> Result<Vec<CodeChunk>, IndexError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let (conn, _permit) = self.read_conn().await?;
        let guard = self.lock_with_timeout(&conn).await?;
        let sql = format!(
            "SELECT {} FROM chunks WHERE id IN ({})",
            Self::CHUNK_COLUMNS,
            Self::quoted_list(ids)
        );

        let mut stmt = guard
            .prepare(&sql)
            .map_err(|e| IndexError::store(format!("failed to prepare get: {}", e)))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| IndexError::store(format!("failed to run get: {}", e)))?;

        let mut chunks = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| IndexError::store(format!("failed to read row: {}", e)))?
        {
            chunks.push(
                Self::row_to_chunk(row)
                    .map_err(|e| IndexError::store(format!("failed to map row: {}", e)))?,
            );
        }
        Ok(chunks)
    }

    async fn ids_for_path(&self, path: &str) -> Result<Vec<(String, String)>, IndexError> {
        let (conn, _permit) = self.read_conn().await?;
        let guard = self.lock_with_timeout(&conn).await?;

        let mut stmt = guard
            .prepare("SELECT id, content_hash FROM chunks WHERE file_path = ?")
            .map_err(|e| IndexError::store(format!("failed to prepare ids query: {}", e)))?;
        let mut rows = stmt
            .query(params![path])
            .map_err(|e| IndexError::store(format!("failed to run ids query: {}", e)))?;

        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| IndexError::store(format!("failed to read row: {}", e)))?
        {
            ids.push((
                row.get::<_, String>(0)
                    .map_err(|e| IndexError::store(format!("failed to read id: {}", e)))?,
                row.get::<_, String>(1)
                    .map_err(|e| IndexError::store(format!("failed to read hash: {}", e)))?,
            ));
        }
        Ok(ids)
    }

    async fn chunks_for_path(&self, path: &str) -> Result<Vec<CodeChunk>, IndexError> {
        let (conn, _permit) = self.read_conn().await?;
        let guard = self.lock_with_timeout(&conn).await?;

        let sql = format!(
            "SELECT {} FROM chunks WHERE file_path = ? ORDER BY start_line",
            Self::CHUNK_COLUMNS
        );
        let mut stmt = guard
            .prepare(&sql)
            .map_err(|e| IndexError::store(format!("failed to prepare path query: {}", e)))?;
        let mut rows = stmt
            .query(params![path])
            .map_err(|e| IndexError::store(format!("failed to run path query: {}", e)))?;

        let mut chunks = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| IndexError::store(format!("failed to read row: {}", e)))?
        {
            chunks.push(
                Self::row_to_chunk(row)
                    .map_err(|e| IndexError::store(format!("failed to map row: {}", e)))?,
            );
        }
        Ok(chunks)
    }

    async fn vector_of(&self, chunk_id: &str) -> Result<Option<Vec<f32>>, IndexError> {
        let (conn, _permit) = self.read_conn().await?;
        let guard = self.lock_with_timeout(&conn).await?;

        let mut stmt = guard
            .prepare("SELECT vector FROM vectors WHERE chunk_id = ?")
            .map_err(|e| IndexError::store(format!("failed to prepare vector query: {}", e)))?;
        let mut rows = stmt
            .query(params![chunk_id])
            .map_err(|e| IndexError::store(format!("failed to run vector query: {}", e)))?;

        match rows
            .next()
            .map_err(|e| IndexError::store(format!("failed to read row: {}", e)))?
        {
            Some(row) => {
                let vector_json: String = row
                    .get(0)
                    .map_err(|e| IndexError::store(format!("failed to read vector: {}", e)))?;
                let vector = serde_json::from_str(&vector_json)
                    .map_err(|e| IndexError::integrity(format!("undecodable vector: {}", e)))?;
                Ok(Some(vector))
            }
            None => Ok(None),
        }
    }

    async fn symbols(&self) -> Result<Vec<SymbolEntry>, IndexError> {
        let (conn, _permit) = self.read_conn().await?;
        let guard = self.lock_with_timeout(&conn).await?;

        let mut stmt = guard
            .prepare("SELECT id, name, file_path, kind FROM chunks WHERE name IS NOT NULL AND name != ''")
            .map_err(|e| IndexError::store(format!("failed to prepare symbols query: {}", e)))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| IndexError::store(format!("failed to run symbols query: {}", e)))?;

        let mut symbols = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| IndexError::store(format!("failed to read row: {}", e)))?
        {
            symbols.push(SymbolEntry {
                chunk_id: row
                    .get::<_, String>(0)
                    .map_err(|e| IndexError::store(format!("failed to read id: {}", e)))?,
                name: row
                    .get::<_, String>(1)
                    .map_err(|e| IndexError::store(format!("failed to read name: {}", e)))?,
                file_path: row
                    .get::<_, String>(2)
                    .map_err(|e| IndexError::store(format!("failed to read path: {}", e)))?,
                kind: ChunkKind::parse(
                    &row.get::<_, String>(3)
                        .map_err(|e| IndexError::store(format!("failed to read kind: {}", e)))?,
                ),
            });
        }
        Ok(symbols)
    }

    async fn count(&self) -> Result<u64, IndexError> {
        let (conn, _permit) = self.read_conn().await?;
        let guard = self.lock_with_timeout(&conn).await?;
        let count: i64 = guard
            .query_row("SELECT count(*) FROM chunks", [], |row| row.get(0))
            .map_err(|e| IndexError::store(format!("failed to count chunks: {}", e)))?;
        Ok(count as u64)
    }

    async fn stats(&self) -> Result<StoreStats, IndexError> {
        let (conn, _permit) = self.read_conn().await?;
        let guard = self.lock_with_timeout(&conn).await?;

        let chunk_count: i64 = guard
            .query_row("SELECT count(*) FROM chunks", [], |row| row.get(0))
            .map_err(|e| IndexError::store(format!("failed to count chunks: {}", e)))?;
        let vector_count: i64 = guard
            .query_row("SELECT count(*) FROM vectors", [], |row| row.get(0))
            .map_err(|e| IndexError::store(format!("failed to count vectors: {}", e)))?;
        let file_count: i64 = guard
            .query_row("SELECT count(DISTINCT file_path) FROM chunks", [], |row| {
                row.get(0)
            })
            .map_err(|e| IndexError::store(format!("failed to count files: {}", e)))?;

        Ok(StoreStats {
            chunk_count: chunk_count as u64,
            vector_count: vector_count as u64,
            file_count: file_count as u64,
        })
    }

    async fn health_check(&self) -> Result<(), IndexError> {
        let (conn, _permit) = self.read_conn().await?;
        let guard = self.lock_with_timeout(&conn).await?;
        Self::probe(&guard)
    }

    async fn recover(&self) -> Result<RecoveryOutcome, IndexError> {
        let mut pool = self.pool.write().await;
        // The database file cannot be reopened (read-only or otherwise)
        // while the damaged handles still hold its lock, so park the pool
        // on an in-memory placeholder first.
        *pool = Self::build_pool(None, 2, 1)?;

        for attempt in 1..=RECOVERY_ATTEMPTS {
            tokio::time::sleep(Duration::from_millis(
                RECOVERY_BASE_DELAY_MS * 2u64.pow(attempt - 1),
            ))
            .await;

            match Self::build_pool(self.db_path.as_deref(), self.pool_size, self.read_concurrency) {
                Ok(fresh) => {
                    info!("Vector store recovered on attempt {}", attempt);
                    *pool = fresh;
                    return Ok(RecoveryOutcome::Intact);
                }
                Err(e) => {
                    warn!("Recovery attempt {} failed: {}", attempt, e);
                }
            }
        }

        let db_path = self.db_path.clone();
        let pool_size = self.pool_size;
        let read_concurrency = self.read_concurrency;
        let (rebuilt, outcome) =
            tokio::task::spawn_blocking(move || -> Result<(Pool, RecoveryOutcome), IndexError> {
                Self::rebuild_pool(db_path.as_deref(), pool_size, read_concurrency)
            })
            .await
            .map_err(|e| IndexError::store_unavailable(format!("rebuild task failed: {}", e)))??;

        *pool = rebuilt;
        Ok(outcome)
    }

    async fn clear(&self) -> Result<(), IndexError> {
        let ctx = OpContext::new();
        let conn = self.write_conn(&ctx).await?;
        let guard = self.lock_with_timeout(&conn).await?;
        guard
            .execute_batch("DELETE FROM chunks; DELETE FROM vectors;")
            .map_err(|e| IndexError::store(format!("failed to clear store: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{l2_normalize, ChunkKind, Grade};

    fn chunk(path: &str, start: u32, name: &str, content: &str) -> CodeChunk {
        CodeChunk::new(
            path.to_string(),
            content.to_string(),
            start,
            start + 1,
            ChunkKind::Function,
            Language::Python,
        )
        .with_name(name)
    }

    fn embedding_for(chunk: &CodeChunk, seed: f32) -> Embedding {
        let mut vector = vec![seed, 1.0 - seed, 0.25];
        l2_normalize(&mut vector);
        Embedding::new(
            chunk.content_hash().to_string(),
            vector,
            "local-hash-384".to_string(),
        )
    }

    fn test_config() -> IndexConfig {
        IndexConfig {
            embedding_dimensions: 3,
            ..Default::default()
        }
    }

    async fn store_with_two_chunks() -> (DuckdbVectorStore, CodeChunk, CodeChunk) {
        let store = DuckdbVectorStore::in_memory(&test_config()).unwrap();
        let a = chunk("src/a.py", 1, "alpha", "def alpha():\n    return 1");
        let b = chunk("src/b.py", 1, "beta", "def beta():\n    return 2");

        store
            .add(
                &[a.clone(), b.clone()],
                &[embedding_for(&a, 0.9), embedding_for(&b, 0.1)],
                &OpContext::new(),
            )
            .await
            .unwrap();
        (store, a, b)
    }

    #[tokio::test]
    async fn test_add_and_count() {
        let (store, _, _) = store_with_two_chunks().await;
        assert_eq!(store.count().await.unwrap(), 2);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.chunk_count, 2);
        assert_eq!(stats.vector_count, 2);
        assert_eq!(stats.file_count, 2);
    }

    #[tokio::test]
    async fn test_add_is_idempotent_by_id() {
        let (store, a, _) = store_with_two_chunks().await;

        store
            .add(&[a.clone()], &[embedding_for(&a, 0.9)], &OpContext::new())
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let (store, a, b) = store_with_two_chunks().await;

        let mut probe = vec![0.9f32, 0.1, 0.25];
        l2_normalize(&mut probe);
        let results = store
            .query(&probe, 10, &SearchFilter::new(), &OpContext::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.id(), a.id());
        assert_eq!(results[1].0.id(), b.id());
        assert!(results[0].1 >= results[1].1);
    }

    #[tokio::test]
    async fn test_query_respects_path_prefix_filter() {
        let (store, a, _) = store_with_two_chunks().await;

        let filter = SearchFilter::new().with_path_prefix("src/a");
        let results = store
            .query(&[0.5, 0.5, 0.25], 10, &filter, &OpContext::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id(), a.id());
    }

    #[tokio::test]
    async fn test_query_respects_glob_filter() {
        let (store, _, b) = store_with_two_chunks().await;

        let filter = SearchFilter::new().with_path_glob("src/b.*");
        let results = store
            .query(&[0.5, 0.5, 0.25], 10, &filter, &OpContext::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id(), b.id());
    }

    #[tokio::test]
    async fn test_delete_removes_chunk_and_vector() {
        let (store, a, _) = store_with_two_chunks().await;

        let deleted = store
            .delete(&[a.id().to_string()], &OpContext::new())
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.vector_of(a.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ids_for_path() {
        let (store, a, _) = store_with_two_chunks().await;

        let ids = store.ids_for_path("src/a.py").await.unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].0, a.id());
        assert_eq!(ids[0].1, a.content_hash());
    }

    #[tokio::test]
    async fn test_symbols() {
        let (store, _, _) = store_with_two_chunks().await;

        let symbols = store.symbols().await.unwrap();
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"alpha"));
        assert!(names.contains(&"beta"));
    }

    #[tokio::test]
    async fn test_quality_metrics_roundtrip() {
        let store = DuckdbVectorStore::in_memory(&test_config()).unwrap();
        let quality = QualityMetrics::new(
            7,
            9,
            3,
            2,
            40,
            0,
            vec![Smell::new(
                crate::domain::SmellKind::HighComplexity,
                crate::domain::Severity::Warning,
            )],
            Grade::C,
        );
        let chunk = chunk("src/q.py", 1, "complex", "def complex(): pass").with_quality(quality);

        store
            .add(&[chunk.clone()], &[embedding_for(&chunk, 0.4)], &OpContext::new())
            .await
            .unwrap();

        let fetched = store.get(&[chunk.id().to_string()]).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].quality().cyclomatic(), 7);
        assert_eq!(fetched[0].quality().grade(), Grade::C);
        assert_eq!(fetched[0].quality().smell_count(), 1);
    }

    #[tokio::test]
    async fn test_health_check_passes_on_fresh_store() {
        let store = DuckdbVectorStore::in_memory(&test_config()).unwrap();
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_read_only_salvage_dumps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("vectors");
        {
            let store = DuckdbVectorStore::open(&store_dir, &test_config()).unwrap();
            let a = chunk("src/a.py", 1, "alpha", "def alpha():\n    return 1");
            let b = chunk("src/b.py", 1, "beta", "def beta():\n    return 2");
            store
                .add(
                    &[a.clone(), b.clone()],
                    &[embedding_for(&a, 0.9), embedding_for(&b, 0.1)],
                    &OpContext::new(),
                )
                .await
                .unwrap();
        }

        let rows = DuckdbVectorStore::salvage_rows(&store_dir.join("index.duckdb")).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.vector.is_some()));

        let mut names: Vec<&str> = rows
            .iter()
            .filter_map(|r| r.chunk.name())
            .collect();
        names.sort();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_recover_keeps_rows_when_file_is_readable() {
        // Recovery on a readable on-disk store must never destroy rows.
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("vectors");
        {
            let store = DuckdbVectorStore::open(&store_dir, &test_config()).unwrap();
            let a = chunk("src/a.py", 1, "alpha", "def alpha():\n    return 1");
            store
                .add(&[a.clone()], &[embedding_for(&a, 0.9)], &OpContext::new())
                .await
                .unwrap();
        }

        let store = DuckdbVectorStore::open(&store_dir, &test_config()).unwrap();
        let outcome = store.recover().await.unwrap();
        assert_ne!(outcome, RecoveryOutcome::Rebuilt);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_file_rebuilds_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("vectors");
        std::fs::create_dir_all(&store_dir).unwrap();
        std::fs::write(store_dir.join("index.duckdb"), b"not a database at all").unwrap();

        let store = DuckdbVectorStore::open(&store_dir, &test_config()).unwrap();
        assert!(store.take_rebuilt_flag());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let (store, _, _) = store_with_two_chunks().await;
        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}

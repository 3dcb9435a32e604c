use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use duckdb::{params, Connection, Row};
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::RelationshipStore;
use crate::domain::{IndexError, RelationKind, Relationship};

/// Persistent bag of typed chunk-to-chunk edges on DuckDB.
pub struct DuckdbRelationshipStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckdbRelationshipStore {
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let conn = Connection::open(path).map_err(|e| {
            IndexError::store(format!("failed to open relationship store: {}", e))
        })?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            IndexError::store(format!("failed to open in-memory relationship store: {}", e))
        })?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), IndexError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS relationships (
                source_chunk_id TEXT NOT NULL,
                target_chunk_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                weight DOUBLE NOT NULL,
                PRIMARY KEY (source_chunk_id, target_chunk_id, kind)
            );

            CREATE INDEX IF NOT EXISTS relationships_target_idx
                ON relationships(target_chunk_id);
            "#,
        )
        .map_err(|e| IndexError::store(format!("failed to initialize relationships: {}", e)))
    }

    fn row_to_edge(row: &Row) -> Result<Relationship, duckdb::Error> {
        let kind_text: String = row.get(2)?;
        Ok(Relationship::new(
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            RelationKind::parse(&kind_text).unwrap_or(RelationKind::SemanticallySimilar),
            row.get::<_, f64>(3)? as f32,
        ))
    }

    fn quoted_list(values: &[String]) -> String {
        values
            .iter()
            .map(|v| format!("'{}'", v.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(",")
    }

    async fn edges_where(
        &self,
        clause: &str,
        params: &[&(dyn duckdb::ToSql + Sync)],
    ) -> Result<Vec<Relationship>, IndexError> {
        let guard = self.conn.lock().await;
        let sql = format!(
            "SELECT source_chunk_id, target_chunk_id, kind, weight FROM relationships WHERE {}",
            clause
        );
        let mut stmt = guard
            .prepare(&sql)
            .map_err(|e| IndexError::store(format!("failed to prepare edge query: {}", e)))?;
        let mut rows = stmt
            .query(duckdb::params_from_iter(params.iter().copied()))
            .map_err(|e| IndexError::store(format!("failed to run edge query: {}", e)))?;

        let mut edges = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| IndexError::store(format!("failed to read edge: {}", e)))?
        {
            edges.push(
                Self::row_to_edge(row)
                    .map_err(|e| IndexError::store(format!("failed to map edge: {}", e)))?,
            );
        }
        Ok(edges)
    }
}

#[async_trait]
impl RelationshipStore for DuckdbRelationshipStore {
    async fn upsert(&self, edges: &[Relationship]) -> Result<(), IndexError> {
        if edges.is_empty() {
            return Ok(());
        }

        let guard = self.conn.lock().await;
        guard
            .execute_batch("BEGIN TRANSACTION;")
            .map_err(|e| IndexError::store(format!("failed to begin transaction: {}", e)))?;

        let result = (|| -> Result<(), IndexError> {
            for edge in edges {
                guard
                    .execute(
                        "DELETE FROM relationships WHERE source_chunk_id = ? AND target_chunk_id = ? AND kind = ?",
                        params![edge.source_chunk_id(), edge.target_chunk_id(), edge.kind().as_str()],
                    )
                    .map_err(|e| IndexError::store(format!("failed to delete edge: {}", e)))?;
                guard
                    .execute(
                        "INSERT INTO relationships VALUES (?, ?, ?, ?)",
                        params![
                            edge.source_chunk_id(),
                            edge.target_chunk_id(),
                            edge.kind().as_str(),
                            edge.weight() as f64,
                        ],
                    )
                    .map_err(|e| IndexError::store(format!("failed to insert edge: {}", e)))?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                guard
                    .execute_batch("COMMIT;")
                    .map_err(|e| IndexError::store(format!("failed to commit edges: {}", e)))?;
                debug!("Upserted {} relationship edges", edges.len());
                Ok(())
            }
            Err(e) => {
                let _ = guard.execute_batch("ROLLBACK;");
                Err(e)
            }
        }
    }

    async fn incoming(
        &self,
        chunk_id: &str,
        kind: Option<RelationKind>,
    ) -> Result<Vec<Relationship>, IndexError> {
        match kind {
            Some(kind) => {
                self.edges_where(
                    "target_chunk_id = ? AND kind = ?",
                    &[&chunk_id, &kind.as_str()],
                )
                .await
            }
            None => self.edges_where("target_chunk_id = ?", &[&chunk_id]).await,
        }
    }

    async fn outgoing(
        &self,
        chunk_id: &str,
        kind: Option<RelationKind>,
    ) -> Result<Vec<Relationship>, IndexError> {
        match kind {
            Some(kind) => {
                self.edges_where(
                    "source_chunk_id = ? AND kind = ?",
                    &[&chunk_id, &kind.as_str()],
                )
                .await
            }
            None => self.edges_where("source_chunk_id = ?", &[&chunk_id]).await,
        }
    }

    async fn siblings(&self, chunk_id: &str, top_k: usize) -> Result<Vec<String>, IndexError> {
        let mut siblings: Vec<String> = Vec::new();

        // Same-parent chunks first.
        let parents = self
            .incoming(chunk_id, Some(RelationKind::Contains))
            .await?;
        for parent in parents {
            let children = self
                .outgoing(parent.source_chunk_id(), Some(RelationKind::Contains))
                .await?;
            for child in children {
                let id = child.target_chunk_id();
                if id != chunk_id && !siblings.iter().any(|s| s == id) {
                    siblings.push(id.to_string());
                }
            }
        }

        // Then semantic neighbours, strongest first.
        let mut similar = self
            .outgoing(chunk_id, Some(RelationKind::SemanticallySimilar))
            .await?;
        similar.sort_by(|a, b| {
            b.weight()
                .partial_cmp(&a.weight())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for edge in similar {
            let id = edge.target_chunk_id();
            if id != chunk_id && !siblings.iter().any(|s| s == id) {
                siblings.push(id.to_string());
            }
        }

        siblings.truncate(top_k);
        Ok(siblings)
    }

    async fn edges_of_kind(&self, kind: RelationKind) -> Result<Vec<Relationship>, IndexError> {
        self.edges_where("kind = ?", &[&kind.as_str()]).await
    }

    async fn delete_by_chunks(&self, chunk_ids: &[String]) -> Result<u64, IndexError> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }

        let guard = self.conn.lock().await;
        let id_list = Self::quoted_list(chunk_ids);
        let deleted = guard
            .execute(
                &format!(
                    "DELETE FROM relationships WHERE source_chunk_id IN ({0}) OR target_chunk_id IN ({0})",
                    id_list
                ),
                [],
            )
            .map_err(|e| IndexError::store(format!("failed to delete edges: {}", e)))?;
        Ok(deleted as u64)
    }

    async fn delete_edges_from(&self, chunk_ids: &[String]) -> Result<u64, IndexError> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }

        let guard = self.conn.lock().await;
        let id_list = Self::quoted_list(chunk_ids);
        let deleted = guard
            .execute(
                &format!(
                    "DELETE FROM relationships WHERE \
                     (source_chunk_id IN ({0}) AND kind IN ('calls','imports','contains','semantically_similar')) \
                     OR (target_chunk_id IN ({0}) AND kind IN ('called_by','imported_by','contained_by'))",
                    id_list
                ),
                [],
            )
            .map_err(|e| IndexError::store(format!("failed to delete outgoing edges: {}", e)))?;
        Ok(deleted as u64)
    }

    async fn count(&self) -> Result<u64, IndexError> {
        let guard = self.conn.lock().await;
        let count: i64 = guard
            .query_row("SELECT count(*) FROM relationships", [], |row| row.get(0))
            .map_err(|e| IndexError::store(format!("failed to count edges: {}", e)))?;
        Ok(count as u64)
    }

    async fn clear(&self) -> Result<(), IndexError> {
        let guard = self.conn.lock().await;
        guard
            .execute_batch("DELETE FROM relationships;")
            .map_err(|e| IndexError::store(format!("failed to clear relationships: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(source: &str, target: &str, kind: RelationKind, weight: f32) -> Relationship {
        Relationship::new(source.to_string(), target.to_string(), kind, weight)
    }

    #[tokio::test]
    async fn test_upsert_and_query_directions() {
        let store = DuckdbRelationshipStore::in_memory().unwrap();
        let calls = edge("a", "b", RelationKind::Calls, 1.0);
        store
            .upsert(&[calls.clone(), calls.inverse()])
            .await
            .unwrap();

        let outgoing = store.outgoing("a", Some(RelationKind::Calls)).await.unwrap();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].target_chunk_id(), "b");

        let incoming = store.incoming("b", Some(RelationKind::Calls)).await.unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source_chunk_id(), "a");

        let called_by = store.outgoing("b", Some(RelationKind::CalledBy)).await.unwrap();
        assert_eq!(called_by.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = DuckdbRelationshipStore::in_memory().unwrap();
        let e = edge("a", "b", RelationKind::Imports, 1.0);

        store.upsert(&[e.clone()]).await.unwrap();
        store.upsert(&[e]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_siblings_prefers_same_parent() {
        let store = DuckdbRelationshipStore::in_memory().unwrap();
        store
            .upsert(&[
                edge("parent", "a", RelationKind::Contains, 1.0),
                edge("parent", "b", RelationKind::Contains, 1.0),
                edge("parent", "c", RelationKind::Contains, 1.0),
                edge("a", "z", RelationKind::SemanticallySimilar, 0.9),
            ])
            .await
            .unwrap();

        let siblings = store.siblings("a", 10).await.unwrap();
        assert_eq!(siblings[0], "b");
        assert_eq!(siblings[1], "c");
        assert!(siblings.contains(&"z".to_string()));
    }

    #[tokio::test]
    async fn test_delete_by_chunks() {
        let store = DuckdbRelationshipStore::in_memory().unwrap();
        store
            .upsert(&[
                edge("a", "b", RelationKind::Calls, 1.0),
                edge("c", "a", RelationKind::Imports, 1.0),
                edge("x", "y", RelationKind::Calls, 1.0),
            ])
            .await
            .unwrap();

        let deleted = store.delete_by_chunks(&["a".to_string()]).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_edges_from_keeps_incoming() {
        let store = DuckdbRelationshipStore::in_memory().unwrap();
        store
            .upsert(&[
                edge("a", "b", RelationKind::Calls, 1.0),
                edge("b", "a", RelationKind::CalledBy, 1.0),
                edge("c", "a", RelationKind::Calls, 1.0),
                edge("a", "c", RelationKind::CalledBy, 1.0),
            ])
            .await
            .unwrap();

        // Re-parsing "a" drops what a calls, but c still calls a.
        store.delete_edges_from(&["a".to_string()]).await.unwrap();

        assert!(store.outgoing("a", Some(RelationKind::Calls)).await.unwrap().is_empty());
        let incoming = store.incoming("a", Some(RelationKind::Calls)).await.unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source_chunk_id(), "c");
    }

    #[tokio::test]
    async fn test_edges_of_kind() {
        let store = DuckdbRelationshipStore::in_memory().unwrap();
        store
            .upsert(&[
                edge("a", "b", RelationKind::Imports, 1.0),
                edge("b", "c", RelationKind::Imports, 1.0),
                edge("a", "c", RelationKind::Calls, 1.0),
            ])
            .await
            .unwrap();

        let imports = store.edges_of_kind(RelationKind::Imports).await.unwrap();
        assert_eq!(imports.len(), 2);
    }
}

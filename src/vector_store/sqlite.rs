//! SQLite-based vector store implementation.
//!
//! Uses SQLite with cosine similarity computed in Rust for simplicity. The
//! library site is a few thousand passages, well within a full scan.

use super::{cosine_similarity, rank, Passage, SearchResult, VectorStore};
use crate::error::{KingbotError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS passages (
    id TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    source_url TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    indexed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_passages_collection ON passages(collection);
CREATE INDEX IF NOT EXISTS idx_passages_source ON passages(collection, source_url);
"#;

/// SQLite-based vector store bound to one collection.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    collection: String,
}

impl SqliteVectorStore {
    /// Open (or create) a vector store file.
    #[instrument(skip_all, fields(collection = %collection))]
    pub fn new(path: &Path, collection: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened SQLite vector store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
            collection: collection.to_string(),
        })
    }

    /// Create an in-memory SQLite vector store (useful for testing).
    pub fn in_memory(collection: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
            collection: collection.to_string(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| KingbotError::VectorStore(format!("Failed to acquire lock: {}", e)))
    }

    /// Serialize embedding to bytes.
    fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize embedding from bytes.
    fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap_or_default();
                f32::from_le_bytes(arr)
            })
            .collect()
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    #[instrument(skip(self, passages), fields(count = passages.len()))]
    async fn upsert_batch(&self, passages: &[Passage]) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        for passage in passages {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO passages
                (id, collection, source_url, title, content, embedding, indexed_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    passage.id.to_string(),
                    self.collection,
                    passage.source_url,
                    passage.title,
                    passage.content,
                    Self::embedding_to_bytes(&passage.embedding),
                    passage.indexed_at.to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;
        info!("Batch upserted {} passages into {}", passages.len(), self.collection);
        Ok(passages.len())
    }

    #[instrument(skip(self, query_embedding))]
    async fn search_with_threshold(
        &self,
        query_embedding: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<SearchResult>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, source_url, title, content, embedding, indexed_at
            FROM passages
            WHERE collection = ?1
            "#,
        )?;

        let rows = stmt
            .query_map(params![self.collection], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut results = Vec::with_capacity(rows.len());
        for (id, source_url, title, content, embedding, indexed_at) in rows {
            let passage = Passage {
                id: uuid::Uuid::parse_str(&id).map_err(|e| {
                    KingbotError::VectorStore(format!("Bad passage id {:?}: {}", id, e))
                })?,
                source_url,
                title,
                content,
                embedding: Self::bytes_to_embedding(&embedding),
                indexed_at: DateTime::parse_from_rfc3339(&indexed_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| {
                        KingbotError::VectorStore(format!(
                            "Bad indexed_at {:?} for passage {}: {}",
                            indexed_at, id, e
                        ))
                    })?,
            };
            let score = cosine_similarity(query_embedding, &passage.embedding);
            if score >= min_score {
                results.push(SearchResult { passage, score });
            }
        }

        let results = rank(results, limit);
        debug!("Found {} matching passages", results.len());
        Ok(results)
    }

    #[instrument(skip(self))]
    async fn delete_by_source(&self, source_url: &str) -> Result<usize> {
        let conn = self.lock()?;

        let deleted = conn.execute(
            "DELETE FROM passages WHERE collection = ?1 AND source_url = ?2",
            params![self.collection, source_url],
        )?;

        debug!("Deleted {} passages for {}", deleted, source_url);
        Ok(deleted)
    }

    async fn passage_count(&self) -> Result<usize> {
        let conn = self.lock()?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM passages WHERE collection = ?1",
            params![self.collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

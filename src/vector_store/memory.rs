//! In-memory vector store implementation.
//!
//! Useful for testing and small collections.

use super::{cosine_similarity, rank, Passage, SearchResult, VectorStore};
use crate::error::{KingbotError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// In-memory vector store.
pub struct MemoryVectorStore {
    collection: String,
    passages: RwLock<HashMap<Uuid, Passage>>,
}

impl MemoryVectorStore {
    /// Create a new in-memory vector store.
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            passages: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<Uuid, Passage>>> {
        self.passages
            .read()
            .map_err(|e| KingbotError::VectorStore(format!("Failed to acquire lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<Uuid, Passage>>> {
        self.passages
            .write()
            .map_err(|e| KingbotError::VectorStore(format!("Failed to acquire lock: {}", e)))
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn upsert_batch(&self, passages: &[Passage]) -> Result<usize> {
        let mut store = self.write()?;
        for passage in passages {
            store.insert(passage.id, passage.clone());
        }
        Ok(passages.len())
    }

    async fn search_with_threshold(
        &self,
        query_embedding: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<SearchResult>> {
        let passages = self.read()?;

        let results = passages
            .values()
            .map(|passage| SearchResult {
                score: cosine_similarity(query_embedding, &passage.embedding),
                passage: passage.clone(),
            })
            .filter(|r| r.score >= min_score)
            .collect();

        Ok(rank(results, limit))
    }

    async fn delete_by_source(&self, source_url: &str) -> Result<usize> {
        let mut passages = self.write()?;
        let initial_len = passages.len();
        passages.retain(|_, p| p.source_url != source_url);
        Ok(initial_len - passages.len())
    }

    async fn passage_count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }
}

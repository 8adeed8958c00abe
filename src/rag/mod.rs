//! RAG (Retrieval-Augmented Generation) chat engine.
//!
//! Retrieves library passages for a question and answers from them, keeping the
//! conversation so far in view.

mod cache;
pub mod context;
mod engine;

pub use cache::{EngineCache, EngineFactory, OpenAIEngineFactory};
pub use context::ContextBuilder;
pub use engine::{ChatEngine, ChatResponse, CondensePlusContextEngine};

use crate::vector_store::SearchResult;

/// A retrieved passage prepared for the prompt.
#[derive(Debug, Clone)]
pub struct ContextChunk {
    /// Page the passage was taken from.
    pub source_url: String,
    /// Page title.
    pub title: String,
    /// Text content.
    pub content: String,
    /// Similarity score.
    pub score: f32,
}

impl From<SearchResult> for ContextChunk {
    fn from(result: SearchResult) -> Self {
        Self {
            source_url: result.passage.source_url,
            title: result.passage.title,
            content: result.passage.content,
            score: result.score,
        }
    }
}

//! Ingest command: index library pages into the passage collection.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::error::{KingbotError, Result};
use crate::vector_store::{Passage, SqliteVectorStore, VectorStore};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::io::BufRead;
use tracing::{info, warn};

/// One line of the ingestion file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PageRecord {
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub content: String,
}

/// What an ingestion run did.
#[derive(Debug, Default, PartialEq)]
pub struct IngestStats {
    pub pages: usize,
    pub replaced: usize,
    pub indexed: usize,
}

/// Run the ingest command.
pub async fn run_ingest(file: &str, settings: Settings) -> anyhow::Result<()> {
    if let Err(e) = preflight::check(Operation::Ingest, &settings) {
        Output::error(&e.to_string());
        return Err(e.into());
    }

    let reader = std::io::BufReader::new(std::fs::File::open(file)?);
    let records = parse_records(reader)?;
    if records.is_empty() {
        Output::warning(&format!("No pages found in {}", file));
        return Ok(());
    }
    Output::info(&format!("Read {} pages from {}", records.len(), file));

    let store = SqliteVectorStore::new(&settings.vector_path(), &settings.vector_store.collection)?;
    let embedder = OpenAIEmbedder::from_settings(&settings)?;

    let spinner = Output::spinner("Embedding pages...");
    let result = ingest(records, &embedder, &store).await;
    spinner.finish_and_clear();
    let stats = result?;

    Output::success(&format!(
        "Indexed {} passages from {} pages into '{}'",
        stats.indexed, stats.pages, settings.vector_store.collection
    ));
    if stats.replaced > 0 {
        Output::kv("Replaced", &stats.replaced.to_string());
    }
    Output::kv("Total passages", &store.passage_count().await?.to_string());

    Ok(())
}

/// Parse JSONL page records, skipping blank lines and pages without content.
pub fn parse_records(reader: impl BufRead) -> Result<Vec<PageRecord>> {
    let mut records = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: PageRecord = serde_json::from_str(&line)
            .map_err(|e| KingbotError::InvalidInput(format!("line {}: {}", n + 1, e)))?;
        if record.content.trim().is_empty() {
            warn!("Skipping {} on line {}: no content", record.url, n + 1);
            continue;
        }
        records.push(record);
    }
    Ok(records)
}

/// Embed pages and store them, replacing earlier passages from the same URLs.
pub async fn ingest(
    records: Vec<PageRecord>,
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
) -> Result<IngestStats> {
    let texts: Vec<String> = records.iter().map(|r| r.content.clone()).collect();
    let embeddings = embedder.embed_batch(&texts).await?;
    if embeddings.len() != records.len() {
        return Err(KingbotError::Embedding(format!(
            "expected {} embeddings, got {}",
            records.len(),
            embeddings.len()
        )));
    }

    let urls: BTreeSet<&str> = records.iter().map(|r| r.url.as_str()).collect();
    let mut replaced = 0;
    for url in &urls {
        replaced += store.delete_by_source(url).await?;
    }
    let pages = urls.len();

    let passages: Vec<Passage> = records
        .into_iter()
        .zip(embeddings)
        .map(|(r, embedding)| Passage::new(r.url, r.title, r.content, embedding))
        .collect();
    let indexed = store.upsert_batch(&passages).await?;

    info!(pages, replaced, indexed, "Ingestion complete");
    Ok(IngestStats {
        pages,
        replaced,
        indexed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::MemoryVectorStore;
    use async_trait::async_trait;

    /// Embeds by text length so every page gets a vector.
    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    const PAGES: &str = r#"{"url": "https://library.sjsu.edu/library-hours/library-hours", "title": "Library Hours", "content": "King Library is open 8am to midnight."}

{"url": "https://library.sjsu.edu/study-rooms", "title": "Study Rooms", "content": "Reserve a room online."}
{"url": "https://library.sjsu.edu/empty", "title": "Empty", "content": "  "}
"#;

    #[test]
    fn test_parse_records_skips_blank_and_empty() {
        let records = parse_records(PAGES.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "Library Hours");
        assert_eq!(records[1].url, "https://library.sjsu.edu/study-rooms");
    }

    #[test]
    fn test_parse_records_reports_line() {
        let input = "{\"url\": \"a\", \"content\": \"x\"}\nnot json\n";
        match parse_records(input.as_bytes()) {
            Err(KingbotError::InvalidInput(msg)) => assert!(msg.starts_with("line 2")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ingest_replaces_pages() {
        let store = MemoryVectorStore::new("sjsulib");
        let records = parse_records(PAGES.as_bytes()).unwrap();

        let first = ingest(records.clone(), &LengthEmbedder, &store).await.unwrap();
        assert_eq!(
            first,
            IngestStats {
                pages: 2,
                replaced: 0,
                indexed: 2
            }
        );

        let second = ingest(records, &LengthEmbedder, &store).await.unwrap();
        assert_eq!(second.replaced, 2);
        assert_eq!(store.passage_count().await.unwrap(), 2);
    }
}

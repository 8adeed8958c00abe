//! Pre-flight checks before expensive operations.
//!
//! Validates that configuration and data are in place before starting
//! operations that would otherwise fail midway.

use crate::config::Settings;
use crate::error::{KingbotError, Result};

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Answering questions needs an API key and an indexed collection.
    Chat,
    /// Ingestion needs an API key for embeddings.
    Ingest,
}

/// Run pre-flight checks for the given operation.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    check_api_key(settings)?;
    if let Operation::Chat = operation {
        check_collection(settings)?;
    }
    Ok(())
}

/// Check if an OpenAI API key is configured.
fn check_api_key(settings: &Settings) -> Result<()> {
    if settings
        .openai
        .api_key
        .as_deref()
        .is_some_and(|k| !k.is_empty())
    {
        return Ok(());
    }
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(()),
        Ok(_) => Err(KingbotError::Config(
            "OPENAI_API_KEY is empty. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
        Err(_) => Err(KingbotError::Config(
            "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
    }
}

/// Check that the passage database exists.
fn check_collection(settings: &Settings) -> Result<()> {
    let path = settings.vector_path();
    if path.exists() {
        Ok(())
    } else {
        Err(KingbotError::VectorStore(format!(
            "No passage database at {}. Run 'kingbot ingest <file.jsonl>' first.",
            path.display()
        )))
    }
}

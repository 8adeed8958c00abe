//! Configuration settings for Kingbot.

use super::ui::UiSettings;
use crate::error::{KingbotError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub openai: OpenAISettings,
    pub embedding: EmbeddingSettings,
    pub vector_store: VectorStoreSettings,
    pub rag: RagSettings,
    pub memory: MemorySettings,
    pub history: HistorySettings,
    pub log: LogSettings,
    pub session: SessionSettings,
    pub ui: UiSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.kingbot".to_string(),
        }
    }
}

/// OpenAI chat completion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAISettings {
    /// API key. Falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    /// Chat model used for answers and question condensing.
    pub chat_model: String,
    /// Sampling temperature; 0 requests deterministic decoding.
    pub temperature: f32,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for OpenAISettings {
    fn default() -> Self {
        Self {
            api_key: None,
            chat_model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            timeout_secs: crate::openai::DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Embedding generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Embedding model to use.
    pub model: String,
    /// Embedding dimensions.
    pub dimensions: u32,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
        }
    }
}

/// Vector store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreSettings {
    /// Path to the SQLite database holding the passages.
    pub sqlite_path: String,
    /// Name of the passage collection answers are drawn from.
    pub collection: String,
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "~/.kingbot/vectors.db".to_string(),
            collection: "sjsulib".to_string(),
        }
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    /// Maximum number of passages placed into the system prompt.
    pub max_context_chunks: u32,
    /// Minimum similarity score for a passage to be used.
    pub min_score: f32,
    /// How long a built chat engine is reused before it is rebuilt.
    pub engine_ttl_secs: u64,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            max_context_chunks: 2,
            min_score: 0.2,
            engine_ttl_secs: 24 * 60 * 60,
        }
    }
}

/// Conversation memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Approximate token budget for the whole conversation.
    pub token_limit: usize,
    /// Assistant greeting seeded into every new session. Empty disables it.
    pub greeting: String,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            token_limit: 5000,
            greeting: "Ask me a question about SJSU Library!".to_string(),
        }
    }
}

/// Displayed history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Maximum number of messages shown at once.
    pub max_messages: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self { max_messages: 10 }
    }
}

/// Interaction log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Path to the SQLite database holding the `chathistory` table.
    pub sqlite_path: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "~/.kingbot/chathistory.db".to_string(),
        }
    }
}

/// Session lifetime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Sessions idle for longer than this are dropped by the server.
    pub idle_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60 * 60,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {variable_name}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        let settings = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else if path.is_some() {
            return Err(KingbotError::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        } else {
            Settings::default()
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.ui.validate()?;

        if self.history.max_messages == 0 {
            return Err(KingbotError::Config(
                "history.max_messages must be at least 1".to_string(),
            ));
        }
        if self.memory.token_limit == 0 {
            return Err(KingbotError::Config(
                "memory.token_limit must be at least 1".to_string(),
            ));
        }
        if self.vector_store.collection.trim().is_empty() {
            return Err(KingbotError::Config(
                "vector_store.collection must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kingbot")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded vector database path.
    pub fn vector_path(&self) -> PathBuf {
        Self::expand_path(&self.vector_store.sqlite_path)
    }

    /// Get the expanded interaction log path.
    pub fn log_path(&self) -> PathBuf {
        Self::expand_path(&self.log.sqlite_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.openai.chat_model, "gpt-4o-mini");
        assert_eq!(settings.openai.temperature, 0.0);
        assert_eq!(settings.history.max_messages, 10);
        assert_eq!(settings.vector_store.collection, "sjsulib");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [history]
            max_messages = 4

            [memory]
            greeting = ""
            "#,
        )
        .unwrap();

        assert_eq!(settings.history.max_messages, 4);
        assert!(settings.memory.greeting.is_empty());
        assert_eq!(settings.memory.token_limit, 5000);
        assert_eq!(settings.ui.buttons.len(), 3);
    }

    #[test]
    fn test_zero_max_messages_is_rejected() {
        let mut settings = Settings::default();
        settings.history.max_messages = 0;
        assert!(matches!(settings.validate(), Err(KingbotError::Config(_))));
    }

    #[test]
    fn test_load_from_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[rag]\nmax_context_chunks = 5\n").unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.rag.max_context_chunks, 5);
        assert_eq!(loaded.vector_store.collection, "sjsulib");
    }

    #[test]
    fn test_malformed_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[history\nmax_messages = ").unwrap();

        assert!(matches!(
            Settings::load_from(Some(&path)),
            Err(KingbotError::TomlParse(_))
        ));
    }

    #[test]
    fn test_explicit_missing_file_is_fatal() {
        let path = PathBuf::from("/nonexistent/kingbot/config.toml");
        assert!(matches!(
            Settings::load_from(Some(&path)),
            Err(KingbotError::Config(_))
        ));
    }
}

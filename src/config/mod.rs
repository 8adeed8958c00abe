//! Configuration module for Kingbot.
//!
//! Handles loading and managing application settings, widget presentation and
//! prompt templates.

mod prompts;
mod settings;
mod ui;

pub use prompts::{ChatPrompts, Prompts, CONTEXT_PLACEHOLDER};
pub use settings::{
    EmbeddingSettings, GeneralSettings, HistorySettings, LogSettings, MemorySettings,
    OpenAISettings, PromptSettings, RagSettings, SessionSettings, Settings, VectorStoreSettings,
};
pub use ui::{MainSettings, QuickQuestion, RoleMap, SideSettings, UiSettings, QUICK_QUESTION_COUNT};

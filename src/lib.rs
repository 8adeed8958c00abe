//! Kingbot - SJSU Library chat assistant
//!
//! A retrieval-augmented chat assistant for the SJSU King Library. Questions are
//! answered from indexed library pages, every exchange is logged, and users can
//! rate answers with a thumbs up or down and an optional comment.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Settings, page text, quick questions and prompt templates
//! - `memory` - Token-bounded conversation memory
//! - `history` - Which turns of the memory are displayed
//! - `session` - Per-session state and the processing guard
//! - `embedding` - Embedding generation
//! - `vector_store` - Passage storage and similarity search
//! - `rag` - Condense-plus-context chat engine and its cache
//! - `feedback` - Interaction log and feedback correlation
//! - `bot` - The event loop tying the above together
//! - `cli` - Terminal chat, ingestion and the HTTP server
//!
//! # Example
//!
//! ```rust,no_run
//! use kingbot::bot::{Event, Kingbot};
//! use kingbot::config::Settings;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bot = Kingbot::new(Settings::load()?)?;
//!     let session = bot.open_session().await;
//!
//!     let view = bot
//!         .dispatch(session, Event::Query { text: "What are the library hours?".into() })
//!         .await?;
//!     for message in view.messages {
//!         println!("{}: {}", message.name, message.content);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod feedback;
pub mod history;
pub mod memory;
pub mod openai;
pub mod rag;
pub mod session;
pub mod vector_store;

pub use error::{KingbotError, Result};

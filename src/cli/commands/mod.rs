//! CLI command implementations.

mod chat;
mod config;
mod ingest;
mod serve;

pub use chat::run_chat;
pub use config::run_config;
pub use ingest::{ingest, parse_records, run_ingest, IngestStats, PageRecord};
pub use serve::run_serve;

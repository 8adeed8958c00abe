//! CLI module for Kingbot.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Kingbot - SJSU Library chat assistant
///
/// Answers questions about the library from indexed library pages and records
/// every exchange with optional user feedback.
#[derive(Parser, Debug)]
#[command(name = "kingbot")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the chat widget and its JSON API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Chat with Kingbot in the terminal
    Chat,

    /// Index library pages from a JSONL file of {url, title, content} lines
    Ingest {
        /// Path to the JSONL file
        file: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::parse_from(["kingbot", "-vv", "serve", "--port", "8080"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Serve { host, port } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 8080);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_ingest_with_config() {
        let cli = Cli::parse_from(["kingbot", "ingest", "pages.jsonl", "--config", "/tmp/k.toml"]);
        assert_eq!(cli.config.as_deref(), Some("/tmp/k.toml"));
        assert!(matches!(cli.command, Commands::Ingest { ref file } if file == "pages.jsonl"));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

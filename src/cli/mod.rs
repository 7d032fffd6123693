//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "quarry",
    version,
    about = "Hybrid lexical and vector search engine",
    long_about = "Quarry stores documents, indexes them for BM25 and embedding search, and ranks \
                  results with a blended relevance and quality score. `quarry serve` runs the \
                  engine behind a Unix socket; the other commands talk to that server."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/quarry/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the search server in the foreground
    Serve,

    /// Ingest documents from a JSON file ({"documents": [...], "images": [...]})
    Index {
        /// Path to the ingest request file, `-` for stdin
        file: PathBuf,
    },

    /// Search indexed documents
    Search {
        /// Query text, may include category:, tag: and type: filters
        query: String,

        /// 0-based page index
        #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
        page: i64,

        /// Results per page (defaults to query.default_page_size)
        #[arg(short = 's', long, allow_negative_numbers = true)]
        page_size: Option<i64>,

        /// Only documents in this category
        #[arg(long)]
        category: Option<String>,

        /// Only documents carrying this tag (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show a stored document
    Get {
        id: String,
    },

    /// Delete a document
    Delete {
        id: String,
    },

    /// Delete every document in a scope
    Clear {
        #[arg(long, value_parser = ["all", "documents", "images"], default_value = "all")]
        scope: String,
    },

    /// Show server and index status
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

//! # Relay Search CLI (`rsearch`)
//!
//! Operates the search overlay of a nostr relay event store: schema setup,
//! backfill, search from the terminal, index rebuilds, and the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! rsearch --config ./config/relay.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rsearch init` | Create the database schema and an empty index generation |
//! | `rsearch serve` | Start the HTTP API |
//! | `rsearch ingest <file>` | Backfill JSONL records |
//! | `rsearch search "<text>"` | Search records |
//! | `rsearch get <id>` | Print one record |
//! | `rsearch reindex` | Rebuild the search index in the foreground |
//! | `rsearch stats` | Store and index overview |
//!
//! ## Examples
//!
//! ```bash
//! rsearch init --config ./config/relay.toml
//! rsearch ingest ./backup/stations.jsonl
//! rsearch search "jazz radio" --limit 5
//! rsearch search "domain:example.com" --json
//! rsearch reindex --progress json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use relay_search::progress::ProgressMode;
use relay_search::relay::Relay;
use relay_search::{config, get, ingest, search, server, stats};

/// Relay Search CLI: full-text search overlay for a nostr relay.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/relay.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rsearch",
    about = "Relay Search: full-text search overlay and reindex pipeline for a nostr relay",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/relay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and the search index.
    ///
    /// Idempotent: an existing database and index generation are kept.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Backfill records from a JSONL file (one record per line).
    Ingest {
        /// Path to the JSONL file.
        file: PathBuf,

        /// Parse and count records without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search records.
    ///
    /// Supports `key:value` extensions such as `domain:example.com` and
    /// `lang:en`.
    Search {
        /// Free-text search.
        text: String,

        /// Restrict to a kind (repeatable). Defaults to `[search].default_kinds`.
        #[arg(long = "kind")]
        kinds: Vec<u32>,

        /// Restrict to an author pubkey (repeatable).
        #[arg(long = "author")]
        authors: Vec<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Print records as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print one record by id.
    Get {
        id: String,

        /// Print the raw record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the search index from the primary store.
    ///
    /// Builds a new generation next to the live one and switches to it
    /// when done. Progress goes to stderr.
    Reindex {
        /// Progress output. Defaults to human when stderr is a TTY, otherwise off.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show record counts and index state.
    Stats,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            let relay = Relay::open(&cfg).await?;
            relay.close().await;
            println!("Database and search index initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { file, dry_run } => {
            ingest::run_ingest(&cfg, &file, dry_run).await?;
        }
        Commands::Search {
            text,
            kinds,
            authors,
            limit,
            json,
        } => {
            search::run_search(&cfg, &text, kinds, authors, limit, json).await?;
        }
        Commands::Get { id, json } => {
            get::run_get(&cfg, &id, json).await?;
        }
        Commands::Reindex { progress } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let reporter = mode.reporter();
            let relay = Relay::open(&cfg).await?;
            let result = relay.rebuild_index(reporter.as_ref()).await;
            relay.close().await;
            let status = result?;
            println!(
                "reindex ok: {} records into {}",
                status.processed,
                status.generation.unwrap_or_default()
            );
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

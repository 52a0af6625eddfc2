mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hindsight::config::HindsightConfig;
use hindsight::memory::types::EventType;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hindsight", version, about = "Personal memory layer for AI desktop assistants")]
struct Cli {
    /// Config file (defaults to ~/.hindsight/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve,
    /// Rank memories against a query
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        /// Entity id to use as context (repeatable)
        #[arg(long = "entity")]
        entities: Vec<String>,
    },
    /// Run one file through the extraction pipeline
    Ingest {
        file: PathBuf,
        /// Event type: meeting, screen_capture, audio, document, note, other
        #[arg(long = "type", default_value = "document")]
        event_type: EventType,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },
    /// Print record counts
    Stats,
    /// Run store diagnostics
    Doctor,
    /// Rebuild the vector index and graph from the relational store
    Reindex {
        /// Regenerate every embedding with the configured model
        #[arg(long)]
        reembed: bool,
    },
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.hindsight/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HindsightConfig::load_from(path)?,
        None => HindsightConfig::load()?,
    };

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => hindsight::server::serve(config).await?,
        Command::Search {
            query,
            limit,
            entities,
        } => cli::search::search(&config, &query, limit, entities).await?,
        Command::Ingest {
            file,
            event_type,
            source,
            title,
        } => {
            let args = cli::ingest::IngestArgs {
                file: &file,
                event_type,
                source,
                title,
            };
            cli::ingest::ingest(&config, args).await?
        }
        Command::Stats => cli::stats::stats(&config)?,
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::Reindex { reembed } => cli::reindex::reindex(&config, reembed).await?,
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await?,
        },
    }

    Ok(())
}

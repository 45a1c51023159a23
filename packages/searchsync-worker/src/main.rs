//! searchsync worker CLI
//!
//! # Usage
//!
//! ```bash
//! # Process a queue batch against the configured OpenSearch endpoint
//! searchsync-worker run --config searchsync.yaml --input event.json
//!
//! # Dry run from stdin against an in-memory index
//! cat event.json | searchsync-worker run --config searchsync.yaml --in-memory
//!
//! # Validate a configuration file
//! searchsync-worker check --config searchsync.yaml
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use searchsync_core::{EngineConfig, SyncEngine};
use searchsync_worker::{build_store, handle, SqsEvent, StoreKind};
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "searchsync-worker")]
#[command(about = "Sync change-stream batches into a search index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one queue batch and print the partial batch failure response
    Run {
        /// Engine configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// SQS event JSON; read from stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Write to a process-local index instead of OpenSearch
        #[arg(long)]
        in_memory: bool,
    },

    /// Load and validate a configuration file
    Check {
        /// Engine configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            input,
            in_memory,
        } => {
            let config = load_config(&config)?;
            let kind = if in_memory {
                StoreKind::InMemory
            } else {
                StoreKind::OpenSearch
            };
            let store = build_store(kind, &config)?;
            let engine = SyncEngine::from_config(&config, store)?;

            let event = SqsEvent::from_json(&read_input(input.as_deref()).await?)?;
            let response = handle(&engine, &event).await;
            println!("{}", serde_json::to_string(&response)?);
        }
        Commands::Check { config } => {
            let config = load_config(&config)?;
            let catalog = config.catalog()?;
            for entity in catalog.entities() {
                info!(
                    entity_type = %entity.entity_type,
                    index = %entity.index_name,
                    has_many = entity.has_many.len(),
                    belongs_to = entity.belongs_to.len(),
                    "entity"
                );
            }
            info!(entities = catalog.len(), "configuration is valid");
        }
    }

    Ok(())
}

/// Parsed, environment-overridden and validated configuration
fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    EngineConfig::from_yaml(path).with_context(|| format!("failed to load {}", path.display()))
}

async fn read_input(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut content = String::new();
            tokio::io::stdin().read_to_string(&mut content).await?;
            Ok(content)
        }
    }
}

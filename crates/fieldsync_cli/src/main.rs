//! FieldSync CLI
//!
//! Command-line tools for offline queue stores.
//!
//! # Commands
//!
//! - `inspect` - List entities with pending or dead-lettered records
//! - `enqueue` - Capture one mutation into an entity's queue
//! - `flush` - Send pending queues to the backend
//! - `dead-letters` - Show or clear an entity's dead-lettered records

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// FieldSync offline queue tools.
#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the queue store directory
    #[arg(global = true, short, long)]
    store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List entities with pending or dead-lettered records
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Capture one mutation into an entity's queue
    Enqueue {
        /// Entity identifier
        entity: String,

        /// Field name
        field: String,

        /// New value, parsed as JSON and taken as a string otherwise
        value: String,
    },

    /// Send pending queues to the backend, one attempt per entity
    Flush {
        /// Endpoint template containing {entity_id}
        #[arg(short, long)]
        endpoint: String,

        /// Only flush this entity
        #[arg(long)]
        entity: Option<String>,

        /// Request timeout in seconds
        #[arg(short, long, default_value = "30")]
        timeout_secs: u64,
    },

    /// Show or clear an entity's dead-lettered records
    DeadLetters {
        /// Entity identifier
        entity: String,

        /// Delete the records instead of printing them
        #[arg(long)]
        clear: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let store = cli.store.ok_or("Store path required for inspect")?;
            commands::inspect::run(&store, &format).await?;
        }
        Commands::Enqueue {
            entity,
            field,
            value,
        } => {
            let store = cli.store.ok_or("Store path required for enqueue")?;
            commands::enqueue::run(&store, &entity, &field, &value).await?;
        }
        Commands::Flush {
            endpoint,
            entity,
            timeout_secs,
        } => {
            let store = cli.store.ok_or("Store path required for flush")?;
            let timeout = Duration::from_secs(timeout_secs);
            commands::flush::run(&store, &endpoint, entity.as_deref(), timeout).await?;
        }
        Commands::DeadLetters { entity, clear } => {
            let store = cli.store.ok_or("Store path required for dead-letters")?;
            commands::dead_letters::run(&store, &entity, clear).await?;
        }
        Commands::Version => {
            println!("FieldSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

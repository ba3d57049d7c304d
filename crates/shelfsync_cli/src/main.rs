//! Shelfsync CLI
//!
//! Offline tools for inspecting what a sync would do.
//!
//! # Commands
//!
//! - `plan` - Compute the bookmark merge plan for a JSON snapshot
//! - `hash` - Print the content hash of book files
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Shelfsync command-line tools.
#[derive(Parser)]
#[command(name = "shelfsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the bookmark merge plan for a snapshot of both sides
    Plan {
        /// Snapshot file with `local`, `server`, `local_deleted` and `server_deleted`
        snapshot: PathBuf,

        /// List converged uids too
        #[arg(short, long)]
        all: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the content hash of book files
    Hash {
        /// Book files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Plan {
            snapshot,
            all,
            format,
        } => {
            commands::plan::run(&snapshot, all, &format)?;
        }
        Commands::Hash { files } => {
            commands::hash::run(&files)?;
        }
        Commands::Version => {
            println!("Shelfsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Shelfsync Engine v{}", shelfsync_engine::VERSION);
        }
    }

    Ok(())
}

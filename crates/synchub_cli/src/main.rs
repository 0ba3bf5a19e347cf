//! synchub CLI
//!
//! Loads a scenario into an in-process server and inspects the result.
//!
//! # Commands
//!
//! - `replay` - Print the change feed of every (or one) user
//! - `stats` - Print store and provider statistics

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// synchub scenario tools.
#[derive(Parser)]
#[command(name = "synchub")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory for blob files (in memory if omitted)
    #[arg(global = true, short, long)]
    root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario and print change feeds
    Replay {
        /// Scenario file (JSON with `storage` and `metadata`)
        #[arg(short, long)]
        scenario: PathBuf,

        /// Only print this user's feed
        #[arg(short, long)]
        user: Option<String>,

        /// Print changes after this sync id
        #[arg(short, long, default_value = "0")]
        cursor: i64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Load a scenario and print statistics
    Stats {
        /// Scenario file (JSON with `storage` and `metadata`)
        #[arg(short, long)]
        scenario: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "json")]
        format: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay {
            scenario,
            user,
            cursor,
            format,
        } => {
            commands::replay::run(&scenario, cli.root.as_deref(), user.as_deref(), cursor, &format)?;
        }
        Commands::Stats { scenario, format } => {
            commands::stats::run(&scenario, cli.root.as_deref(), &format)?;
        }
    }

    Ok(())
}

//! pagelog CLI
//!
//! Read-only tools for looking inside a pagelog store file.
//!
//! # Commands
//!
//! - `inspect` - Display store and log header information
//! - `verify` - Walk the log and check its pages against the free lists
//! - `dump-log` - Dump log records for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// pagelog command-line store tools.
#[derive(Parser)]
#[command(name = "pagelog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store and log header information
    Inspect {
        /// List every live log page
        #[arg(short, long)]
        log_pages: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Walk the log and check its pages against the free lists
    Verify,

    /// Dump log records for debugging
    DumpLog {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Skip this many records first
        #[arg(short, long, default_value = "0")]
        skip: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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
        Commands::Inspect { log_pages, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, log_pages, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::DumpLog {
            limit,
            skip,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for dump-log")?;
            commands::dump_log::run(&path, limit, skip, &format)?;
        }
        Commands::Version => {
            println!("pagelog CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("pagelog core v{}", pagelog_core::VERSION);
        }
    }

    Ok(())
}

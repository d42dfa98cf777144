//! `attribution` command-line front end.
//!
//! # Commands
//!
//! - `encode`: pooled encoding of a text
//! - `importance`: per-token importance of one dataset example
//! - `importances`: every method on one dataset example
//! - `relation`: token2token or integrad relation between two examples
//!
//! Results are printed as JSON on stdout. Exit code 0 on success, 1 on
//! error, 2 on an invalid method or relation name.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{EncodeArgs, ImportanceArgs, ImportancesArgs, RelationArgs};

#[derive(Parser)]
#[command(name = "attribution", version, about = "Explain sentence-encoder predictions token by token")]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "ATTRIBUTION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding one model sub-directory per dataset
    #[arg(long)]
    pub models_dir: Option<PathBuf>,

    /// JSON dataset file (examples and support selections)
    #[arg(short, long, env = "ATTRIBUTION_DATASETS")]
    pub datasets: PathBuf,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pooled encoding of a text
    Encode(EncodeArgs),
    /// Per-token importance of one example under one method
    Importance(ImportanceArgs),
    /// Per-token importance of one example under every method
    Importances(ImportancesArgs),
    /// Relation between two examples
    Relation(RelationArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    std::process::exit(commands::handle(cli));
}

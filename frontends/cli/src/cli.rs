use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "pantry", about = "Inspect an offline recipe cache")]
pub struct Cli {
    /// YAML config file
    #[arg(short, long, env = "PANTRY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Cache database; overrides the config file
    #[arg(long, env = "PANTRY_DB", global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Schema version, queue depth and stream cursor
    Status,
    /// Pending mutations, oldest first
    Queue,
    /// Every cached recipe; `*` marks unsynced ones
    Recipes,
    Search(SearchArgs),
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(long)]
    pub title: Option<String>,
    /// Repeatable; any match counts
    #[arg(long)]
    pub ingredient: Vec<String>,
    /// Collection URI or name
    #[arg(long)]
    pub collection: Option<String>,
}

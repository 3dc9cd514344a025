//! Offline inspection of a pantry cache.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{Cli, Commands};
use pantry::{LocalStore, PantryConfig, PendingMutationQueue, SearchIndex, SearchQuery};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, base) = load_config(cli.config.as_deref())?;
    init_logging(&config)?;

    let db_path = cli
        .database
        .clone()
        .unwrap_or_else(|| config.resolve_database_path(&base));
    tracing::debug!(path = %db_path.display(), "opening cache");
    let store = Arc::new(
        LocalStore::open(&db_path)
            .await
            .with_context(|| format!("failed to open cache at {}", db_path.display()))?,
    );

    match cli.command {
        Commands::Status => status(&store).await,
        Commands::Queue => queue(&store).await,
        Commands::Recipes => recipes(&store).await,
        Commands::Search(args) => {
            let mut query = SearchQuery::default();
            query.title = args.title;
            query.ingredients = args.ingredient;
            query.collection = args.collection;
            search(&store, &query).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<(PantryConfig, PathBuf)> {
    match path {
        Some(path) => {
            let config = PantryConfig::load_from_file(path)?;
            let base = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            Ok((config, base))
        }
        None => Ok((PantryConfig::default(), PathBuf::from("."))),
    }
}

fn init_logging(config: &PantryConfig) -> Result<()> {
    // RUST_LOG overrides the configured filter
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("could not open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(file).with_ansi(false))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}

async fn status(store: &Arc<LocalStore>) -> Result<()> {
    let queue = PendingMutationQueue::new(store.clone());
    let state = store.load_sync_state().await?;
    println!("schema version:    {}", store.schema_version().await?);
    println!("pending mutations: {}", queue.len().await?);
    println!(
        "last cursor:       {}",
        state.last_cursor.as_ref().map(|c| c.as_str()).unwrap_or("-")
    );
    println!(
        "last sync:         {}",
        state
            .last_sync_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}

async fn queue(store: &Arc<LocalStore>) -> Result<()> {
    let queue = PendingMutationQueue::new(store.clone());
    for entry in queue.list().await? {
        println!(
            "{}  {:<6}  {}",
            entry.timestamp.to_rfc3339(),
            entry.operation.as_str(),
            entry.uri
        );
    }
    Ok(())
}

async fn recipes(store: &Arc<LocalStore>) -> Result<()> {
    for recipe in store.get_all::<pantry::pantry_api::Recipe>().await? {
        let marker = if recipe.pending_sync { "*" } else { " " };
        println!("{marker} {}  {}", recipe.record.title, recipe.uri);
    }
    Ok(())
}

async fn search(store: &Arc<LocalStore>, query: &SearchQuery) -> Result<()> {
    if query.is_empty() {
        anyhow::bail!("search needs --title, --ingredient or --collection");
    }
    let index = SearchIndex::new(store.clone());
    for hit in index.search(query).await? {
        let reasons: Vec<&str> = hit.reasons.iter().map(|r| r.as_str()).collect();
        println!(
            "{}  [{}]  {}",
            hit.recipe.record.title,
            reasons.join(", "),
            hit.recipe.uri
        );
    }
    Ok(())
}

use anyhow::Result;
use pantry::pantry_api::{Cursor, MutationOperation, Recipe};
use pantry::storage::CURRENT_SCHEMA_VERSION;
use pantry::testing::fixtures;
use pantry::{LocalStore, PendingMutationQueue};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_cache_survives_reopen() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("pantry.db");

    {
        let store = Arc::new(LocalStore::open(&path).await?);
        let queue = PendingMutationQueue::new(store.clone());
        store.put(&fixtures::recipe("r1", "Focaccia", &["flour"])).await?;
        store
            .put(&fixtures::collection("c1", "Breads", &[&fixtures::recipe_uri("r1")]))
            .await?;
        queue
            .enqueue(fixtures::recipe_uri("r2"), MutationOperation::Delete, None)
            .await?;
        store
            .advance_cursor(&Cursor::new("c42"), chrono::Utc::now())
            .await?;
    }

    let store = Arc::new(LocalStore::open(&path).await?);
    let queue = PendingMutationQueue::new(store.clone());
    assert_eq!(store.schema_version().await?, CURRENT_SCHEMA_VERSION);

    let recipe: Recipe = store
        .get(&fixtures::recipe_uri("r1"))
        .await?
        .expect("recipe persisted");
    assert_eq!(recipe.record.title, "Focaccia");
    assert_eq!(
        store.get_by_collection(&fixtures::collection_uri("c1")).await?.len(),
        1
    );
    assert_eq!(queue.list().await?.len(), 1);
    assert_eq!(
        store.load_sync_state().await?.last_cursor,
        Some(Cursor::new("c42"))
    );
    Ok(())
}

#[tokio::test]
async fn test_store_path_is_reported() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("cache.db");
    let store = LocalStore::open(&path).await?;
    assert_eq!(store.path(), Some(path.as_path()));

    let memory = LocalStore::open_in_memory().await?;
    assert!(memory.path().is_none());
    Ok(())
}

#[tokio::test]
async fn test_open_reports_fault_for_unreachable_path() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("missing").join("pantry.db");

    let err = LocalStore::open(&path).await.unwrap_err();
    assert_eq!(err.operation, "open");
    assert!(err.target.ends_with("pantry.db"));
    Ok(())
}

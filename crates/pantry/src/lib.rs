//! Offline-first recipe cache.
//!
//! Recipes and collections live in a local SQLite cache that is always
//! readable and writable. Local writes are queued and pushed to the owner's
//! remote repository by the [`sync::SyncEngine`], which also folds the
//! remote change stream back into the cache.

pub mod api;
pub mod config;
pub mod core;
pub mod storage;
pub mod sync;
pub mod testing;

pub use api::RecipeBook;
pub use config::{PantryConfig, SyncConfig};
pub use crate::core::{
    Forgotten, MatchReason, PendingMutationQueue, SearchHit, SearchIndex, SearchQuery, Settlement,
};
pub use storage::{CachedEntity, LocalStore};
pub use sync::{
    DeletionCoordinator, DeletionReport, DrainReport, FoldOutcome, SyncEngine, SyncEngineDeps,
    SyncObserver, SyncOptions,
};

pub use pantry_api;

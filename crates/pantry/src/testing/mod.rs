//! Test doubles and helpers shared by unit and integration tests.
//!
//! - `FakeRemote`: in-memory remote store plus change feed with fault injection
//! - `StaticSession`: session provider tests can sign in and out
//! - `fixtures`: canned URIs and records
//! - `TestHarness`: a fully wired cache over an in-memory store

pub mod fake_remote;
pub mod fixtures;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use pantry_api::{Cursor, SyncStatus};
use tokio::time::timeout;

pub use fake_remote::{FakeRemote, RemoteCall};
pub use session::StaticSession;

use crate::api::RecipeBook;
use crate::core::{PendingMutationQueue, SearchIndex};
use crate::storage::LocalStore;
use crate::sync::{DeletionCoordinator, SyncEngine, SyncEngineDeps, SyncOptions};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Every component wired against one in-memory store and one fake remote.
pub struct TestHarness {
    pub store: Arc<LocalStore>,
    pub queue: PendingMutationQueue,
    pub remote: Arc<FakeRemote>,
    pub sessions: Arc<StaticSession>,
    pub engine: SyncEngine,
    pub book: RecipeBook,
    pub deletion: DeletionCoordinator,
    pub search: SearchIndex,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_remote(FakeRemote::new(), SyncOptions::default()).await
    }

    pub async fn with_remote(remote: FakeRemote, options: SyncOptions) -> Self {
        let store = match LocalStore::open_in_memory().await {
            Ok(store) => Arc::new(store),
            Err(e) => panic!("in-memory store failed to open: {e}"),
        };
        let remote = Arc::new(remote);
        let sessions = Arc::new(StaticSession::signed_in(fixtures::OWNER_DID));

        let engine = SyncEngine::with_options(
            SyncEngineDeps {
                store: store.clone(),
                remote: remote.clone(),
                changes: remote.clone(),
                sessions: sessions.clone(),
            },
            options,
        );
        let book = RecipeBook::new(store.clone(), remote.clone(), sessions.clone());
        let deletion = DeletionCoordinator::new(store.clone(), remote.clone(), sessions.clone());
        let search = SearchIndex::new(store.clone());

        Self {
            queue: PendingMutationQueue::new(store.clone()),
            store,
            remote,
            sessions,
            engine,
            book,
            deletion,
            search,
        }
    }
}

/// Wait until the engine has folded the event at `cursor`.
pub async fn wait_for_cursor(engine: &SyncEngine, cursor: &str) {
    let target = Cursor::new(cursor);
    let mut rx = engine.subscribe_progress();
    let reached = timeout(WAIT_TIMEOUT, rx.wait_for(|c| c.as_ref() == Some(&target))).await;
    match reached {
        Ok(Ok(_)) => {}
        Ok(Err(_)) => panic!("sync engine dropped while waiting for cursor {cursor}"),
        Err(_) => panic!("timed out waiting for cursor {cursor}"),
    }
}

/// Wait until the engine reports `status`.
pub async fn wait_for_status(engine: &SyncEngine, status: SyncStatus) {
    let mut rx = engine.subscribe_status();
    let reached = timeout(WAIT_TIMEOUT, rx.wait_for(|s| *s == status)).await;
    match reached {
        Ok(Ok(_)) => {}
        Ok(Err(_)) => panic!("sync engine dropped while waiting for {status}"),
        Err(_) => panic!("timed out waiting for status {status}"),
    }
}

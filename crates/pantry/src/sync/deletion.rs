//! Cascading recipe deletion.
//!
//! Deleting a recipe must not leave dangling references behind, locally or
//! remotely. The coordinator first detaches the recipe from every collection
//! that lists it, then deletes the recipe remotely, and only then removes the
//! local copy. Remote work always precedes the matching local write so an
//! interrupted run can simply be repeated.

use std::sync::Arc;

use chrono::Utc;
use pantry_api::{
    AtUri, Collection, CollectionPatch, EntityKind, EntityPayload, MutationOperation,
    PantryError, Recipe, RemoteFault, Result,
};
use tracing::{debug, info};

use super::remote::{require_session, RemoteRecordStore, SessionProvider};
use crate::core::PendingMutationQueue;
use crate::storage::LocalStore;

/// What a deletion run actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Collections the recipe was removed from.
    pub detached_from: Vec<AtUri>,
    /// Whether a local copy of the recipe existed and was removed.
    pub removed_locally: bool,
    /// Whether a queued mutation for the recipe was discarded.
    pub dropped_pending: bool,
}

pub struct DeletionCoordinator {
    store: Arc<LocalStore>,
    queue: PendingMutationQueue,
    remote: Arc<dyn RemoteRecordStore>,
    sessions: Arc<dyn SessionProvider>,
}

impl DeletionCoordinator {
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteRecordStore>,
        sessions: Arc<dyn SessionProvider>,
    ) -> Self {
        Self {
            queue: PendingMutationQueue::new(store.clone()),
            store,
            remote,
            sessions,
        }
    }

    /// Delete a recipe and every collection reference to it.
    ///
    /// Idempotent: repeating the call after success (or after a partial
    /// failure) finishes the job without error. A recipe already gone
    /// remotely counts as deleted.
    #[tracing::instrument(skip_all, fields(uri = %uri))]
    pub async fn delete_recipe_complete(&self, uri: &AtUri) -> Result<DeletionReport> {
        uri.expect_kind(EntityKind::Recipe)?;
        let session = require_session(self.sessions.as_ref()).await?;
        let mut report = DeletionReport::default();

        let referencing: Vec<Collection> = self
            .store
            .get_all::<Collection>()
            .await?
            .into_iter()
            .filter(|c| c.contains(uri))
            .collect();
        debug!(collections = referencing.len(), "found referencing collections");

        for collection in referencing {
            let Some(updated) = collection.without_recipe(uri, Utc::now()) else {
                continue;
            };
            self.detach(&session, &updated).await?;
            report.detached_from.push(updated.uri);
        }

        match self.remote.delete_recipe(&session, uri).await {
            Ok(()) => {}
            Err(RemoteFault::NotFound { .. }) => debug!("recipe already absent remotely"),
            Err(fault) => return Err(fault.into()),
        }

        let forgotten = self.queue.forget::<Recipe>(uri).await?;
        report.removed_locally = forgotten.record;
        report.dropped_pending = forgotten.pending;

        info!(
            detached = report.detached_from.len(),
            removed_locally = report.removed_locally,
            dropped_pending = report.dropped_pending,
            "recipe deleted"
        );
        Ok(report)
    }

    /// Write one fixed collection remotely, then locally.
    async fn detach(&self, session: &crate::sync::Session, updated: &Collection) -> Result<()> {
        let queued = self.queue.get(&updated.uri).await?;
        let never_synced = queued
            .as_ref()
            .is_some_and(|e| e.operation == MutationOperation::Create);

        // A collection still waiting for its first sync does not exist
        // remotely yet; its queued payload is fixed below instead.
        if !never_synced {
            let patch = CollectionPatch::recipe_uris(&updated.record);
            match self.remote.update_collection(session, &updated.uri, &patch).await {
                Ok(_) => {}
                Err(RemoteFault::NotFound { .. }) => {
                    debug!(collection = %updated.uri, "collection absent remotely")
                }
                Err(fault) => return Err(PantryError::from(fault)),
            }
        }

        self.store.put(updated).await?;

        if let Some(entry) = queued {
            if let Some(EntityPayload::Collection(_)) = entry.payload {
                // Keep the queued snapshot from re-adding the recipe on drain.
                self.queue
                    .rewrite_payload(&updated.uri, EntityPayload::Collection(updated.record.clone()))
                    .await?;
            }
        }
        Ok(())
    }
}

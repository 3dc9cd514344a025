//! Local-first editing surface.
//!
//! Every write lands in the local cache immediately (flagged `pending_sync`
//! for recipes) and is queued for the sync engine to push. Nothing here
//! waits on the network except `fork_recipe` and a cache miss in
//! `fetch_recipe`, which have to read a record this device has never seen.

use std::sync::Arc;

use chrono::Utc;
use pantry_api::{
    AtUri, Collection, CollectionPatch, CollectionRecord, EntityKind, EntityPayload,
    ForkMetadata, MutationOperation, Recipe, RecipeRecord, RemoteFault, Result, ValidationFault,
};
use tracing::{debug, info};

use crate::core::PendingMutationQueue;
use crate::storage::LocalStore;
use crate::sync::{require_session, RemoteRecordStore, Session, SessionProvider};

fn ensure_owned(session: &Session, uri: &AtUri) -> Result<()> {
    if uri.authority() != session.did {
        return Err(ValidationFault::field(
            "uri",
            format!("{uri} belongs to another account"),
        )
        .into());
    }
    Ok(())
}

fn unknown(uri: &AtUri) -> ValidationFault {
    ValidationFault::UnknownRecord {
        uri: uri.to_string(),
    }
}

pub struct RecipeBook {
    store: Arc<LocalStore>,
    queue: PendingMutationQueue,
    remote: Arc<dyn RemoteRecordStore>,
    sessions: Arc<dyn SessionProvider>,
}

impl RecipeBook {
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

    async fn session(&self) -> Result<Session> {
        Ok(require_session(self.sessions.as_ref()).await?)
    }

    // ===== Reads =====

    pub async fn recipe(&self, uri: &AtUri) -> Result<Option<Recipe>> {
        Ok(self.store.get(uri).await?)
    }

    pub async fn recipes(&self) -> Result<Vec<Recipe>> {
        Ok(self.store.get_all().await?)
    }

    pub async fn collection(&self, uri: &AtUri) -> Result<Option<Collection>> {
        Ok(self.store.get(uri).await?)
    }

    pub async fn collections(&self) -> Result<Vec<Collection>> {
        Ok(self.store.get_all().await?)
    }

    /// Cached recipe, or a remote fetch cached on the way through.
    ///
    /// A recipe with a queued delete reads as absent. Signed out, a cache
    /// miss is simply `None`.
    #[tracing::instrument(skip_all, fields(uri = %uri))]
    pub async fn fetch_recipe(&self, uri: &AtUri) -> Result<Option<Recipe>> {
        uri.expect_kind(EntityKind::Recipe)?;
        if let Some(local) = self.store.get::<Recipe>(uri).await? {
            return Ok(Some(local));
        }
        if let Some(entry) = self.queue.get(uri).await? {
            if entry.operation == MutationOperation::Delete {
                return Ok(None);
            }
        }
        let Some(session) = self.sessions.session().await else {
            return Ok(None);
        };

        let Some(fetched) = self.remote.get_recipe(&session, uri).await? else {
            return Ok(None);
        };
        let recipe = Recipe::remote(uri.clone(), fetched.value, Some(fetched.cid), Utc::now());
        self.store.put(&recipe).await?;
        debug!("cached remote recipe");
        Ok(Some(recipe))
    }

    // ===== Recipes =====

    #[tracing::instrument(skip_all, fields(title = %record.title))]
    pub async fn create_recipe(&self, record: RecipeRecord) -> Result<Recipe> {
        record.validate()?;
        if record.is_fork() {
            return Err(ValidationFault::field("forkMetadata", "is only set by forking").into());
        }
        let session = self.session().await?;
        let uri = AtUri::mint(&session.did, EntityKind::Recipe)?;

        let recipe = Recipe::local(uri, record, Utc::now());
        self.queue
            .enqueue_and_put(
                MutationOperation::Create,
                EntityPayload::Recipe(recipe.record.clone()),
                &recipe,
            )
            .await?;
        info!(uri = %recipe.uri, "created recipe");
        Ok(recipe)
    }

    /// Replace a recipe's body. Forks are read-only.
    #[tracing::instrument(skip_all, fields(uri = %uri))]
    pub async fn update_recipe(&self, uri: &AtUri, record: RecipeRecord) -> Result<Recipe> {
        uri.expect_kind(EntityKind::Recipe)?;
        record.validate()?;
        let session = self.session().await?;
        ensure_owned(&session, uri)?;

        let existing = self
            .store
            .get::<Recipe>(uri)
            .await?
            .ok_or_else(|| unknown(uri))?;
        if existing.is_fork() || record.is_fork() {
            return Err(ValidationFault::ReadOnlyFork {
                uri: uri.to_string(),
            }
            .into());
        }

        let updated = Recipe {
            record,
            last_modified: Utc::now(),
            pending_sync: true,
            ..existing
        };
        // A record never pushed remotely keeps its create entry.
        self.queue
            .enqueue_and_put(
                MutationOperation::Update,
                EntityPayload::Recipe(updated.record.clone()),
                &updated,
            )
            .await?;
        Ok(updated)
    }

    /// Copy someone else's recipe into the owner's repository as a
    /// read-only fork.
    #[tracing::instrument(skip_all, fields(source = %source))]
    pub async fn fork_recipe(&self, source: &AtUri) -> Result<Recipe> {
        source.expect_kind(EntityKind::Recipe)?;
        let session = self.session().await?;
        if source.authority() == session.did {
            return Err(ValidationFault::field("source", "cannot fork a recipe you own").into());
        }

        let original = self
            .remote
            .get_recipe(&session, source)
            .await?
            .ok_or_else(|| RemoteFault::NotFound {
                uri: source.to_string(),
            })?;

        let now = Utc::now();
        let mut record = original.value;
        record.fork_metadata = Some(ForkMetadata {
            original_recipe_uri: source.clone(),
            original_author_did: source.authority().to_string(),
            forked_at: now,
        });
        record.validate()?;

        let uri = AtUri::mint(&session.did, EntityKind::Recipe)?;
        let fork = Recipe::local(uri, record, now);
        self.queue
            .enqueue_and_put(
                MutationOperation::Create,
                EntityPayload::Recipe(fork.record.clone()),
                &fork,
            )
            .await?;
        info!(uri = %fork.uri, "forked recipe");
        Ok(fork)
    }

    // ===== Collections =====

    #[tracing::instrument(skip(self, description))]
    pub async fn create_collection(
        &self,
        name: &str,
        description: Option<String>,
    ) -> Result<Collection> {
        let mut record = CollectionRecord::new(name, Utc::now());
        record.description = description;
        record.validate()?;
        let session = self.session().await?;
        let uri = AtUri::mint(&session.did, EntityKind::Collection)?;

        let collection = Collection::new(uri, record);
        self.queue
            .enqueue_and_put(
                MutationOperation::Create,
                EntityPayload::Collection(collection.record.clone()),
                &collection,
            )
            .await?;
        info!(uri = %collection.uri, "created collection");
        Ok(collection)
    }

    /// Apply a partial update. `updated_at` is always bumped.
    #[tracing::instrument(skip_all, fields(uri = %uri))]
    pub async fn update_collection(
        &self,
        uri: &AtUri,
        patch: CollectionPatch,
    ) -> Result<Collection> {
        let mut collection = self.owned_collection(uri).await?;
        patch.apply_to(&mut collection.record);
        collection.record.touch(Utc::now());
        self.save_collection(collection).await
    }

    /// Append a recipe. Adding an existing member is a no-op.
    #[tracing::instrument(skip_all, fields(collection = %collection, recipe = %recipe))]
    pub async fn add_to_collection(&self, collection: &AtUri, recipe: &AtUri) -> Result<Collection> {
        recipe.expect_kind(EntityKind::Recipe)?;
        let mut current = self.owned_collection(collection).await?;
        if current.contains(recipe) {
            return Ok(current);
        }
        current.record.recipe_uris.push(recipe.clone());
        current.record.touch(Utc::now());
        self.save_collection(current).await
    }

    /// Remove a recipe. Removing a non-member is a no-op.
    #[tracing::instrument(skip_all, fields(collection = %collection, recipe = %recipe))]
    pub async fn remove_from_collection(
        &self,
        collection: &AtUri,
        recipe: &AtUri,
    ) -> Result<Collection> {
        let current = self.owned_collection(collection).await?;
        match current.without_recipe(recipe, Utc::now()) {
            Some(updated) => self.save_collection(updated).await,
            None => Ok(current),
        }
    }

    /// Delete a collection locally and queue the remote delete. Returns
    /// whether a cached copy existed.
    #[tracing::instrument(skip_all, fields(uri = %uri))]
    pub async fn delete_collection(&self, uri: &AtUri) -> Result<bool> {
        uri.expect_kind(EntityKind::Collection)?;
        let session = self.session().await?;
        ensure_owned(&session, uri)?;

        self.queue.enqueue_delete::<Collection>(uri).await
    }

    async fn owned_collection(&self, uri: &AtUri) -> Result<Collection> {
        uri.expect_kind(EntityKind::Collection)?;
        let session = self.session().await?;
        ensure_owned(&session, uri)?;
        Ok(self
            .store
            .get::<Collection>(uri)
            .await?
            .ok_or_else(|| unknown(uri))?)
    }

    async fn save_collection(&self, collection: Collection) -> Result<Collection> {
        self.queue
            .enqueue_and_put(
                MutationOperation::Update,
                EntityPayload::Collection(collection.record.clone()),
                &collection,
            )
            .await?;
        Ok(collection)
    }
}

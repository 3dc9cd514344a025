//! Durable queue of local writes awaiting remote confirmation.
//!
//! Keyed by URI: enqueuing for a URI that already has an entry replaces it,
//! so the queue only ever holds the latest intent per record. Entries are
//! drained oldest-first.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pantry_api::{
    AtUri, EntityKind, EntityPayload, MutationOperation, PantryError, QueueEntry, Recipe,
    StoreFault,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::storage::held_changes::{apply_change, drop_all_held, take_held};
use crate::storage::local_store::{delete_row, fault, read_all_rows, read_row, write_row};
use crate::storage::{CachedEntity, LocalStore, RecordKind};

const TARGET: &str = RecordKind::PendingMutations.table_name();

type RawEntry = (String, String, i64, Option<String>);

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode(operation: &'static str, raw: RawEntry) -> Result<QueueEntry, StoreFault> {
    let (uri, op, timestamp_us, payload) = raw;
    let corrupt = |problem: String| StoreFault::new(operation, uri.clone(), problem);

    let parsed_uri = AtUri::parse(&uri).map_err(|e| StoreFault::new(operation, uri.clone(), e))?;
    let op = MutationOperation::parse(&op)
        .ok_or_else(|| corrupt(format!("unknown mutation operation '{op}'")))?;
    let timestamp = DateTime::from_timestamp_micros(timestamp_us)
        .ok_or_else(|| corrupt(format!("timestamp {timestamp_us} out of range")))?;
    let payload = payload
        .map(|p| serde_json::from_str::<EntityPayload>(&p))
        .transpose()
        .map_err(|e| StoreFault::new(operation, uri.clone(), e))?;

    QueueEntry::new(parsed_uri, op, payload, timestamp)
        .map_err(|e| StoreFault::new(operation, uri.clone(), e))
}

fn encode_payload(uri: &AtUri, payload: Option<&EntityPayload>) -> Result<Option<String>, StoreFault> {
    payload
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StoreFault::new("enqueue", uri.as_str(), e))
}

/// Write `entry` under its URI, replacing any existing entry, and return the
/// operation and timestamp actually stored.
///
/// With `keep_create`, an update to a URI whose create is still queued is
/// stored as a create: the record has never reached the remote store.
fn insert_entry(
    conn: &Connection,
    entry: &QueueEntry,
    payload_json: Option<String>,
    keep_create: bool,
) -> Result<(MutationOperation, i64), StoreFault> {
    let uri = &entry.uri;
    let (latest, queued_op): (Option<i64>, Option<String>) = conn
        .query_row(
            "SELECT (SELECT MAX(timestamp_us) FROM pending_mutations), \
                    (SELECT operation FROM pending_mutations WHERE uri = ?1)",
            params![uri.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(fault("enqueue", uri))?;

    let operation = match (entry.operation, queued_op.as_deref().and_then(MutationOperation::parse)) {
        (MutationOperation::Update, Some(MutationOperation::Create)) if keep_create => {
            MutationOperation::Create
        }
        (operation, _) => operation,
    };
    let now_us = entry.timestamp.timestamp_micros();
    let timestamp_us = match latest {
        Some(latest) if latest >= now_us => latest + 1,
        _ => now_us,
    };
    conn.execute(
        r#"
INSERT INTO pending_mutations (uri, operation, timestamp_us, payload) VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(uri) DO UPDATE SET
    operation = excluded.operation,
    timestamp_us = excluded.timestamp_us,
    payload = excluded.payload
"#,
        params![uri.as_str(), operation.as_str(), timestamp_us, payload_json],
    )
    .map_err(fault("enqueue", uri))?;
    Ok((operation, timestamp_us))
}

fn delete_entry(conn: &Connection, uri: &AtUri) -> Result<bool, StoreFault> {
    let removed = conn
        .execute("DELETE FROM pending_mutations WHERE uri = ?1", params![uri.as_str()])
        .map_err(fault("remove_pending", uri))?;
    Ok(removed > 0)
}

fn stored(entry: QueueEntry, operation: MutationOperation, timestamp_us: i64) -> QueueEntry {
    let timestamp = DateTime::from_timestamp_micros(timestamp_us).unwrap_or(entry.timestamp);
    debug!(%timestamp, %operation, "queued mutation");
    QueueEntry {
        operation,
        timestamp,
        ..entry
    }
}

/// How the remote store answered a drained entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Written remotely; `cid` is the new content id, if one was returned.
    Confirmed { cid: Option<String> },
    /// Permanently refused; the held remote change (if any) takes over.
    Rejected,
}

/// What `forget` removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Forgotten {
    pub record: bool,
    pub pending: bool,
}

#[derive(Debug, Clone)]
pub struct PendingMutationQueue {
    store: Arc<LocalStore>,
}

impl PendingMutationQueue {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Record a local write, replacing any entry already queued for the URI.
    ///
    /// The stored timestamp is strictly later than every timestamp already in
    /// the queue, so replacement always moves an entry to the back.
    #[tracing::instrument(skip_all, fields(uri = %uri, operation = %operation))]
    pub async fn enqueue(
        &self,
        uri: AtUri,
        operation: MutationOperation,
        payload: Option<EntityPayload>,
    ) -> Result<QueueEntry, PantryError> {
        if let Some(p) = &payload {
            p.validate()?;
        }
        let entry = QueueEntry::new(uri, operation, payload, Utc::now())?;
        let payload_json = encode_payload(&entry.uri, entry.payload.as_ref())?;

        let (operation, timestamp_us) = self
            .store
            .transact("enqueue", entry.uri.as_str(), |tx| {
                insert_entry(tx, &entry, payload_json, false)
            })
            .await?;
        Ok(stored(entry, operation, timestamp_us))
    }

    /// Queue a create or update and write the cached record in one
    /// transaction, so the record and its queue entry never disagree.
    ///
    /// An update of a record whose create is still queued stays a create.
    #[tracing::instrument(skip_all, fields(uri = %entity.uri(), operation = %operation))]
    pub async fn enqueue_and_put<E: CachedEntity>(
        &self,
        operation: MutationOperation,
        payload: EntityPayload,
        entity: &E,
    ) -> Result<QueueEntry, PantryError> {
        payload.validate()?;
        let entry = QueueEntry::new(entity.uri().clone(), operation, Some(payload), Utc::now())?;
        let payload_json = encode_payload(&entry.uri, entry.payload.as_ref())?;

        let (operation, timestamp_us) = self
            .store
            .transact("enqueue", entry.uri.as_str(), |tx| {
                let written = insert_entry(tx, &entry, payload_json, true)?;
                write_row(tx, "enqueue", entity)?;
                Ok::<_, StoreFault>(written)
            })
            .await?;
        Ok(stored(entry, operation, timestamp_us))
    }

    /// Delete the cached record and queue its remote delete in one
    /// transaction. A record whose create is still queued never reached the
    /// remote store, so its entry is simply dropped instead.
    ///
    /// Returns whether a cached record existed.
    #[tracing::instrument(skip_all, fields(uri = %uri))]
    pub async fn enqueue_delete<E: CachedEntity>(&self, uri: &AtUri) -> Result<bool, PantryError> {
        uri.expect_kind(E::KIND)?;
        let entry = QueueEntry::new(uri.clone(), MutationOperation::Delete, None, Utc::now())?;

        let existed = self
            .store
            .transact("enqueue_delete", uri.as_str(), |tx| {
                let queued: Option<String> = tx
                    .query_row(
                        "SELECT operation FROM pending_mutations WHERE uri = ?1",
                        params![uri.as_str()],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(fault("enqueue_delete", uri))?;
                if queued.as_deref().and_then(MutationOperation::parse) == Some(MutationOperation::Create) {
                    delete_entry(tx, uri)?;
                    take_held(tx, uri)?;
                } else {
                    insert_entry(tx, &entry, None, false)?;
                }
                delete_row(tx, "enqueue_delete", E::KIND, uri)
            })
            .await?;
        Ok(existed)
    }

    /// All entries, oldest first. Ties (which `enqueue` never produces) fall
    /// back to URI order.
    pub async fn list(&self) -> Result<Vec<QueueEntry>, StoreFault> {
        let raw: Vec<RawEntry> = self
            .store
            .with_conn(|conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT uri, operation, timestamp_us, payload FROM pending_mutations \
                         ORDER BY timestamp_us ASC, uri ASC",
                    )
                    .map_err(fault("list", TARGET))?;
                let rows = stmt
                    .query_map([], read_raw)
                    .map_err(fault("list", TARGET))?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(fault("list", TARGET));
                rows
            })
            .await?;

        raw.into_iter().map(|r| decode("list", r)).collect()
    }

    pub async fn get(&self, uri: &AtUri) -> Result<Option<QueueEntry>, StoreFault> {
        let raw: Option<RawEntry> = self
            .store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT uri, operation, timestamp_us, payload FROM pending_mutations WHERE uri = ?1",
                    params![uri.as_str()],
                    read_raw,
                )
                .optional()
                .map_err(fault("get_pending", uri))
            })
            .await?;

        raw.map(|r| decode("get_pending", r)).transpose()
    }

    pub async fn contains(&self, uri: &AtUri) -> Result<bool, StoreFault> {
        let found: Option<i64> = self
            .store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT 1 FROM pending_mutations WHERE uri = ?1",
                    params![uri.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(fault("contains_pending", uri))
            })
            .await?;
        Ok(found.is_some())
    }

    /// Drop the entry for `uri` along with any remote change held for it.
    /// Returns whether an entry existed.
    pub async fn remove(&self, uri: &AtUri) -> Result<bool, StoreFault> {
        self.store
            .transact("remove_pending", uri.as_str(), |tx| {
                let removed = delete_entry(tx, uri)?;
                take_held(tx, uri)?;
                Ok(removed)
            })
            .await
    }

    /// Delete the cached record, its queue entry and any held change in one
    /// transaction.
    pub async fn forget<E: CachedEntity>(&self, uri: &AtUri) -> Result<Forgotten, StoreFault> {
        self.store
            .transact("forget", uri.as_str(), |tx| {
                let record = delete_row(tx, "forget", E::KIND, uri)?;
                let pending = delete_entry(tx, uri)?;
                take_held(tx, uri)?;
                Ok(Forgotten { record, pending })
            })
            .await
    }

    /// Resolve a drained entry, but only if it is still the one observed at
    /// `entry.timestamp`. A newer local write replaces the entry while a
    /// drain is in flight; that newer entry (and any held change) survives
    /// and `false` is returned.
    ///
    /// Removing the entry, resolving its held remote change and updating the
    /// cached record commit together.
    #[tracing::instrument(skip_all, fields(uri = %entry.uri))]
    pub async fn settle(&self, entry: &QueueEntry, settlement: Settlement) -> Result<bool, StoreFault> {
        let uri = &entry.uri;
        let is_recipe = entry.kind() == Some(EntityKind::Recipe);
        self.store
            .transact("settle", uri.as_str(), |tx| {
                let removed = tx
                    .execute(
                        "DELETE FROM pending_mutations WHERE uri = ?1 AND timestamp_us = ?2",
                        params![uri.as_str(), entry.timestamp.timestamp_micros()],
                    )
                    .map_err(fault("settle", uri))?;
                if removed == 0 {
                    debug!("entry replaced while in flight; keeping newer entry");
                    return Ok(false);
                }

                let held = take_held(tx, uri)?;
                match (settlement, held) {
                    // Our write is now the remote state; anything held is stale.
                    (Settlement::Confirmed { cid }, _) => {
                        if is_recipe && entry.operation != MutationOperation::Delete {
                            if let Some(mut recipe) = read_row::<Recipe>(tx, "settle", uri)? {
                                recipe.pending_sync = false;
                                if cid.is_some() {
                                    recipe.cid = cid;
                                }
                                write_row(tx, "settle", &recipe)?;
                            }
                        }
                    }
                    (Settlement::Rejected, Some(event)) => {
                        debug!(cursor = %event.cursor, "applying held remote change");
                        apply_change(tx, "settle", &event.change, Utc::now())?;
                    }
                    (Settlement::Rejected, None) => {
                        if is_recipe {
                            if let Some(mut recipe) = read_row::<Recipe>(tx, "settle", uri)? {
                                recipe.pending_sync = false;
                                write_row(tx, "settle", &recipe)?;
                            }
                        }
                    }
                }
                Ok(true)
            })
            .await
    }

    /// Replace the payload of an existing entry in place, keeping its
    /// operation and queue position. Returns `false` when nothing is queued.
    pub async fn rewrite_payload(
        &self,
        uri: &AtUri,
        payload: EntityPayload,
    ) -> Result<bool, PantryError> {
        payload.validate()?;
        let Some(existing) = self.get(uri).await? else {
            return Ok(false);
        };
        // Re-run the entry checks against the new payload.
        QueueEntry::new(uri.clone(), existing.operation, Some(payload.clone()), existing.timestamp)?;

        let json = encode_payload(uri, Some(&payload))?;
        let updated = self
            .store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE pending_mutations SET payload = ?2 WHERE uri = ?1",
                    params![uri.as_str(), json],
                )
                .map_err(fault("rewrite_payload", uri))
            })
            .await?;
        Ok(updated > 0)
    }

    /// Empty the queue and discard every held remote change.
    pub async fn clear(&self) -> Result<usize, StoreFault> {
        let removed = self
            .store
            .transact("clear_pending", TARGET, |tx| {
                let removed = tx
                    .execute("DELETE FROM pending_mutations", [])
                    .map_err(fault("clear_pending", TARGET))?;
                drop_all_held(tx)?;
                Ok::<_, StoreFault>(removed)
            })
            .await?;
        info!(removed, "cleared pending mutation queue");
        Ok(removed)
    }

    pub async fn len(&self) -> Result<usize, StoreFault> {
        let count: i64 = self
            .store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM pending_mutations", [], |row| row.get(0))
                    .map_err(fault("count_pending", TARGET))
            })
            .await?;
        Ok(count.max(0) as usize)
    }

    pub async fn is_empty(&self) -> Result<bool, StoreFault> {
        Ok(self.len().await? == 0)
    }

    /// Bring every cached recipe's `pending_sync` flag in line with the
    /// queue. Returns the number of recipes corrected.
    pub async fn reconcile_pending_flags(&self) -> Result<usize, StoreFault> {
        let corrected = self
            .store
            .transact("reconcile_pending", TARGET, |tx| {
                let mut stmt = tx
                    .prepare("SELECT uri FROM pending_mutations")
                    .map_err(fault("reconcile_pending", TARGET))?;
                let queued: HashSet<String> = stmt
                    .query_map([], |row| row.get(0))
                    .map_err(fault("reconcile_pending", TARGET))?
                    .collect::<rusqlite::Result<_>>()
                    .map_err(fault("reconcile_pending", TARGET))?;
                drop(stmt);

                let mut corrected = 0;
                for mut recipe in read_all_rows::<Recipe>(tx, "reconcile_pending")? {
                    let should_be_pending = queued.contains(recipe.uri.as_str());
                    if recipe.pending_sync != should_be_pending {
                        recipe.pending_sync = should_be_pending;
                        write_row(tx, "reconcile_pending", &recipe)?;
                        corrected += 1;
                    }
                }
                Ok::<_, StoreFault>(corrected)
            })
            .await?;
        if corrected > 0 {
            info!(corrected, "reconciled pending_sync flags with queue");
        }
        Ok(corrected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantry_api::{Change, ChangeEvent, CollectionRecord, RecipeRecord, ValidationFault};

    fn recipe_uri(key: &str) -> AtUri {
        AtUri::parse(&format!("at://did:plc:alice/app.pantry.recipe/{key}")).unwrap()
    }

    fn recipe_payload(title: &str) -> Option<EntityPayload> {
        Some(EntityPayload::Recipe(RecipeRecord::new(title, 2)))
    }

    async fn queue() -> PendingMutationQueue {
        PendingMutationQueue::new(Arc::new(LocalStore::open_in_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn test_enqueue_overwrites_entry_for_same_uri() {
        let queue = queue().await;
        let uri = recipe_uri("r1");

        let first = queue
            .enqueue(uri.clone(), MutationOperation::Create, recipe_payload("v1"))
            .await
            .unwrap();
        let second = queue
            .enqueue(uri.clone(), MutationOperation::Update, recipe_payload("v2"))
            .await
            .unwrap();

        assert!(second.timestamp > first.timestamp);
        let entries = queue.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], second);
        assert_eq!(entries[0].operation, MutationOperation::Update);
    }

    #[tokio::test]
    async fn test_list_is_oldest_first() {
        let queue = queue().await;
        for key in ["c", "a", "b"] {
            queue
                .enqueue(recipe_uri(key), MutationOperation::Delete, None)
                .await
                .unwrap();
        }
        // Re-enqueueing "c" moves it to the back.
        queue
            .enqueue(recipe_uri("c"), MutationOperation::Delete, None)
            .await
            .unwrap();

        let keys: Vec<String> = queue
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.uri.record_key().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_malformed_entries() {
        let queue = queue().await;
        let err = queue
            .enqueue(recipe_uri("r1"), MutationOperation::Update, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PantryError::Validation(ValidationFault::InvalidMutation { .. })
        ));

        let err = queue
            .enqueue(recipe_uri("r1"), MutationOperation::Create, recipe_payload(""))
            .await
            .unwrap_err();
        assert!(matches!(err, PantryError::Validation(_)));
        assert!(queue.is_empty().await.unwrap());
    }

    fn remote_title(cursor: &str, key: &str, title: &str) -> ChangeEvent {
        ChangeEvent::new(
            cursor,
            Change::Upserted {
                uri: recipe_uri(key),
                cid: Some("remote-cid".to_string()),
                payload: EntityPayload::Recipe(RecipeRecord::new(title, 2)),
            },
        )
    }

    async fn queued_local(queue: &PendingMutationQueue, key: &str, title: &str) -> QueueEntry {
        let local = Recipe::local(recipe_uri(key), RecipeRecord::new(title, 2), Utc::now());
        queue
            .enqueue_and_put(MutationOperation::Create, EntityPayload::Recipe(local.record.clone()), &local)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_settle_keeps_newer_entry() {
        let queue = queue().await;
        let drained = queued_local(&queue, "r1", "v1").await;
        queued_local(&queue, "r1", "v2").await;

        let confirmed = Settlement::Confirmed { cid: Some("cid-1".into()) };
        assert!(!queue.settle(&drained, confirmed.clone()).await.unwrap());
        assert!(queue.contains(&drained.uri).await.unwrap());
        let cached: Recipe = queue.store().get(&drained.uri).await.unwrap().unwrap();
        assert!(cached.pending_sync);
        assert_eq!(cached.cid, None);

        let current = queue.get(&drained.uri).await.unwrap().unwrap();
        assert!(queue.settle(&current, confirmed).await.unwrap());
        assert!(!queue.contains(&drained.uri).await.unwrap());
        let cached: Recipe = queue.store().get(&drained.uri).await.unwrap().unwrap();
        assert!(!cached.pending_sync);
        assert_eq!(cached.cid.as_deref(), Some("cid-1"));
    }

    #[tokio::test]
    async fn test_settle_rejected_applies_held_change() {
        let queue = queue().await;
        let entry = queued_local(&queue, "r1", "Local").await;
        queue
            .store()
            .fold_change(&remote_title("c1", "r1", "Remote"), Utc::now())
            .await
            .unwrap();

        assert!(queue.settle(&entry, Settlement::Rejected).await.unwrap());
        let cached: Recipe = queue.store().get(&entry.uri).await.unwrap().unwrap();
        assert_eq!(cached.record.title, "Remote");
        assert_eq!(cached.cid.as_deref(), Some("remote-cid"));
        assert!(!cached.pending_sync);
        assert_eq!(queue.store().held_change_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_settle_confirmed_discards_held_change() {
        let queue = queue().await;
        let entry = queued_local(&queue, "r1", "Local").await;
        queue
            .store()
            .fold_change(&remote_title("c1", "r1", "Remote"), Utc::now())
            .await
            .unwrap();

        assert!(queue.settle(&entry, Settlement::Confirmed { cid: None }).await.unwrap());
        let cached: Recipe = queue.store().get(&entry.uri).await.unwrap().unwrap();
        assert_eq!(cached.record.title, "Local");
        assert!(!cached.pending_sync);
        assert_eq!(queue.store().held_change_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_of_queued_create_stays_create() {
        let queue = queue().await;
        queued_local(&queue, "r1", "v1").await;
        let edited = Recipe::local(recipe_uri("r1"), RecipeRecord::new("v2", 2), Utc::now());
        let entry = queue
            .enqueue_and_put(MutationOperation::Update, EntityPayload::Recipe(edited.record.clone()), &edited)
            .await
            .unwrap();

        assert_eq!(entry.operation, MutationOperation::Create);
        assert_eq!(queue.get(&edited.uri).await.unwrap().unwrap().operation, MutationOperation::Create);
        let cached: Recipe = queue.store().get(&edited.uri).await.unwrap().unwrap();
        assert_eq!(cached.record.title, "v2");
    }

    #[tokio::test]
    async fn test_enqueue_and_put_writes_nothing_when_invalid() {
        let queue = queue().await;
        let bad = Recipe::local(recipe_uri("r1"), RecipeRecord::new("", 2), Utc::now());
        assert!(queue
            .enqueue_and_put(MutationOperation::Create, EntityPayload::Recipe(bad.record.clone()), &bad)
            .await
            .is_err());
        assert!(queue.is_empty().await.unwrap());
        assert_eq!(queue.store().get::<Recipe>(&bad.uri).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_drops_held_change() {
        let queue = queue().await;
        let entry = queued_local(&queue, "r1", "Local").await;
        queue
            .store()
            .fold_change(&remote_title("c1", "r1", "Remote"), Utc::now())
            .await
            .unwrap();

        assert!(queue.remove(&entry.uri).await.unwrap());
        assert_eq!(queue.store().held_change_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_forget_removes_record_entry_and_held_change() {
        let queue = queue().await;
        let entry = queued_local(&queue, "r1", "Local").await;
        queue
            .store()
            .fold_change(&remote_title("c1", "r1", "Remote"), Utc::now())
            .await
            .unwrap();

        let forgotten = queue.forget::<Recipe>(&entry.uri).await.unwrap();
        assert_eq!(forgotten, Forgotten { record: true, pending: true });
        assert!(queue.is_empty().await.unwrap());
        assert_eq!(queue.store().held_change_count().await.unwrap(), 0);
        assert_eq!(queue.store().get::<Recipe>(&entry.uri).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_drops_every_held_change() {
        let queue = queue().await;
        for key in ["a", "b"] {
            queued_local(&queue, key, "Local").await;
        }
        let store = queue.store();
        store.fold_change(&remote_title("c1", "a", "Remote"), Utc::now()).await.unwrap();
        store.fold_change(&remote_title("c2", "b", "Remote"), Utc::now()).await.unwrap();
        assert_eq!(store.held_change_count().await.unwrap(), 2);

        assert_eq!(queue.clear().await.unwrap(), 2);
        assert_eq!(store.held_change_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rewrite_payload_keeps_position() {
        let queue = queue().await;
        let collection = AtUri::parse("at://did:plc:alice/app.pantry.collection/c1").unwrap();
        let mut record = CollectionRecord::new("Bakes", Utc::now());
        record.recipe_uris = vec![recipe_uri("a")];
        let queued = queue
            .enqueue(
                collection.clone(),
                MutationOperation::Create,
                Some(EntityPayload::Collection(record.clone())),
            )
            .await
            .unwrap();

        record.recipe_uris.clear();
        assert!(queue
            .rewrite_payload(&collection, EntityPayload::Collection(record.clone()))
            .await
            .unwrap());

        let entry = queue.get(&collection).await.unwrap().unwrap();
        assert_eq!(entry.timestamp, queued.timestamp);
        assert_eq!(entry.payload, Some(EntityPayload::Collection(record)));

        assert!(!queue
            .rewrite_payload(&recipe_uri("none"), EntityPayload::Recipe(RecipeRecord::new("x", 1)))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_reconcile_pending_flags() {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        let queue = PendingMutationQueue::new(store.clone());

        let orphan = Recipe::local(recipe_uri("orphan"), RecipeRecord::new("Soup", 1), Utc::now());
        store.put(&orphan).await.unwrap();
        let mut unflagged =
            Recipe::remote(recipe_uri("queued"), RecipeRecord::new("Stew", 1), None, Utc::now());
        unflagged.pending_sync = false;
        store.put(&unflagged).await.unwrap();
        queue
            .enqueue(unflagged.uri.clone(), MutationOperation::Delete, None)
            .await
            .unwrap();

        assert_eq!(queue.reconcile_pending_flags().await.unwrap(), 2);
        let orphan: Recipe = store.get(&orphan.uri).await.unwrap().unwrap();
        let queued: Recipe = store.get(&unflagged.uri).await.unwrap().unwrap();
        assert!(!orphan.pending_sync);
        assert!(queued.pending_sync);
        assert_eq!(queue.reconcile_pending_flags().await.unwrap(), 0);
    }
}

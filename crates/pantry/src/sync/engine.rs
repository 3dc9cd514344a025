//! Sync engine
//!
//! Folds the remote change stream into the local cache and pushes queued
//! local writes back to the remote store. Conflict rule: while a URI has a
//! pending local mutation the local copy wins, and the incoming remote event
//! is held back in the store. The held event is discarded once the local
//! write is confirmed, or applied if the remote store permanently rejects it.
//!
//! Lifecycle: `idle -> syncing <-> paused`, with `error` reported as a
//! transient state on the way back to `idle` after a stream or store fault.
//! The consumer task runs until `stop`/`pause` (or a fault); dropping the
//! engine handle does not stop it.

use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock as StdRwLock};

use chrono::Utc;
use futures::StreamExt;
use pantry_api::{
    AtUri, Change, ChangeEvent, CollectionPatch, Cursor, EntityKind, EntityPayload, HostSignals,
    MutationOperation, PantryError, QueueEntry, RemoteFault, Result, StatusSnapshot,
    StatusTransition, SubscriptionFault, SyncStatus,
};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::remote::{
    require_session, ChangeStream, RemoteChangeStream, RemoteRecordStore, Session,
    SessionProvider, WriteAck,
};
use crate::core::{PendingMutationQueue, Settlement};
use crate::storage::held_changes::Folded;
use crate::storage::LocalStore;

/// Behaviour toggles for host signal handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Drain the pending queue whenever connectivity is (re)gained.
    pub drain_on_reconnect: bool,
    /// Resume a paused engine when the host returns to the foreground.
    pub resume_on_foreground: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            drain_on_reconnect: true,
            resume_on_foreground: true,
        }
    }
}

/// Everything the engine needs from the outside world.
pub struct SyncEngineDeps {
    pub store: Arc<LocalStore>,
    pub remote: Arc<dyn RemoteRecordStore>,
    pub changes: Arc<dyn RemoteChangeStream>,
    pub sessions: Arc<dyn SessionProvider>,
}

/// What happened to one remote change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// Written to (or removed from) the local cache.
    Applied,
    /// Held back because the URI has a pending local mutation.
    Deferred,
    /// Ignored: the event does not describe a record kind we cache.
    Skipped,
}

/// Per-entry results of one drain pass.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Confirmed by the remote store and removed from the queue.
    pub synced: Vec<AtUri>,
    /// Permanently refused; the entry was dropped and the remote state kept.
    pub rejected: Vec<(AtUri, RemoteFault)>,
    /// Still queued; will be retried on the next drain.
    pub failed: Vec<(AtUri, PantryError)>,
}

impl DrainReport {
    pub fn attempted(&self) -> usize {
        self.synced.len() + self.rejected.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.failed.is_empty()
    }
}

/// Receives engine status changes. Called synchronously from whichever task
/// caused the change, so implementations must not block.
pub trait SyncObserver: Send + Sync {
    fn on_status_changed(&self, transition: &StatusTransition);

    fn on_drain_finished(&self, _report: &DrainReport) {}
}

struct ConsumerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ConsumerTask {
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!("change consumer task panicked: {e}");
            }
        }
    }
}

struct EngineInner {
    store: Arc<LocalStore>,
    queue: PendingMutationQueue,
    remote: Arc<dyn RemoteRecordStore>,
    changes: Arc<dyn RemoteChangeStream>,
    sessions: Arc<dyn SessionProvider>,
    options: SyncOptions,
    status_tx: watch::Sender<SyncStatus>,
    progress_tx: watch::Sender<Option<Cursor>>,
    last_error: StdMutex<Option<String>>,
    observers: StdRwLock<Vec<Arc<dyn SyncObserver>>>,
    /// Held for every lifecycle call; owns the running consumer.
    consumer: Mutex<Option<ConsumerTask>>,
    drain_lock: Mutex<()>,
}

#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.current_state())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl SyncEngine {
    pub fn new(deps: SyncEngineDeps) -> Self {
        Self::with_options(deps, SyncOptions::default())
    }

    pub fn with_options(deps: SyncEngineDeps, options: SyncOptions) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::Idle);
        let (progress_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(EngineInner {
                queue: PendingMutationQueue::new(deps.store.clone()),
                store: deps.store,
                remote: deps.remote,
                changes: deps.changes,
                sessions: deps.sessions,
                options,
                status_tx,
                progress_tx,
                last_error: StdMutex::new(None),
                observers: StdRwLock::new(Vec::new()),
                consumer: Mutex::new(None),
                drain_lock: Mutex::new(()),
            }),
        }
    }

    pub fn queue(&self) -> &PendingMutationQueue {
        &self.inner.queue
    }

    pub fn current_state(&self) -> SyncStatus {
        *self.inner.status_tx.borrow()
    }

    /// Watch channel that always holds the current state.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Watch channel holding the cursor of the last folded event.
    pub fn subscribe_progress(&self) -> watch::Receiver<Option<Cursor>> {
        self.inner.progress_tx.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn SyncObserver>) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        let sync_state = self.inner.store.load_sync_state().await?;
        let pending_mutations = self.inner.queue.len().await?;
        let last_error = self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(StatusSnapshot {
            state: self.current_state(),
            last_cursor: sync_state.last_cursor,
            last_sync_at: sync_state.last_sync_at,
            pending_mutations,
            last_error,
        })
    }

    /// Number of remote events currently held back by pending local writes.
    pub async fn deferred_count(&self) -> Result<usize> {
        Ok(self.inner.store.held_change_count().await?)
    }

    fn transition(&self, to: SyncStatus, reason: Option<String>) {
        let from = self.inner.status_tx.send_replace(to);
        if from == to {
            return;
        }
        info!(%from, %to, reason = reason.as_deref().unwrap_or(""), "sync status changed");

        let transition = StatusTransition { from, to, reason };
        let observers = self
            .inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.on_status_changed(&transition);
        }
    }

    /// Report a fault: surface `error`, then settle in `idle`.
    fn fail(&self, reason: String) {
        error!(%reason, "sync engine fault");
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.clone());
        self.transition(SyncStatus::Error, Some(reason.clone()));
        self.transition(SyncStatus::Idle, Some(reason));
    }

    /// Open the change stream from the persisted cursor and start consuming.
    ///
    /// Only valid from `idle`. If the stream cannot be opened the engine
    /// reports `error` and returns to `idle`.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let mut consumer = self.inner.consumer.lock().await;
        let state = self.current_state();
        if state != SyncStatus::Idle {
            return Err(PantryError::InvalidTransition {
                action: "start",
                state,
            });
        }
        self.open_stream(&mut consumer).await
    }

    /// Stop consuming without losing the cursor. A no-op unless syncing.
    #[tracing::instrument(skip(self))]
    pub async fn pause(&self) -> Result<()> {
        let mut consumer = self.inner.consumer.lock().await;
        if self.current_state() != SyncStatus::Syncing {
            return Ok(());
        }
        if let Some(task) = consumer.take() {
            task.shutdown().await;
        }
        // The consumer may have faulted to idle while we waited for it.
        if self.current_state() == SyncStatus::Syncing {
            self.transition(SyncStatus::Paused, None);
        }
        Ok(())
    }

    /// Resubscribe from the last persisted cursor.
    ///
    /// Works from `paused`, and from `idle` as the retry path after a fault.
    /// A no-op while already syncing.
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self) -> Result<()> {
        let mut consumer = self.inner.consumer.lock().await;
        if self.current_state() == SyncStatus::Syncing {
            return Ok(());
        }
        self.open_stream(&mut consumer).await
    }

    /// Cancel consumption and return to `idle` from any state.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        let mut consumer = self.inner.consumer.lock().await;
        if let Some(task) = consumer.take() {
            task.shutdown().await;
        }
        self.transition(SyncStatus::Idle, None);
        Ok(())
    }

    async fn open_stream(&self, slot: &mut Option<ConsumerTask>) -> Result<()> {
        // A consumer that ended on its own (fault) is still parked here.
        if let Some(stale) = slot.take() {
            stale.shutdown().await;
        }

        self.transition(SyncStatus::Syncing, None);
        let stream = match self.subscribe().await {
            Ok(stream) => stream,
            Err(err) => {
                self.fail(err.to_string());
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.clone().run_consumer(stream, cancel.clone()));
        *slot = Some(ConsumerTask { cancel, handle });
        Ok(())
    }

    async fn subscribe(&self) -> Result<ChangeStream> {
        let session = self
            .inner
            .sessions
            .session()
            .await
            .ok_or(SubscriptionFault::Unauthenticated)?;
        self.inner.queue.reconcile_pending_flags().await?;
        let position = self.inner.store.load_sync_state().await?.position();
        info!(?position, "opening change stream");
        Ok(self.inner.changes.subscribe(&session, position).await?)
    }

    async fn run_consumer(self, mut stream: ChangeStream, cancel: CancellationToken) {
        debug!("change consumer started");
        loop {
            // Cancellation is only observed between events, so a change is
            // never half-applied.
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("change consumer cancelled");
                    return;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    if let Err(err) = self.apply_event(event).await {
                        self.fail(format!("failed to apply remote change: {err}"));
                        return;
                    }
                }
                Some(Err(fault)) => {
                    self.fail(fault.to_string());
                    return;
                }
                None => {
                    let fault = SubscriptionFault::Disconnected {
                        message: "change stream ended".to_string(),
                    };
                    self.fail(fault.to_string());
                    return;
                }
            }
        }
    }

    /// Fold one remote event into the cache and advance the cursor.
    ///
    /// The cursor is persisted in the same transaction as the local write,
    /// so a failed event is redelivered on the next subscription.
    #[tracing::instrument(skip_all, fields(cursor = %event.cursor, uri = %event.change.uri()))]
    pub async fn apply_event(&self, event: ChangeEvent) -> Result<FoldOutcome> {
        let now = Utc::now();
        let outcome = if !is_well_formed(&event.change) {
            warn!("skipping change for an unsupported or mismatched record kind");
            self.inner.store.advance_cursor(&event.cursor, now).await?;
            FoldOutcome::Skipped
        } else {
            match self.inner.store.fold_change(&event, now).await? {
                Folded::Applied => FoldOutcome::Applied,
                Folded::Held => {
                    debug!("local mutation pending; holding remote change");
                    FoldOutcome::Deferred
                }
            }
        };

        self.inner.progress_tx.send_replace(Some(event.cursor));
        Ok(outcome)
    }

    /// Push every queued mutation to the remote store, oldest first.
    ///
    /// Transient failures leave entries queued; permanent rejections drop
    /// the entry and restore the remote state.
    #[tracing::instrument(skip(self))]
    pub async fn drain_pending(&self) -> Result<DrainReport> {
        let _drain = self.inner.drain_lock.lock().await;
        let session = require_session(self.inner.sessions.as_ref()).await?;
        let entries = self.inner.queue.list().await?;

        let mut report = DrainReport::default();
        if entries.is_empty() {
            return Ok(report);
        }
        info!(count = entries.len(), "draining pending mutations");

        for entry in entries {
            let uri = entry.uri.clone();
            match self.push_entry(&session, &entry).await {
                Ok(ack) => match self.confirm(&entry, ack).await {
                    Ok(()) => report.synced.push(uri),
                    Err(err) => report.failed.push((uri, err)),
                },
                Err(fault) if fault.is_permanent() => {
                    warn!(%uri, %fault, "remote store rejected mutation; dropping it");
                    match self.discard_rejected(&entry).await {
                        Ok(()) => report.rejected.push((uri, fault)),
                        Err(err) => report.failed.push((uri, err)),
                    }
                }
                Err(fault) => {
                    warn!(%uri, %fault, "mutation not synced; will retry");
                    report.failed.push((uri, fault.into()));
                }
            }
        }

        info!(
            synced = report.synced.len(),
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            "drain finished"
        );
        let observers = self
            .inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.on_drain_finished(&report);
        }
        Ok(report)
    }

    async fn push_entry(
        &self,
        session: &Session,
        entry: &QueueEntry,
    ) -> std::result::Result<Option<WriteAck>, RemoteFault> {
        let remote = self.inner.remote.as_ref();
        let uri = &entry.uri;
        match (entry.operation, &entry.payload) {
            (MutationOperation::Create, Some(EntityPayload::Recipe(record))) => {
                remote.create_recipe(session, uri, record).await.map(Some)
            }
            (MutationOperation::Update, Some(EntityPayload::Recipe(record))) => {
                match remote.update_recipe(session, uri, record).await {
                    // Deleted remotely while edited here: the local edit wins.
                    Err(RemoteFault::NotFound { .. }) => {
                        remote.create_recipe(session, uri, record).await.map(Some)
                    }
                    other => other.map(Some),
                }
            }
            (MutationOperation::Create, Some(EntityPayload::Collection(record))) => {
                remote.create_collection(session, uri, record).await.map(Some)
            }
            (MutationOperation::Update, Some(EntityPayload::Collection(record))) => {
                match remote
                    .update_collection(session, uri, &CollectionPatch::full(record))
                    .await
                {
                    Err(RemoteFault::NotFound { .. }) => {
                        remote.create_collection(session, uri, record).await.map(Some)
                    }
                    other => other.map(Some),
                }
            }
            (MutationOperation::Delete, None) => {
                let deleted = match entry.kind() {
                    Some(EntityKind::Recipe) => remote.delete_recipe(session, uri).await,
                    Some(EntityKind::Collection) => remote.delete_collection(session, uri).await,
                    None => Ok(()),
                };
                match deleted {
                    Ok(()) | Err(RemoteFault::NotFound { .. }) => Ok(None),
                    Err(fault) => Err(fault),
                }
            }
            _ => Err(RemoteFault::Rejected {
                uri: uri.to_string(),
                message: "queue entry payload does not match its operation".to_string(),
            }),
        }
    }

    async fn confirm(&self, entry: &QueueEntry, ack: Option<WriteAck>) -> Result<()> {
        let cid = ack.map(|a| a.cid);
        self.inner
            .queue
            .settle(entry, Settlement::Confirmed { cid })
            .await?;
        Ok(())
    }

    async fn discard_rejected(&self, entry: &QueueEntry) -> Result<()> {
        self.inner.queue.settle(entry, Settlement::Rejected).await?;
        Ok(())
    }

    /// React to connectivity and visibility changes.
    ///
    /// Losing either pauses the engine. Regaining both resumes a paused
    /// engine and drains the queue, per [`SyncOptions`]. An engine that fell
    /// back to idle after a fault is left for the host to restart.
    #[tracing::instrument(skip(self))]
    pub async fn apply_signals(&self, signals: HostSignals) -> Result<Option<DrainReport>> {
        if !signals.allows_sync() {
            self.pause().await?;
            return Ok(None);
        }

        if self.current_state() == SyncStatus::Paused && self.inner.options.resume_on_foreground {
            self.resume().await?;
        }

        if self.inner.options.drain_on_reconnect && self.inner.sessions.is_authenticated().await {
            return self.drain_pending().await.map(Some);
        }
        Ok(None)
    }
}

fn is_well_formed(change: &Change) -> bool {
    match (change.uri().kind(), change) {
        (None, _) => false,
        (Some(kind), Change::Upserted { payload, .. }) => payload.kind() == kind,
        (Some(_), Change::Deleted { .. }) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local_store::fault;
    use crate::testing::{fixtures, wait_for_cursor, wait_for_status, TestHarness};
    use pantry_api::{Recipe, RecipeRecord, StreamPosition};

    #[derive(Default)]
    struct Recorder(StdMutex<Vec<(SyncStatus, SyncStatus)>>);

    impl SyncObserver for Recorder {
        fn on_status_changed(&self, transition: &StatusTransition) {
            self.0.lock().unwrap().push((transition.from, transition.to));
        }
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid() {
        let h = TestHarness::new().await;
        h.engine.start().await.unwrap();
        let err = h.engine.start().await.unwrap_err();
        assert!(matches!(
            err,
            PantryError::InvalidTransition {
                action: "start",
                state: SyncStatus::Syncing
            }
        ));
        h.engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_unauthenticated_reverts_to_idle() {
        let h = TestHarness::new().await;
        let recorder = Arc::new(Recorder::default());
        h.engine.add_observer(recorder.clone());
        h.sessions.sign_out();

        let err = h.engine.start().await.unwrap_err();
        assert!(matches!(
            err,
            PantryError::Subscription(SubscriptionFault::Unauthenticated)
        ));
        assert_eq!(h.engine.current_state(), SyncStatus::Idle);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                (SyncStatus::Idle, SyncStatus::Syncing),
                (SyncStatus::Syncing, SyncStatus::Error),
                (SyncStatus::Error, SyncStatus::Idle),
            ]
        );
        assert!(h.engine.status().await.unwrap().last_error.is_some());
    }

    #[tokio::test]
    async fn test_pause_and_stop_are_safe_when_idle() {
        let h = TestHarness::new().await;
        h.engine.pause().await.unwrap();
        assert_eq!(h.engine.current_state(), SyncStatus::Idle);
        h.engine.stop().await.unwrap();
        assert_eq!(h.engine.current_state(), SyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_deferred_event_is_discarded_after_successful_drain() {
        let h = TestHarness::new().await;
        let uri = fixtures::recipe_uri("r1");
        h.engine
            .queue()
            .enqueue(
                uri.clone(),
                MutationOperation::Create,
                Some(EntityPayload::Recipe(RecipeRecord::new("Local", 2))),
            )
            .await
            .unwrap();
        h.store
            .put(&Recipe::local(uri.clone(), RecipeRecord::new("Local", 2), Utc::now()))
            .await
            .unwrap();

        let event = ChangeEvent::new(
            "c1",
            Change::Upserted {
                uri: uri.clone(),
                cid: Some("remote-cid".into()),
                payload: EntityPayload::Recipe(RecipeRecord::new("Remote", 2)),
            },
        );
        assert_eq!(h.engine.apply_event(event).await.unwrap(), FoldOutcome::Deferred);
        assert_eq!(h.engine.deferred_count().await.unwrap(), 1);

        let report = h.engine.drain_pending().await.unwrap();
        assert_eq!(report.synced, vec![uri.clone()]);
        assert_eq!(h.engine.deferred_count().await.unwrap(), 0);

        let local: Recipe = h.store.get(&uri).await.unwrap().unwrap();
        assert_eq!(local.record.title, "Local");
        assert!(!local.pending_sync);
        assert!(local.cid.is_some());
    }

    #[tokio::test]
    async fn test_rejected_mutation_restores_held_remote_snapshot() {
        let h = TestHarness::new().await;
        let uri = fixtures::recipe_uri("r1");
        h.engine
            .queue()
            .enqueue(
                uri.clone(),
                MutationOperation::Update,
                Some(EntityPayload::Recipe(RecipeRecord::new("Local", 2))),
            )
            .await
            .unwrap();
        h.store
            .put(&Recipe::local(uri.clone(), RecipeRecord::new("Local", 2), Utc::now()))
            .await
            .unwrap();
        h.engine
            .apply_event(ChangeEvent::new(
                "c1",
                Change::Upserted {
                    uri: uri.clone(),
                    cid: Some("remote-cid".into()),
                    payload: EntityPayload::Recipe(RecipeRecord::new("Remote", 4)),
                },
            ))
            .await
            .unwrap();
        h.remote.reject_writes_to(&uri, "record schema violation");

        let report = h.engine.drain_pending().await.unwrap();
        assert_eq!(report.rejected.len(), 1);
        assert!(report.synced.is_empty());
        assert!(!h.engine.queue().contains(&uri).await.unwrap());

        let local: Recipe = h.store.get(&uri).await.unwrap().unwrap();
        assert_eq!(local.record.title, "Remote");
        assert_eq!(local.cid.as_deref(), Some("remote-cid"));
        assert!(!local.pending_sync);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_entry_queued() {
        let h = TestHarness::new().await;
        let uri = fixtures::recipe_uri("r1");
        h.engine
            .queue()
            .enqueue(
                uri.clone(),
                MutationOperation::Create,
                Some(EntityPayload::Recipe(RecipeRecord::new("Soup", 2))),
            )
            .await
            .unwrap();
        h.remote.set_offline(true);

        let report = h.engine.drain_pending().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            report.failed[0].1,
            PantryError::Remote(RemoteFault::Network { .. })
        ));
        assert!(h.engine.queue().contains(&uri).await.unwrap());

        h.remote.set_offline(false);
        let report = h.engine.drain_pending().await.unwrap();
        assert_eq!(report.synced, vec![uri.clone()]);
        assert!(h.engine.queue().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_store_fault_while_folding_goes_idle_without_advancing() {
        let h = TestHarness::new().await;
        h.engine.start().await.unwrap();

        h.remote
            .publish_upsert(
                &fixtures::recipe_uri("r1"),
                EntityPayload::Recipe(RecipeRecord::new("First", 1)),
            );
        wait_for_cursor(&h.engine, "c1").await;

        h.store
            .with_conn(|conn| {
                conn.execute_batch("DROP TABLE recipes")
                    .map_err(fault("test_drop", "recipes"))
            })
            .await
            .unwrap();
        h.remote
            .publish_upsert(
                &fixtures::recipe_uri("r2"),
                EntityPayload::Recipe(RecipeRecord::new("Second", 1)),
            );

        wait_for_status(&h.engine, SyncStatus::Idle).await;
        let state = h.store.load_sync_state().await.unwrap();
        assert_eq!(state.last_cursor, Some(Cursor::new("c1")));
        assert_eq!(state.position(), StreamPosition::After(Cursor::new("c1")));
    }

    #[tokio::test]
    async fn test_signals_pause_resume_and_drain() {
        let h = TestHarness::new().await;
        h.engine.start().await.unwrap();

        assert!(h
            .engine
            .apply_signals(HostSignals::new(false, true))
            .await
            .unwrap()
            .is_none());
        assert_eq!(h.engine.current_state(), SyncStatus::Paused);

        let uri = fixtures::recipe_uri("offline");
        h.engine
            .queue()
            .enqueue(
                uri.clone(),
                MutationOperation::Create,
                Some(EntityPayload::Recipe(RecipeRecord::new("Offline Soup", 2))),
            )
            .await
            .unwrap();

        let report = h
            .engine
            .apply_signals(HostSignals::new(true, true))
            .await
            .unwrap()
            .expect("drain runs on reconnect");
        assert_eq!(report.synced, vec![uri]);
        assert_eq!(h.engine.current_state(), SyncStatus::Syncing);
        h.engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_signals_do_not_restart_engine_after_fault() {
        let h = TestHarness::new().await;
        h.engine.start().await.unwrap();
        h.remote.disconnect_streams("connection reset");
        wait_for_status(&h.engine, SyncStatus::Idle).await;

        h.engine
            .apply_signals(HostSignals::new(true, true))
            .await
            .unwrap();
        assert_eq!(h.engine.current_state(), SyncStatus::Idle);

        // Manual retry resumes from idle.
        h.engine.resume().await.unwrap();
        assert_eq!(h.engine.current_state(), SyncStatus::Syncing);
        h.engine.stop().await.unwrap();
    }
}

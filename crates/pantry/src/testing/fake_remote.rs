//! In-memory stand-in for the remote record store and its change feed.
//!
//! Every change published through the fake is appended to an ordered log
//! with cursors `c1`, `c2`, ... and broadcast to open subscriptions, so
//! resuming from a cursor replays exactly the events after it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use pantry_api::{
    AtUri, Change, ChangeEvent, CollectionPatch, CollectionRecord, Cursor, EntityPayload,
    RecipeRecord, RemoteFault, StreamPosition, SubscriptionFault,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::sync::{
    ChangeStream, RemoteChangeStream, RemoteRecord, RemoteRecordStore, Session, WriteAck,
};

const LIVE_CAPACITY: usize = 1024;

/// A call made against the fake, recorded in order for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    CreateRecipe(AtUri),
    GetRecipe(AtUri),
    UpdateRecipe(AtUri),
    DeleteRecipe(AtUri),
    CreateCollection(AtUri),
    GetCollection(AtUri),
    UpdateCollection(AtUri),
    DeleteCollection(AtUri),
}

#[derive(Debug, Clone)]
enum LiveItem {
    Event(ChangeEvent),
    Disconnect(String),
}

#[derive(Default)]
struct FakeState {
    recipes: BTreeMap<AtUri, (RecipeRecord, String)>,
    collections: BTreeMap<AtUri, (CollectionRecord, String)>,
    log: Vec<ChangeEvent>,
    calls: Vec<RemoteCall>,
    rejected: HashMap<AtUri, String>,
    subscribe_fault: Option<SubscriptionFault>,
    offline: bool,
    echo_writes: bool,
    next_cid: u64,
}

impl FakeState {
    fn mint_cid(&mut self) -> String {
        self.next_cid += 1;
        format!("bafyfake{:08}", self.next_cid)
    }
}

pub struct FakeRemote {
    state: Mutex<FakeState>,
    live_tx: broadcast::Sender<LiveItem>,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemote {
    pub fn new() -> Self {
        let (live_tx, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            state: Mutex::new(FakeState::default()),
            live_tx,
        }
    }

    /// Also publish our own writes on the change feed, the way a real
    /// repository firehose does.
    pub fn with_echo(self) -> Self {
        self.lock().echo_writes = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append to the log and notify live subscribers. Must be called with
    /// the state lock held so subscriptions never miss or repeat an event.
    fn emit(&self, state: &mut FakeState, change: Change) -> Cursor {
        let cursor = Cursor::new(format!("c{}", state.log.len() + 1));
        let event = ChangeEvent::new(cursor.clone(), change);
        state.log.push(event.clone());
        // No receivers is fine; the event stays in the log for replay.
        let _ = self.live_tx.send(LiveItem::Event(event));
        cursor
    }

    fn check_write(&self, state: &FakeState, uri: &AtUri) -> Result<(), RemoteFault> {
        if state.offline {
            return Err(RemoteFault::Network {
                message: "network unreachable".to_string(),
            });
        }
        if let Some(message) = state.rejected.get(uri) {
            return Err(RemoteFault::Rejected {
                uri: uri.to_string(),
                message: message.clone(),
            });
        }
        Ok(())
    }

    // ---- test controls ----

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Permanently reject every write to `uri`.
    pub fn reject_writes_to(&self, uri: &AtUri, message: &str) {
        self.lock().rejected.insert(uri.clone(), message.to_string());
    }

    /// Make the next subscriptions fail with `fault` until cleared.
    pub fn fail_subscriptions(&self, fault: Option<SubscriptionFault>) {
        self.lock().subscribe_fault = fault;
    }

    /// Terminate every open change stream with a disconnect error.
    pub fn disconnect_streams(&self, message: &str) {
        let _ = self.live_tx.send(LiveItem::Disconnect(message.to_string()));
    }

    /// Place a recipe in the remote repository without announcing it.
    pub fn seed_recipe(&self, uri: &AtUri, record: RecipeRecord) -> String {
        let mut state = self.lock();
        let cid = state.mint_cid();
        state.recipes.insert(uri.clone(), (record, cid.clone()));
        cid
    }

    pub fn seed_collection(&self, uri: &AtUri, record: CollectionRecord) -> String {
        let mut state = self.lock();
        let cid = state.mint_cid();
        state.collections.insert(uri.clone(), (record, cid.clone()));
        cid
    }

    /// Simulate another device writing a record.
    pub fn publish_upsert(&self, uri: &AtUri, payload: EntityPayload) -> Cursor {
        let mut state = self.lock();
        let cid = state.mint_cid();
        match &payload {
            EntityPayload::Recipe(record) => {
                state.recipes.insert(uri.clone(), (record.clone(), cid.clone()));
            }
            EntityPayload::Collection(record) => {
                state
                    .collections
                    .insert(uri.clone(), (record.clone(), cid.clone()));
            }
        }
        self.emit(
            &mut state,
            Change::Upserted {
                uri: uri.clone(),
                cid: Some(cid),
                payload,
            },
        )
    }

    /// Simulate another device deleting a record.
    pub fn publish_delete(&self, uri: &AtUri) -> Cursor {
        let mut state = self.lock();
        state.recipes.remove(uri);
        state.collections.remove(uri);
        self.emit(&mut state, Change::Deleted { uri: uri.clone() })
    }

    // ---- inspection ----

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn recipe(&self, uri: &AtUri) -> Option<RecipeRecord> {
        self.lock().recipes.get(uri).map(|(r, _)| r.clone())
    }

    pub fn collection(&self, uri: &AtUri) -> Option<CollectionRecord> {
        self.lock().collections.get(uri).map(|(c, _)| c.clone())
    }

    pub fn event_count(&self) -> usize {
        self.lock().log.len()
    }

    fn write_recipe(
        &self,
        call: RemoteCall,
        uri: &AtUri,
        record: &RecipeRecord,
        must_exist: bool,
    ) -> Result<WriteAck, RemoteFault> {
        let mut state = self.lock();
        state.calls.push(call);
        self.check_write(&state, uri)?;
        if must_exist && !state.recipes.contains_key(uri) {
            return Err(RemoteFault::NotFound { uri: uri.to_string() });
        }
        let cid = state.mint_cid();
        state.recipes.insert(uri.clone(), (record.clone(), cid.clone()));
        if state.echo_writes {
            self.emit(
                &mut state,
                Change::Upserted {
                    uri: uri.clone(),
                    cid: Some(cid.clone()),
                    payload: EntityPayload::Recipe(record.clone()),
                },
            );
        }
        Ok(WriteAck { uri: uri.clone(), cid })
    }

    fn write_collection(&self, uri: &AtUri, record: CollectionRecord) -> Result<WriteAck, RemoteFault> {
        let mut state = self.lock();
        let cid = state.mint_cid();
        state.collections.insert(uri.clone(), (record.clone(), cid.clone()));
        if state.echo_writes {
            self.emit(
                &mut state,
                Change::Upserted {
                    uri: uri.clone(),
                    cid: Some(cid.clone()),
                    payload: EntityPayload::Collection(record),
                },
            );
        }
        Ok(WriteAck { uri: uri.clone(), cid })
    }

    fn delete(&self, call: RemoteCall, uri: &AtUri) -> Result<(), RemoteFault> {
        let mut state = self.lock();
        let is_recipe = matches!(call, RemoteCall::DeleteRecipe(_));
        state.calls.push(call);
        self.check_write(&state, uri)?;
        let existed = if is_recipe {
            state.recipes.remove(uri).is_some()
        } else {
            state.collections.remove(uri).is_some()
        };
        if !existed {
            return Err(RemoteFault::NotFound { uri: uri.to_string() });
        }
        if state.echo_writes {
            self.emit(&mut state, Change::Deleted { uri: uri.clone() });
        }
        Ok(())
    }
}

fn parse_cursor(cursor: &Cursor) -> Option<usize> {
    cursor.as_str().strip_prefix('c')?.parse().ok()
}

#[async_trait]
impl RemoteRecordStore for FakeRemote {
    async fn create_recipe(
        &self,
        _session: &Session,
        uri: &AtUri,
        record: &RecipeRecord,
    ) -> Result<WriteAck, RemoteFault> {
        self.write_recipe(RemoteCall::CreateRecipe(uri.clone()), uri, record, false)
    }

    async fn get_recipe(
        &self,
        _session: &Session,
        uri: &AtUri,
    ) -> Result<Option<RemoteRecord<RecipeRecord>>, RemoteFault> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::GetRecipe(uri.clone()));
        if state.offline {
            return Err(RemoteFault::Network {
                message: "network unreachable".to_string(),
            });
        }
        Ok(state.recipes.get(uri).map(|(record, cid)| RemoteRecord {
            uri: uri.clone(),
            cid: cid.clone(),
            value: record.clone(),
        }))
    }

    async fn update_recipe(
        &self,
        _session: &Session,
        uri: &AtUri,
        record: &RecipeRecord,
    ) -> Result<WriteAck, RemoteFault> {
        self.write_recipe(RemoteCall::UpdateRecipe(uri.clone()), uri, record, true)
    }

    async fn delete_recipe(&self, _session: &Session, uri: &AtUri) -> Result<(), RemoteFault> {
        self.delete(RemoteCall::DeleteRecipe(uri.clone()), uri)
    }

    async fn create_collection(
        &self,
        _session: &Session,
        uri: &AtUri,
        record: &CollectionRecord,
    ) -> Result<WriteAck, RemoteFault> {
        {
            let mut state = self.lock();
            state.calls.push(RemoteCall::CreateCollection(uri.clone()));
            self.check_write(&state, uri)?;
        }
        self.write_collection(uri, record.clone())
    }

    async fn get_collection(
        &self,
        _session: &Session,
        uri: &AtUri,
    ) -> Result<Option<RemoteRecord<CollectionRecord>>, RemoteFault> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::GetCollection(uri.clone()));
        if state.offline {
            return Err(RemoteFault::Network {
                message: "network unreachable".to_string(),
            });
        }
        Ok(state.collections.get(uri).map(|(record, cid)| RemoteRecord {
            uri: uri.clone(),
            cid: cid.clone(),
            value: record.clone(),
        }))
    }

    async fn update_collection(
        &self,
        _session: &Session,
        uri: &AtUri,
        patch: &CollectionPatch,
    ) -> Result<WriteAck, RemoteFault> {
        let record = {
            let mut state = self.lock();
            state.calls.push(RemoteCall::UpdateCollection(uri.clone()));
            self.check_write(&state, uri)?;
            let Some((existing, _)) = state.collections.get(uri) else {
                return Err(RemoteFault::NotFound { uri: uri.to_string() });
            };
            let mut record = existing.clone();
            patch.apply_to(&mut record);
            record
        };
        self.write_collection(uri, record)
    }

    async fn delete_collection(&self, _session: &Session, uri: &AtUri) -> Result<(), RemoteFault> {
        self.delete(RemoteCall::DeleteCollection(uri.clone()), uri)
    }
}

#[async_trait]
impl RemoteChangeStream for FakeRemote {
    async fn subscribe(
        &self,
        _session: &Session,
        position: StreamPosition,
    ) -> Result<ChangeStream, SubscriptionFault> {
        let state = self.lock();
        if let Some(fault) = &state.subscribe_fault {
            return Err(fault.clone());
        }
        if state.offline {
            return Err(SubscriptionFault::OpenFailed {
                message: "network unreachable".to_string(),
            });
        }

        let skip = match &position {
            StreamPosition::Beginning => 0,
            StreamPosition::After(cursor) => {
                parse_cursor(cursor).ok_or_else(|| SubscriptionFault::ResumeFailed {
                    cursor: cursor.to_string(),
                    message: "unknown cursor format".to_string(),
                })?
            }
        };
        let backlog: Vec<ChangeEvent> = state.log.iter().skip(skip).cloned().collect();
        let rx = self.live_tx.subscribe();
        drop(state);
        debug!(?position, backlog = backlog.len(), "fake change stream opened");

        let live = BroadcastStream::new(rx).scan(false, |ended, item| {
            let next = if *ended {
                None
            } else {
                match item {
                    Ok(LiveItem::Event(event)) => Some(Ok(event)),
                    Ok(LiveItem::Disconnect(message)) => {
                        *ended = true;
                        Some(Err(SubscriptionFault::Disconnected { message }))
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        *ended = true;
                        Some(Err(SubscriptionFault::Disconnected {
                            message: format!("subscriber lagged by {n} events"),
                        }))
                    }
                }
            };
            futures::future::ready(next)
        });

        Ok(Box::pin(
            futures::stream::iter(backlog.into_iter().map(Ok)).chain(live),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn session() -> Session {
        Session::new(fixtures::OWNER_DID, "token")
    }

    #[tokio::test]
    async fn test_resume_replays_only_later_events() {
        let remote = FakeRemote::new();
        for key in ["a", "b", "c"] {
            remote.publish_upsert(
                &fixtures::recipe_uri(key),
                EntityPayload::Recipe(RecipeRecord::new(key, 1)),
            );
        }

        let stream = remote
            .subscribe(&session(), StreamPosition::After(Cursor::new("c1")))
            .await
            .unwrap();
        let cursors: Vec<String> = stream
            .take(2)
            .map(|e| e.unwrap().cursor.to_string())
            .collect()
            .await;
        assert_eq!(cursors, vec!["c2", "c3"]);
    }

    #[tokio::test]
    async fn test_disconnect_ends_open_streams() {
        let remote = FakeRemote::new();
        let mut stream = remote
            .subscribe(&session(), StreamPosition::Beginning)
            .await
            .unwrap();
        remote.disconnect_streams("reset");

        assert!(matches!(
            stream.next().await,
            Some(Err(SubscriptionFault::Disconnected { .. }))
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete_of_missing_record_report_not_found() {
        let remote = FakeRemote::new();
        let uri = fixtures::recipe_uri("missing");
        let err = remote
            .update_recipe(&session(), &uri, &RecipeRecord::new("x", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteFault::NotFound { .. }));
        let err = remote.delete_recipe(&session(), &uri).await.unwrap_err();
        assert!(matches!(err, RemoteFault::NotFound { .. }));
    }
}

//! Collaborator interfaces for the remote side of the cache.
//!
//! The engine never talks to the network directly. It is handed a
//! [`RemoteRecordStore`] for record CRUD, a [`RemoteChangeStream`] for the
//! live change feed, and a [`SessionProvider`] for credentials. Production
//! wiring supplies real clients; tests use `crate::testing::FakeRemote`.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use pantry_api::{
    AtUri, ChangeEvent, CollectionPatch, CollectionRecord, RecipeRecord, RemoteFault,
    StreamPosition, SubscriptionFault,
};

/// Credentials for one authenticated account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The account's DID; every record this client creates is owned by it.
    pub did: String,
    pub access_token: String,
}

impl Session {
    pub fn new(did: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            access_token: access_token.into(),
        }
    }
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn is_authenticated(&self) -> bool;

    /// The current session, or `None` when signed out.
    async fn session(&self) -> Option<Session>;
}

/// Resolve the current session or fail with `RemoteFault::Unauthenticated`.
pub async fn require_session(sessions: &dyn SessionProvider) -> Result<Session, RemoteFault> {
    sessions.session().await.ok_or(RemoteFault::Unauthenticated)
}

/// Remote acknowledgement of a create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    pub uri: AtUri,
    pub cid: String,
}

/// A record as held by the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord<T> {
    pub uri: AtUri,
    pub cid: String,
    pub value: T,
}

/// CRUD against the owner's remote repository.
///
/// Creates carry the client-minted URI so a record keeps one identity from
/// the moment it is written locally. `get_*` returns `Ok(None)` for a missing
/// record; `update_*`/`delete_*` report a missing record as
/// `RemoteFault::NotFound`.
#[async_trait]
pub trait RemoteRecordStore: Send + Sync {
    async fn create_recipe(
        &self,
        session: &Session,
        uri: &AtUri,
        record: &RecipeRecord,
    ) -> Result<WriteAck, RemoteFault>;

    async fn get_recipe(
        &self,
        session: &Session,
        uri: &AtUri,
    ) -> Result<Option<RemoteRecord<RecipeRecord>>, RemoteFault>;

    async fn update_recipe(
        &self,
        session: &Session,
        uri: &AtUri,
        record: &RecipeRecord,
    ) -> Result<WriteAck, RemoteFault>;

    async fn delete_recipe(&self, session: &Session, uri: &AtUri) -> Result<(), RemoteFault>;

    async fn create_collection(
        &self,
        session: &Session,
        uri: &AtUri,
        record: &CollectionRecord,
    ) -> Result<WriteAck, RemoteFault>;

    async fn get_collection(
        &self,
        session: &Session,
        uri: &AtUri,
    ) -> Result<Option<RemoteRecord<CollectionRecord>>, RemoteFault>;

    async fn update_collection(
        &self,
        session: &Session,
        uri: &AtUri,
        patch: &CollectionPatch,
    ) -> Result<WriteAck, RemoteFault>;

    async fn delete_collection(&self, session: &Session, uri: &AtUri) -> Result<(), RemoteFault>;
}

/// Ordered, resumable feed of remote changes.
///
/// The stream ends (`None`) when the connection drops.
pub type ChangeStream =
    Pin<Box<dyn Stream<Item = Result<ChangeEvent, SubscriptionFault>> + Send>>;

#[async_trait]
pub trait RemoteChangeStream: Send + Sync {
    async fn subscribe(
        &self,
        session: &Session,
        position: StreamPosition,
    ) -> Result<ChangeStream, SubscriptionFault>;
}

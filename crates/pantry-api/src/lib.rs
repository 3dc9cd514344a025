//! Shared data model for the pantry cache
//!
//! This crate holds the types that flow between the local cache, the
//! pending mutation queue, the sync engine and the remote collaborators:
//! - `AtUri` / `EntityKind`: owner-scoped record identifiers
//! - `Recipe` / `Collection`: cached records plus their remote bodies
//! - `QueueEntry`: unconfirmed local writes
//! - `ChangeEvent` / `Cursor`: the remote change stream
//! - the fault taxonomy shared by every layer

pub mod collection;
pub mod error;
pub mod mutation;
pub mod recipe;
pub mod status;
pub mod streaming;
pub mod uri;

pub use collection::{
    Collection, CollectionPatch, CollectionRecord, COLLECTION_DESCRIPTION_MAX,
    COLLECTION_NAME_MAX, COLLECTION_RECIPES_MAX,
};
pub use error::{
    BoxError, PantryError, RemoteFault, Result, StoreFault, SubscriptionFault, ValidationFault,
};
pub use mutation::{EntityPayload, MutationOperation, QueueEntry};
pub use recipe::{ForkMetadata, Ingredient, Recipe, RecipeRecord, Step};
pub use status::{HostSignals, StatusSnapshot, StatusTransition, SyncStatus};
pub use streaming::{Change, ChangeEvent, Cursor, StreamPosition, SyncState};
pub use uri::{AtUri, EntityKind, COLLECTION_NSID, RECIPE_NSID};

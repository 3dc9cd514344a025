//! Synchronization with the remote repository
//!
//! - `remote`: collaborator traits for record CRUD, the change feed and sessions
//! - `engine`: change-stream consumer, queue drain and lifecycle state machine
//! - `deletion`: cascading recipe deletion across collections

pub mod deletion;
pub mod engine;
pub mod remote;

pub use deletion::{DeletionCoordinator, DeletionReport};
pub use engine::{
    DrainReport, FoldOutcome, SyncEngine, SyncEngineDeps, SyncObserver, SyncOptions,
};
pub use remote::{
    require_session, ChangeStream, RemoteChangeStream, RemoteRecord, RemoteRecordStore,
    Session, SessionProvider, WriteAck,
};

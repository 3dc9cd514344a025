pub mod held_changes;
pub mod local_store;
pub mod schema;
pub mod sync_state;

pub use local_store::{CachedEntity, LocalStore, RecordKind};
pub use schema::CURRENT_SCHEMA_VERSION;

pub mod pending_queue;
pub mod search;

pub use pending_queue::{Forgotten, PendingMutationQueue, Settlement};
pub use search::{MatchReason, SearchHit, SearchIndex, SearchQuery};

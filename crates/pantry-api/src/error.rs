use thiserror::Error;

use crate::status::SyncStatus;
use crate::uri::EntityKind;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Local persistence failure.
///
/// Always names the store operation that failed and the record it targeted
/// (a URI, or a record kind for whole-table reads).
#[derive(Debug, Error)]
#[error("store operation '{operation}' failed for {target}: {source}")]
pub struct StoreFault {
    pub operation: &'static str,
    pub target: String,
    #[source]
    pub source: BoxError,
}

impl StoreFault {
    pub fn new(operation: &'static str, target: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            operation,
            target: target.into(),
            source: source.into(),
        }
    }
}

/// Failure reported by (or while reaching) the remote record store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteFault {
    #[error("remote store requires an authenticated session")]
    Unauthenticated,

    #[error("network error: {message}")]
    Network { message: String },

    #[error("remote record not found: {uri}")]
    NotFound { uri: String },

    #[error("remote store rejected {uri}: {message}")]
    Rejected { uri: String, message: String },
}

impl RemoteFault {
    /// Whether retrying the same write can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, RemoteFault::Rejected { .. })
    }
}

/// Malformed entity, detected before any write is attempted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationFault {
    #[error("malformed uri '{uri}': {reason}")]
    MalformedUri { uri: String, reason: String },

    #[error("{uri} is a {actual} uri, expected a {expected} uri")]
    WrongKind {
        uri: String,
        expected: EntityKind,
        actual: &'static str,
    },

    #[error("invalid {field}: {problem}")]
    InvalidField { field: &'static str, problem: String },

    #[error("no cached record at {uri}")]
    UnknownRecord { uri: String },

    #[error("recipe {uri} is a fork and cannot be edited")]
    ReadOnlyFork { uri: String },

    #[error("invalid {operation} mutation for {uri}: {problem}")]
    InvalidMutation {
        uri: String,
        operation: &'static str,
        problem: String,
    },
}

impl ValidationFault {
    pub fn field(field: &'static str, problem: impl Into<String>) -> Self {
        ValidationFault::InvalidField {
            field,
            problem: problem.into(),
        }
    }
}

/// Change-stream failure. Recoverable: the engine falls back to idle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscriptionFault {
    #[error("change stream requires an authenticated session")]
    Unauthenticated,

    #[error("failed to open change stream: {message}")]
    OpenFailed { message: String },

    #[error("cannot resume change stream from cursor {cursor}: {message}")]
    ResumeFailed { cursor: String, message: String },

    #[error("change stream disconnected: {message}")]
    Disconnected { message: String },
}

#[derive(Debug, Error)]
pub enum PantryError {
    #[error(transparent)]
    Store(#[from] StoreFault),

    #[error(transparent)]
    Remote(#[from] RemoteFault),

    #[error(transparent)]
    Validation(#[from] ValidationFault),

    #[error(transparent)]
    Subscription(#[from] SubscriptionFault),

    #[error("sync engine cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: SyncStatus,
    },
}

pub type Result<T> = std::result::Result<T, PantryError>;

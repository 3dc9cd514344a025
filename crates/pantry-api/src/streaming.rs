use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::mutation::EntityPayload;
use crate::uri::{AtUri, EntityKind};

/// Opaque resumption token for the remote change stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cursor {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Position in the change stream to subscribe from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamPosition {
    /// Replay the stream from its first event
    Beginning,
    /// Deliver only events after this cursor
    After(Cursor),
}

impl From<Option<Cursor>> for StreamPosition {
    fn from(cursor: Option<Cursor>) -> Self {
        match cursor {
            Some(cursor) => StreamPosition::After(cursor),
            None => StreamPosition::Beginning,
        }
    }
}

/// A remote change: either a fresh snapshot or a deletion marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Change {
    Upserted {
        uri: AtUri,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cid: Option<String>,
        payload: EntityPayload,
    },
    Deleted {
        uri: AtUri,
    },
}

impl Change {
    pub fn uri(&self) -> &AtUri {
        match self {
            Change::Upserted { uri, .. } | Change::Deleted { uri } => uri,
        }
    }

    pub fn kind(&self) -> Option<EntityKind> {
        match self {
            Change::Upserted { payload, .. } => Some(payload.kind()),
            Change::Deleted { uri } => uri.kind(),
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Change::Deleted { .. })
    }
}

/// One delivered change together with the cursor that resumes after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub cursor: Cursor,
    pub change: Change,
}

impl ChangeEvent {
    pub fn new(cursor: impl Into<Cursor>, change: Change) -> Self {
        Self {
            cursor: cursor.into(),
            change,
        }
    }
}

impl From<String> for Cursor {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Persisted progress through the change stream (singleton).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_cursor: Option<Cursor>,
}

impl SyncState {
    pub fn position(&self) -> StreamPosition {
        StreamPosition::from(self.last_cursor.clone())
    }
}

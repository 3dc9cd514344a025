//! Pending mutation entries.
//!
//! A `QueueEntry` records a local write that the remote store has not yet
//! confirmed. There is at most one live entry per URI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collection::CollectionRecord;
use crate::error::ValidationFault;
use crate::recipe::RecipeRecord;
use crate::uri::{AtUri, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOperation {
    Create,
    Update,
    Delete,
}

impl MutationOperation {
    /// Convert operation to string for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOperation::Create => "create",
            MutationOperation::Update => "update",
            MutationOperation::Delete => "delete",
        }
    }

    /// Parse operation from database string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(MutationOperation::Create),
            "update" => Some(MutationOperation::Update),
            "delete" => Some(MutationOperation::Delete),
            _ => None,
        }
    }

    pub fn requires_payload(&self) -> bool {
        !matches!(self, MutationOperation::Delete)
    }
}

impl std::fmt::Display for MutationOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Full snapshot of an entity body carried by create/update entries and by
/// remote change events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "lowercase")]
pub enum EntityPayload {
    Recipe(RecipeRecord),
    Collection(CollectionRecord),
}

impl EntityPayload {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityPayload::Recipe(_) => EntityKind::Recipe,
            EntityPayload::Collection(_) => EntityKind::Collection,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationFault> {
        match self {
            EntityPayload::Recipe(record) => record.validate(),
            EntityPayload::Collection(record) => record.validate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub uri: AtUri,
    pub operation: MutationOperation,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<EntityPayload>,
}

impl QueueEntry {
    /// Build an entry, checking that the payload matches the operation and URI.
    pub fn new(
        uri: AtUri,
        operation: MutationOperation,
        payload: Option<EntityPayload>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ValidationFault> {
        let invalid = |problem: &str| ValidationFault::InvalidMutation {
            uri: uri.to_string(),
            operation: operation.as_str(),
            problem: problem.to_string(),
        };

        let kind = uri
            .kind()
            .ok_or_else(|| invalid("uri does not name a recipe or collection"))?;

        match (&payload, operation.requires_payload()) {
            (None, true) => return Err(invalid("payload snapshot is required")),
            (Some(_), false) => return Err(invalid("delete must not carry a payload")),
            (Some(p), true) if p.kind() != kind => {
                return Err(invalid("payload kind does not match uri"))
            }
            _ => {}
        }

        Ok(Self {
            uri,
            operation,
            timestamp,
            payload,
        })
    }

    /// Entity kind this entry writes, derived from the URI.
    pub fn kind(&self) -> Option<EntityKind> {
        self.uri.kind()
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::streaming::Cursor;

/// Lifecycle state of the sync engine.
///
/// `Error` is transient: the engine reports it and immediately settles in `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Paused,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Paused => "paused",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: SyncStatus,
    pub to: SyncStatus,
    /// Set when the transition was caused by a fault.
    pub reason: Option<String>,
}

/// Pull-based view of the engine, for callers that poll instead of observing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: SyncStatus,
    pub last_cursor: Option<Cursor>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_mutations: usize,
    pub last_error: Option<String>,
}

/// Host environment hints fed into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSignals {
    pub connected: bool,
    pub foregrounded: bool,
}

impl HostSignals {
    pub fn new(connected: bool, foregrounded: bool) -> Self {
        Self {
            connected,
            foregrounded,
        }
    }

    /// Syncing is only worthwhile while online and visible.
    pub fn allows_sync(&self) -> bool {
        self.connected && self.foregrounded
    }
}

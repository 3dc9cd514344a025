//! Persisted change-stream progress.
//!
//! A single row in `sync_state` records the last cursor whose change was
//! fully applied, so a restarted engine can resume without replaying history.

use chrono::{DateTime, Utc};
use pantry_api::{Cursor, StoreFault, SyncState};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::local_store::{fault, LocalStore, RecordKind};

const TARGET: &str = RecordKind::SyncState.table_name();

fn parse_time(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreFault> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreFault::new("load_sync_state", TARGET, e))
    })
    .transpose()
}

fn write_state(conn: &Connection, state: &SyncState) -> Result<(), StoreFault> {
    let last_sync_at = state.last_sync_at.map(|t| t.to_rfc3339());
    let last_cursor = state.last_cursor.as_ref().map(|c| c.as_str().to_string());
    conn.execute(
        r#"
INSERT INTO sync_state (id, last_sync_at, last_cursor) VALUES (1, ?1, ?2)
ON CONFLICT(id) DO UPDATE SET
    last_sync_at = excluded.last_sync_at,
    last_cursor = excluded.last_cursor
"#,
        params![last_sync_at, last_cursor],
    )
    .map_err(fault("save_sync_state", TARGET))?;
    Ok(())
}

/// Record that the change at `cursor` has been applied, inside the caller's
/// transaction.
pub(crate) fn write_cursor(conn: &Connection, cursor: &Cursor, at: DateTime<Utc>) -> Result<(), StoreFault> {
    write_state(
        conn,
        &SyncState {
            last_sync_at: Some(at),
            last_cursor: Some(cursor.clone()),
        },
    )
}

impl LocalStore {
    /// Load the singleton sync state. A fresh cache has neither a cursor nor
    /// a last sync time.
    pub async fn load_sync_state(&self) -> Result<SyncState, StoreFault> {
        let row: Option<(Option<String>, Option<String>)> = self
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT last_sync_at, last_cursor FROM sync_state WHERE id = 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(fault("load_sync_state", TARGET))
            })
            .await?;

        let Some((last_sync_at, last_cursor)) = row else {
            return Ok(SyncState::default());
        };

        Ok(SyncState {
            last_sync_at: parse_time(last_sync_at)?,
            last_cursor: last_cursor.map(Cursor::from),
        })
    }

    pub async fn save_sync_state(&self, state: &SyncState) -> Result<(), StoreFault> {
        self.with_conn(|conn| write_state(conn, state)).await?;
        debug!(cursor = ?state.last_cursor, "saved sync state");
        Ok(())
    }

    /// Record that the change at `cursor` has been applied.
    pub async fn advance_cursor(&self, cursor: &Cursor, at: DateTime<Utc>) -> Result<(), StoreFault> {
        self.save_sync_state(&SyncState {
            last_sync_at: Some(at),
            last_cursor: Some(cursor.clone()),
        })
        .await
    }

    /// Forget stream progress; the next subscription replays from the beginning.
    pub async fn reset_sync_state(&self) -> Result<(), StoreFault> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM sync_state", [])
                .map_err(fault("reset_sync_state", TARGET))
        })
        .await?;
        Ok(())
    }
}

//! Remote changes held back by pending local writes.
//!
//! When a remote change arrives for a URI that still has a queued local
//! mutation, the change is parked in `deferred_changes` (latest per URI)
//! instead of touching the cached record. The cursor still advances, so the
//! parked row is the only copy of that change; it lives in the same database
//! as the queue and survives restarts.

use chrono::{DateTime, Utc};
use pantry_api::{AtUri, Change, ChangeEvent, Collection, Cursor, EntityPayload, Recipe, StoreFault};
use rusqlite::{params, Connection, OptionalExtension};

use super::local_store::{delete_row, fault, write_row, LocalStore};
use super::sync_state::write_cursor;

const TARGET: &str = "deferred_changes";

/// How a well-formed remote change was folded into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Folded {
    Applied,
    Held,
}

fn is_queued(conn: &Connection, uri: &AtUri) -> Result<bool, StoreFault> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM pending_mutations WHERE uri = ?1",
            params![uri.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(fault("fold_change", uri))?;
    Ok(found.is_some())
}

/// Write a remote change straight into the cached tables.
pub(crate) fn apply_change(
    conn: &Connection,
    operation: &'static str,
    change: &Change,
    at: DateTime<Utc>,
) -> Result<(), StoreFault> {
    match change {
        Change::Upserted {
            uri,
            cid,
            payload: EntityPayload::Recipe(record),
        } => write_row(conn, operation, &Recipe::remote(uri.clone(), record.clone(), cid.clone(), at)),
        Change::Upserted {
            uri,
            payload: EntityPayload::Collection(record),
            ..
        } => write_row(conn, operation, &Collection::new(uri.clone(), record.clone())),
        Change::Deleted { uri } => match uri.kind() {
            Some(kind) => delete_row(conn, operation, kind, uri).map(|_| ()),
            None => Ok(()),
        },
    }
}

fn hold(conn: &Connection, event: &ChangeEvent) -> Result<(), StoreFault> {
    let uri = event.change.uri();
    let change = serde_json::to_string(&event.change).map_err(|e| StoreFault::new("hold_change", uri.as_str(), e))?;
    conn.execute(
        r#"
INSERT INTO deferred_changes (uri, cursor, change) VALUES (?1, ?2, ?3)
ON CONFLICT(uri) DO UPDATE SET
    cursor = excluded.cursor,
    change = excluded.change
"#,
        params![uri.as_str(), event.cursor.as_str(), change],
    )
    .map_err(fault("hold_change", uri))?;
    Ok(())
}

/// Remove and return the change held for `uri`, if any.
pub(crate) fn take_held(conn: &Connection, uri: &AtUri) -> Result<Option<ChangeEvent>, StoreFault> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT cursor, change FROM deferred_changes WHERE uri = ?1",
            params![uri.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(fault("take_held_change", uri))?;
    let Some((cursor, change)) = row else {
        return Ok(None);
    };
    conn.execute("DELETE FROM deferred_changes WHERE uri = ?1", params![uri.as_str()])
        .map_err(fault("take_held_change", uri))?;

    let change: Change =
        serde_json::from_str(&change).map_err(|e| StoreFault::new("take_held_change", uri.as_str(), e))?;
    Ok(Some(ChangeEvent::new(Cursor::new(cursor), change)))
}

pub(crate) fn drop_all_held(conn: &Connection) -> Result<usize, StoreFault> {
    conn.execute("DELETE FROM deferred_changes", [])
        .map_err(fault("drop_held_changes", TARGET))
}

impl LocalStore {
    /// Fold one remote change and record its cursor in a single transaction.
    ///
    /// A queued URI keeps its local record and the change is held instead.
    /// Because the queue check, the record write and the cursor write commit
    /// together, a local edit can never land between them.
    pub(crate) async fn fold_change(
        &self,
        event: &ChangeEvent,
        at: DateTime<Utc>,
    ) -> Result<Folded, StoreFault> {
        let uri = event.change.uri();
        self.transact("fold_change", uri.as_str(), |tx| {
            let folded = if is_queued(tx, uri)? {
                hold(tx, event)?;
                Folded::Held
            } else {
                apply_change(tx, "fold_change", &event.change, at)?;
                Folded::Applied
            };
            write_cursor(tx, &event.cursor, at)?;
            Ok(folded)
        })
        .await
    }

    /// Remote changes currently held back, ordered by URI.
    pub async fn held_changes(&self) -> Result<Vec<ChangeEvent>, StoreFault> {
        let rows: Vec<(String, String, String)> = self
            .with_conn(|conn| {
                let mut stmt = conn
                    .prepare("SELECT uri, cursor, change FROM deferred_changes ORDER BY uri")
                    .map_err(fault("held_changes", TARGET))?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                    .map_err(fault("held_changes", TARGET))?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(fault("held_changes", TARGET));
                rows
            })
            .await?;

        rows.into_iter()
            .map(|(uri, cursor, change)| {
                let change: Change =
                    serde_json::from_str(&change).map_err(|e| StoreFault::new("held_changes", uri, e))?;
                Ok(ChangeEvent::new(Cursor::new(cursor), change))
            })
            .collect()
    }

    pub async fn held_change_count(&self) -> Result<usize, StoreFault> {
        let count: i64 = self
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM deferred_changes", [], |row| row.get(0))
                    .map_err(fault("held_change_count", TARGET))
            })
            .await?;
        Ok(count.max(0) as usize)
    }
}

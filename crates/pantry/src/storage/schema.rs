//! Versioned, additive schema migrations for the local cache database.
//!
//! Each migration runs at most once and is recorded in `schema_migrations`.
//! Every statement is written so that re-running it against a database that
//! already has the object is a no-op; migrations never drop or rewrite rows.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

pub const CURRENT_SCHEMA_VERSION: i64 = 3;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: [Migration; 3] = [
    Migration {
        version: 1,
        name: "baseline_cache_schema",
        sql: r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS recipes (
    uri TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    data TEXT NOT NULL,
    written_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS collections (
    uri TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    data TEXT NOT NULL,
    written_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_mutations (
    uri TEXT PRIMARY KEY,
    operation TEXT NOT NULL,
    timestamp_us INTEGER NOT NULL,
    payload TEXT
);

CREATE TABLE IF NOT EXISTS sync_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_sync_at TEXT,
    last_cursor TEXT
);
"#,
    },
    Migration {
        version: 2,
        name: "lookup_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_recipes_label ON recipes(label);
CREATE INDEX IF NOT EXISTS idx_collections_label ON collections(label);
CREATE INDEX IF NOT EXISTS idx_pending_mutations_timestamp
    ON pending_mutations(timestamp_us);
"#,
    },
    Migration {
        version: 3,
        name: "held_remote_changes",
        sql: r#"
CREATE TABLE IF NOT EXISTS deferred_changes (
    uri TEXT PRIMARY KEY,
    cursor TEXT NOT NULL,
    change TEXT NOT NULL
);
"#,
    },
];

pub(crate) fn configure(conn: &Connection, file_backed: bool) -> rusqlite::Result<()> {
    if file_backed {
        // journal_mode returns a row, so it cannot go through execute_batch
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.busy_timeout(std::time::Duration::from_millis(5000))?;
    Ok(())
}

pub(crate) fn apply_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#,
    )?;

    for migration in MIGRATIONS {
        let already_applied: Option<i64> = tx
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;

        if already_applied.is_some() {
            debug!(
                version = migration.version,
                name = migration.name,
                "migration already applied"
            );
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, Utc::now().to_rfc3339()],
        )?;
        info!(
            version = migration.version,
            name = migration.name,
            "applied schema migration"
        );
    }

    tx.execute(
        r#"
INSERT INTO meta (key, value)
VALUES ('schema_version', ?1)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    tx.commit()
}

pub(crate) fn schema_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
}

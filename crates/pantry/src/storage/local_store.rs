//! SQLite-backed key-value cache for recipes and collections.
//!
//! Each record is stored as a JSON document keyed by its URI. A `label`
//! column mirrors the title/name so listings can be ordered without
//! deserializing every row.

use std::path::{Path, PathBuf};

use chrono::Utc;
use pantry_api::{AtUri, Collection, EntityKind, Recipe, StoreFault};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::schema;

/// The four logical record kinds persisted by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Recipes,
    Collections,
    SyncState,
    PendingMutations,
}

impl RecordKind {
    pub const fn table_name(self) -> &'static str {
        match self {
            RecordKind::Recipes => "recipes",
            RecordKind::Collections => "collections",
            RecordKind::SyncState => "sync_state",
            RecordKind::PendingMutations => "pending_mutations",
        }
    }

    pub fn for_entity(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Recipe => RecordKind::Recipes,
            EntityKind::Collection => RecordKind::Collections,
        }
    }
}

/// An entity that can live in one of the URI-keyed tables.
pub trait CachedEntity: Serialize + DeserializeOwned + Send + Sync {
    const KIND: EntityKind;

    fn uri(&self) -> &AtUri;

    /// Human-readable label used for ordering and lookup.
    fn label(&self) -> &str;
}

impl CachedEntity for Recipe {
    const KIND: EntityKind = EntityKind::Recipe;

    fn uri(&self) -> &AtUri {
        &self.uri
    }

    fn label(&self) -> &str {
        &self.record.title
    }
}

impl CachedEntity for Collection {
    const KIND: EntityKind = EntityKind::Collection;

    fn uri(&self) -> &AtUri {
        &self.uri
    }

    fn label(&self) -> &str {
        &self.record.name
    }
}

fn table<E: CachedEntity>() -> &'static str {
    RecordKind::for_entity(E::KIND).table_name()
}

/// Map a rusqlite error into a `StoreFault` naming the operation and target.
pub(crate) fn fault<'a, T: ToString + ?Sized>(
    operation: &'static str,
    target: &'a T,
) -> impl FnOnce(rusqlite::Error) -> StoreFault + 'a {
    move |err| StoreFault::new(operation, target.to_string(), err)
}

fn decode<E: CachedEntity>(operation: &'static str, target: &str, data: &str) -> Result<E, StoreFault> {
    serde_json::from_str(data).map_err(|e| StoreFault::new(operation, target, e))
}

// Row helpers shared by multi-table transactions. They take a plain
// `Connection` so a `Transaction` can be passed through deref.

pub(crate) fn read_row<E: CachedEntity>(
    conn: &Connection,
    operation: &'static str,
    uri: &AtUri,
) -> Result<Option<E>, StoreFault> {
    let sql = format!("SELECT data FROM {} WHERE uri = ?1", table::<E>());
    let data: Option<String> = conn
        .query_row(&sql, params![uri.as_str()], |row| row.get(0))
        .optional()
        .map_err(fault(operation, uri))?;
    data.map(|d| decode(operation, uri.as_str(), &d)).transpose()
}

pub(crate) fn read_all_rows<E: CachedEntity>(
    conn: &Connection,
    operation: &'static str,
) -> Result<Vec<E>, StoreFault> {
    let target = table::<E>();
    let sql = format!("SELECT data FROM {target} ORDER BY uri");
    let mut stmt = conn.prepare(&sql).map_err(fault(operation, target))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(fault(operation, target))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(fault(operation, target))?;
    rows.iter().map(|d| decode(operation, target, d)).collect()
}

pub(crate) fn write_row<E: CachedEntity>(
    conn: &Connection,
    operation: &'static str,
    entity: &E,
) -> Result<(), StoreFault> {
    let uri = entity.uri();
    let data = serde_json::to_string(entity).map_err(|e| StoreFault::new(operation, uri.as_str(), e))?;
    let sql = format!(
        r#"
INSERT INTO {} (uri, label, data, written_at) VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(uri) DO UPDATE SET
    label = excluded.label,
    data = excluded.data,
    written_at = excluded.written_at
"#,
        table::<E>()
    );
    conn.execute(
        &sql,
        params![uri.as_str(), entity.label(), data, Utc::now().to_rfc3339()],
    )
    .map_err(fault(operation, uri))?;
    debug!(uri = %uri, kind = %E::KIND, "stored record");
    Ok(())
}

pub(crate) fn delete_row(
    conn: &Connection,
    operation: &'static str,
    kind: EntityKind,
    uri: &AtUri,
) -> Result<bool, StoreFault> {
    let sql = format!(
        "DELETE FROM {} WHERE uri = ?1",
        RecordKind::for_entity(kind).table_name()
    );
    let removed = conn
        .execute(&sql, params![uri.as_str()])
        .map_err(fault(operation, uri))?;
    Ok(removed > 0)
}

/// Open a connection and bring its schema up to date.
fn prepare_connection(path: Option<&Path>) -> Result<Connection, StoreFault> {
    let target = path.map_or_else(|| ":memory:".to_string(), |p| p.display().to_string());
    let mut conn = match path {
        Some(path) => Connection::open(path),
        None => Connection::open_in_memory(),
    }
    .map_err(fault("open", &target))?;
    schema::configure(&conn, path.is_some()).map_err(fault("configure", &target))?;
    schema::apply_migrations(&mut conn).map_err(fault("migrate", &target))?;
    Ok(conn)
}

/// One SQLite connection shared by every component.
///
/// Statements run synchronously on the calling task while the connection
/// lock is held; each call is a handful of small indexed statements. Opening
/// a file-backed store (which may run migrations) happens on the blocking
/// pool.
pub struct LocalStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").field("path", &self.path).finish()
    }
}

impl LocalStore {
    /// Open (or create) a file-backed cache and bring its schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreFault> {
        let path = path.as_ref().to_path_buf();
        let target = path.display().to_string();
        let opened = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || prepare_connection(Some(&path)))
        }
        .await
        .map_err(|e| StoreFault::new("open", target.clone(), e))??;
        info!(path = %target, "opened local store");
        Ok(Self {
            conn: Mutex::new(opened),
            path: Some(path),
        })
    }

    /// Open a throwaway cache that lives only as long as this value.
    pub async fn open_in_memory() -> Result<Self, StoreFault> {
        Ok(Self {
            conn: Mutex::new(prepare_connection(None)?),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` with exclusive access to the connection.
    pub(crate) async fn with_conn<R>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<R, StoreFault>,
    ) -> Result<R, StoreFault> {
        let mut conn = self.conn.lock().await;
        f(&mut conn)
    }

    /// Run `f` inside one transaction, committed only if `f` succeeds.
    pub(crate) async fn transact<R, E>(
        &self,
        operation: &'static str,
        target: &str,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StoreFault>,
    {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(fault(operation, target))?;
        let value = f(&tx)?;
        tx.commit().map_err(fault(operation, target))?;
        Ok(value)
    }

    pub async fn schema_version(&self) -> Result<i64, StoreFault> {
        self.with_conn(|conn| {
            schema::schema_version(conn).map_err(fault("schema_version", "schema_migrations"))
        })
        .await
    }

    pub async fn get<E: CachedEntity>(&self, uri: &AtUri) -> Result<Option<E>, StoreFault> {
        self.with_conn(|conn| read_row(conn, "get", uri)).await
    }

    /// Every record of kind `E`, ordered by URI.
    pub async fn get_all<E: CachedEntity>(&self) -> Result<Vec<E>, StoreFault> {
        self.with_conn(|conn| read_all_rows(conn, "get_all")).await
    }

    /// Insert or fully replace the record stored under the entity's URI.
    pub async fn put<E: CachedEntity>(&self, entity: &E) -> Result<(), StoreFault> {
        self.with_conn(|conn| write_row(conn, "put", entity)).await
    }

    /// Remove the record. Returns whether anything was deleted; deleting a
    /// missing key is not an error.
    pub async fn delete<E: CachedEntity>(&self, uri: &AtUri) -> Result<bool, StoreFault> {
        self.with_conn(|conn| delete_row(conn, "delete", E::KIND, uri))
            .await
    }

    /// Read-modify-write of one record under the connection lock.
    ///
    /// Returns `false` (and does not call `f`) when no record exists.
    pub async fn modify<E, F>(&self, uri: &AtUri, f: F) -> Result<bool, StoreFault>
    where
        E: CachedEntity,
        F: FnOnce(&mut E),
    {
        self.transact("modify", uri.as_str(), |tx| {
            let Some(mut entity) = read_row::<E>(tx, "modify", uri)? else {
                return Ok(false);
            };
            f(&mut entity);
            write_row(tx, "modify", &entity)?;
            Ok(true)
        })
        .await
    }

    /// Flip the `pending_sync` flag of a cached recipe.
    pub async fn set_pending_sync(&self, uri: &AtUri, pending: bool) -> Result<bool, StoreFault> {
        self.modify::<Recipe, _>(uri, |recipe| recipe.pending_sync = pending)
            .await
    }

    /// Recipes referenced by a collection, in the collection's own order.
    ///
    /// Dangling references and an unknown collection both yield nothing.
    pub async fn get_by_collection(&self, collection: &AtUri) -> Result<Vec<Recipe>, StoreFault> {
        let Some(collection) = self.get::<Collection>(collection).await? else {
            return Ok(Vec::new());
        };

        let mut recipes = Vec::with_capacity(collection.record.recipe_uris.len());
        let mut seen = std::collections::HashSet::new();
        for uri in &collection.record.recipe_uris {
            if !seen.insert(uri) {
                continue;
            }
            if let Some(recipe) = self.get::<Recipe>(uri).await? {
                recipes.push(recipe);
            }
        }
        Ok(recipes)
    }

    pub async fn count<E: CachedEntity>(&self) -> Result<usize, StoreFault> {
        let target = table::<E>();
        let sql = format!("SELECT COUNT(*) FROM {target}");
        let count: i64 = self
            .with_conn(|conn| {
                conn.query_row(&sql, [], |row| row.get(0))
                    .map_err(fault("count", target))
            })
            .await?;
        Ok(count.max(0) as usize)
    }
}

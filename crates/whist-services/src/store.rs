//! Persisted key-value state: cached tokens, region ordering, onboarding flag.
//!
//! [`SqliteStore`] backs the CLI; [`MemoryStore`] backs tests. Both publish
//! every write on a per-store change feed consumed through
//! [`KeyValueStore::on_change`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::errors::ServiceError;

const PRAGMAS: &str = "PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;";

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);";

const FEED_CAPACITY: usize = 32;

/// Keys the launcher persists.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum StoreKey {
    AccessToken,
    RefreshToken,
    ConfigToken,
    UserEmail,
    /// JSON array of region names, closest first.
    RegionOrdering,
    Onboarded,
}

impl StoreKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccessToken => "accessToken",
            Self::RefreshToken => "refreshToken",
            Self::ConfigToken => "configToken",
            Self::UserEmail => "userEmail",
            Self::RegionOrdering => "regionOrdering",
            Self::Onboarded => "onboarded",
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Get/set/watch access to persisted state.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: StoreKey) -> Result<Option<String>, ServiceError>;

    fn set(&self, key: StoreKey, value: &str) -> Result<(), ServiceError>;

    fn remove(&self, key: StoreKey) -> Result<(), ServiceError>;

    /// Every later write to `key`; `None` means it was removed.
    fn on_change(&self, key: StoreKey) -> BoxStream<'static, Option<String>>;
}

impl dyn KeyValueStore + '_ {
    /// Decode a JSON value. An undecodable value is logged and treated as absent.
    pub fn get_json<T: DeserializeOwned>(&self, key: StoreKey) -> Result<Option<T>, ServiceError> {
        let Some(raw) = self.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(%key, error = %err, "stored value is not valid JSON, ignoring");
                Ok(None)
            }
        }
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: StoreKey, value: &T) -> Result<(), ServiceError> {
        self.set(key, &serde_json::to_string(value)?)
    }
}

/// Broadcast of writes shared by both store implementations.
#[derive(Clone)]
struct ChangeFeed {
    tx: broadcast::Sender<(StoreKey, Option<String>)>,
}

impl ChangeFeed {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    fn notify(&self, key: StoreKey, value: Option<String>) {
        let _ = self.tx.send((key, value));
    }

    fn watch(&self, key: StoreKey) -> BoxStream<'static, Option<String>> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(move |item| {
                std::future::ready(match item {
                    Ok((changed, value)) if changed == key => Some(value),
                    Ok(_) => None,
                    Err(err) => {
                        warn!(%key, error = %err, "store watcher lagged");
                        None
                    }
                })
            })
            .boxed()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed store. The connection sits behind a mutex; calls are short.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    feed: ChangeFeed,
}

impl SqliteStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self, ServiceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ServiceError::Store(format!("create dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        info!(path = %path.display(), "store opened");
        Ok(Self::wrap(conn, path.to_owned()))
    }

    /// An in-memory store (for testing).
    pub fn in_memory() -> Result<Self, ServiceError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self::wrap(conn, PathBuf::from(":memory:")))
    }

    fn init(conn: &Connection) -> Result<(), ServiceError> {
        conn.execute_batch(PRAGMAS)
            .map_err(|e| ServiceError::Store(format!("pragmas: {e}")))?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| ServiceError::Store(format!("schema: {e}")))?;
        Ok(())
    }

    fn wrap(conn: Connection, path: PathBuf) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            feed: ChangeFeed::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When `key` was last written, as RFC 3339.
    pub fn updated_at(&self, key: StoreKey) -> Result<Option<String>, ServiceError> {
        let conn = self.conn.lock();
        let at = conn
            .query_row(
                "SELECT updated_at FROM kv WHERE key = ?1",
                [key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(at)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>, ServiceError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key.as_str()], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<(), ServiceError> {
        {
            let conn = self.conn.lock();
            let _ = conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key.as_str(), value, chrono::Utc::now().to_rfc3339()],
            )?;
        }
        debug!(%key, "store set");
        self.feed.notify(key, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: StoreKey) -> Result<(), ServiceError> {
        let removed = {
            let conn = self.conn.lock();
            conn.execute("DELETE FROM kv WHERE key = ?1", [key.as_str()])?
        };
        if removed > 0 {
            debug!(%key, "store remove");
            self.feed.notify(key, None);
        }
        Ok(())
    }

    fn on_change(&self, key: StoreKey) -> BoxStream<'static, Option<String>> {
        self.feed.watch(key)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local store.
#[derive(Clone)]
pub struct MemoryStore {
    values: Arc<Mutex<HashMap<StoreKey, String>>>,
    feed: ChangeFeed,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            values: Arc::new(Mutex::new(HashMap::new())),
            feed: ChangeFeed::new(),
        }
    }

    /// A store pre-populated with `entries`.
    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (StoreKey, &'a str)>) -> Self {
        let store = Self::new();
        store
            .values
            .lock()
            .extend(entries.into_iter().map(|(k, v)| (k, v.to_string())));
        store
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: StoreKey) -> Result<Option<String>, ServiceError> {
        Ok(self.values.lock().get(&key).cloned())
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<(), ServiceError> {
        let _ = self.values.lock().insert(key, value.to_string());
        self.feed.notify(key, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: StoreKey) -> Result<(), ServiceError> {
        if self.values.lock().remove(&key).is_some() {
            self.feed.notify(key, None);
        }
        Ok(())
    }

    fn on_change(&self, key: StoreKey) -> BoxStream<'static, Option<String>> {
        self.feed.watch(key)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

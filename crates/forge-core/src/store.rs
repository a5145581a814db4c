//! Aggregate document persistence.
//!
//! An aggregate is persisted as one JSON document `{id, number, events,
//! state}` keyed by `(kind, id)`. [`DocumentStore::save`] overwrites the
//! whole document: there is no version check, so two concurrent
//! load-fold-save cycles on the same aggregate are last-write-wins.
//!
//! SQLite runtime defaults:
//! - `journal_mode = WAL` so readers do not block the writer
//! - `busy_timeout = 5s` to absorb short lock contention

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use crate::id::{AggregateId, AggregateKind};

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A persisted aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub kind: AggregateKind,
    pub id: AggregateId,
    pub body: Value,
}

/// Storage for aggregate documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load(
        &self,
        kind: AggregateKind,
        id: &AggregateId,
    ) -> Result<Option<Document>, StoreError>;

    /// Insert or overwrite the document for `(document.kind, document.id)`.
    async fn save(&self, document: Document) -> Result<(), StoreError>;

    /// Ids of every stored aggregate of `kind`, in id order.
    async fn list(&self, kind: AggregateKind) -> Result<Vec<AggregateId>, StoreError>;
}

/// Open the store selected by `config`.
///
/// # Errors
///
/// Returns an error if the SQLite database cannot be opened.
pub fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::open(&config.path)?)),
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<(AggregateKind, AggregateId), Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load(
        &self,
        kind: AggregateKind,
        id: &AggregateId,
    ) -> Result<Option<Document>, StoreError> {
        let documents = self.documents.read().await;
        Ok(documents.get(&(kind, id.clone())).map(|body| Document {
            kind,
            id: id.clone(),
            body: body.clone(),
        }))
    }

    async fn save(&self, document: Document) -> Result<(), StoreError> {
        self.documents
            .write()
            .await
            .insert((document.kind, document.id), document.body);
        Ok(())
    }

    async fn list(&self, kind: AggregateKind) -> Result<Vec<AggregateId>, StoreError> {
        let documents = self.documents.read().await;
        let mut ids: Vec<AggregateId> = documents
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS aggregates (
    kind TEXT NOT NULL,
    id   TEXT NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (kind, id)
);
";

/// Documents in a single SQLite table.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// database cannot be opened and configured.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create store directory {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open store database {}", path.display()))?;
        configure_connection(&conn).context("configure sqlite pragmas")?;
        conn.execute_batch(SCHEMA).context("create aggregates table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot create the database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn load(
        &self,
        kind: AggregateKind,
        id: &AggregateId,
    ) -> Result<Option<Document>, StoreError> {
        self.with_conn(|conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM aggregates WHERE kind = ?1 AND id = ?2",
                    params![kind.as_str(), id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            body.map(|body| {
                Ok::<_, StoreError>(Document {
                    kind,
                    id: id.clone(),
                    body: serde_json::from_str(&body)?,
                })
            })
            .transpose()
        })
    }

    async fn save(&self, document: Document) -> Result<(), StoreError> {
        let body = serde_json::to_string(&document.body)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO aggregates (kind, id, body) VALUES (?1, ?2, ?3)
                 ON CONFLICT (kind, id) DO UPDATE SET body = excluded.body",
                params![document.kind.as_str(), document.id.as_str(), body],
            )?;
            Ok(())
        })
    }

    async fn list(&self, kind: AggregateKind) -> Result<Vec<AggregateId>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM aggregates WHERE kind = ?1 ORDER BY id")?;
            let ids = stmt
                .query_map(params![kind.as_str()], |row| row.get::<_, String>(0))?
                .map(|id| id.map(AggregateId::new_unchecked))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}

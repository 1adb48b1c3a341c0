//! SQLite-backed note store.
//!
//! Persists notes locally so the last accepted version of every note
//! survives restarts and stays readable offline.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::notify::ChangeNotifier;
use crate::store::NoteStore;
use sharednotes_common::{Error, Note, Result};

struct Inner {
    conn: Connection,
    notifier: ChangeNotifier,
}

/// Note store using a single SQLite connection.
///
/// Queries run inline on the calling task while the connection lock is held.
pub struct SqliteNoteStore {
    inner: Mutex<Inner>,
}

impl SqliteNoteStore {
    /// Create or open a note database.
    ///
    /// # Arguments
    /// - `db_path`: Path to the SQLite database file
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path).map_err(storage_error)?;
        info!("Note database opened at {}", db_path.display());
        Self::from_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_error)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS notes (
                name TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(storage_error)?;

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                notifier: ChangeNotifier::new(),
            }),
        })
    }
}

fn storage_error(err: rusqlite::Error) -> Error {
    Error::Storage(err.to_string())
}

fn read_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    let version: i64 = row.get(2)?;
    Ok(Note {
        name: row.get(0)?,
        content: row.get(1)?,
        version: u64::try_from(version).unwrap_or_default(),
    })
}

fn query_one(conn: &Connection, name: &str) -> Result<Option<Note>> {
    conn.query_row(
        "SELECT name, content, version FROM notes WHERE name = ?1",
        [name],
        read_note,
    )
    .optional()
    .map_err(storage_error)
}

fn query_all(conn: &Connection) -> Result<Vec<Note>> {
    let mut stmt = conn
        .prepare("SELECT name, content, version FROM notes ORDER BY name")
        .map_err(storage_error)?;
    let notes = stmt
        .query_map([], read_note)
        .map_err(storage_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(storage_error)?;
    Ok(notes)
}

#[async_trait]
impl NoteStore for SqliteNoteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, name: &str) -> Result<Option<Note>> {
        let inner = self.inner.lock().await;
        query_one(&inner.conn, name)
    }

    async fn watch(&self, name: &str) -> Result<watch::Receiver<Option<Note>>> {
        let mut inner = self.inner.lock().await;
        let current = query_one(&inner.conn, name)?;
        Ok(inner.notifier.watch(name, current))
    }

    async fn list(&self) -> Result<Vec<Note>> {
        let inner = self.inner.lock().await;
        query_all(&inner.conn)
    }

    async fn watch_all(&self) -> Result<watch::Receiver<Vec<Note>>> {
        let mut inner = self.inner.lock().await;
        let current = query_all(&inner.conn)?;
        Ok(inner.notifier.watch_all(current))
    }

    async fn upsert(&self, note: &Note) -> Result<()> {
        note.validate()?;
        let version = i64::try_from(note.version)
            .map_err(|_| Error::InvalidInput(format!("Version out of range: {}", note.version)))?;

        let mut inner = self.inner.lock().await;
        inner
            .conn
            .execute(
                r#"
                INSERT OR REPLACE INTO notes (name, content, version)
                VALUES (?1, ?2, ?3)
                "#,
                params![note.name, note.content, version],
            )
            .map_err(storage_error)?;
        debug!("Stored {}", note);

        inner.notifier.notify(&note.name, Some(note.clone()));
        if inner.notifier.has_list_watchers() {
            let list = query_all(&inner.conn)?;
            inner.notifier.notify_all(list);
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let removed = inner
            .conn
            .execute("DELETE FROM notes WHERE name = ?1", [name])
            .map_err(storage_error)?;
        if removed == 0 {
            return Ok(false);
        }
        debug!("Deleted {}", name);

        inner.notifier.notify(name, None);
        if inner.notifier.has_list_watchers() {
            let list = query_all(&inner.conn)?;
            inner.notifier.notify_all(list);
        }
        Ok(true)
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        let found: Option<i64> = inner
            .conn
            .query_row("SELECT 1 FROM notes WHERE name = ?1", [name], |row| row.get(0))
            .optional()
            .map_err(storage_error)?;
        Ok(found.is_some())
    }
}

//! Local note store trait definition.

use async_trait::async_trait;
use tokio::sync::watch;

use sharednotes_common::{Note, Result};

/// Durable, observable key-value store of notes keyed by name.
///
/// Writes are stored verbatim: version bookkeeping is the caller's job.
/// Every write or delete is pushed to the watchers of the affected name and
/// to the watchers of the full list.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Get the current value for a name.
    async fn get(&self, name: &str) -> Result<Option<Note>>;

    /// Watch the value stored under a name.
    ///
    /// # Postconditions
    /// - The receiver starts at the current value (`None` if absent)
    /// - Every later upsert or delete of `name` marks it changed
    async fn watch(&self, name: &str) -> Result<watch::Receiver<Option<Note>>>;

    /// List all notes ordered by name.
    async fn list(&self) -> Result<Vec<Note>>;

    /// Watch the full list of notes.
    async fn watch_all(&self) -> Result<watch::Receiver<Vec<Note>>>;

    /// Insert or replace the note stored under `note.name`.
    ///
    /// # Errors
    /// - Empty name
    /// - Backend failure
    async fn upsert(&self, note: &Note) -> Result<()>;

    /// Delete a note.
    ///
    /// # Returns
    /// `true` if a note was removed, `false` if nothing was stored.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Check if a note exists.
    async fn exists(&self, name: &str) -> Result<bool>;
}

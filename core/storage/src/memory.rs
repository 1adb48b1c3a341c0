//! In-memory note store for testing.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::notify::ChangeNotifier;
use crate::store::NoteStore;
use sharednotes_common::{Note, Result};

struct Inner {
    notes: BTreeMap<String, Note>,
    notifier: ChangeNotifier,
}

impl Inner {
    fn snapshot(&self) -> Vec<Note> {
        self.notes.values().cloned().collect()
    }
}

/// In-memory note store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop.
pub struct MemoryNoteStore {
    inner: Mutex<Inner>,
    writes: AtomicU64,
}

impl MemoryNoteStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::with_notes(Vec::new())
    }

    /// Create a store pre-populated with notes, without counting writes.
    pub fn with_notes(notes: impl IntoIterator<Item = Note>) -> Self {
        let notes = notes
            .into_iter()
            .map(|note| (note.name.clone(), note))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                notes,
                notifier: ChangeNotifier::new(),
            }),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of upserts performed since creation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Default for MemoryNoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, name: &str) -> Result<Option<Note>> {
        Ok(self.inner.lock().await.notes.get(name).cloned())
    }

    async fn watch(&self, name: &str) -> Result<watch::Receiver<Option<Note>>> {
        let mut inner = self.inner.lock().await;
        let current = inner.notes.get(name).cloned();
        Ok(inner.notifier.watch(name, current))
    }

    async fn list(&self) -> Result<Vec<Note>> {
        Ok(self.inner.lock().await.snapshot())
    }

    async fn watch_all(&self) -> Result<watch::Receiver<Vec<Note>>> {
        let mut inner = self.inner.lock().await;
        let current = inner.snapshot();
        Ok(inner.notifier.watch_all(current))
    }

    async fn upsert(&self, note: &Note) -> Result<()> {
        note.validate()?;
        let mut inner = self.inner.lock().await;
        inner.notes.insert(note.name.clone(), note.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!("Stored {}", note);

        inner.notifier.notify(&note.name, Some(note.clone()));
        if inner.notifier.has_list_watchers() {
            let list = inner.snapshot();
            inner.notifier.notify_all(list);
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.notes.remove(name).is_none() {
            return Ok(false);
        }
        debug!("Deleted {}", name);

        inner.notifier.notify(name, None);
        if inner.notifier.has_list_watchers() {
            let list = inner.snapshot();
            inner.notifier.notify_all(list);
        }
        Ok(true)
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.inner.lock().await.notes.contains_key(name))
    }
}

//! Merging local and remote updates into one view per note.
//!
//! The local store is the single source of truth for what a note currently
//! is. Remote values never reach subscribers directly: a winning remote value
//! is written to the store, and the store's change notification is what the
//! view publishes.

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sharednotes_common::{Error, Note, Result};
use sharednotes_storage::NoteStore;

use crate::locks::NameLocks;
use crate::policy::{reconcile, Reconciliation};

/// Serialized write path into the local store.
///
/// Both remote write-backs and local edits go through here so the
/// read-compare-write for a name is never interleaved with another write to
/// the same name.
pub struct Reconciler {
    store: Arc<dyn NoteStore>,
    locks: NameLocks,
}

impl Reconciler {
    /// Create a reconciler over a store.
    pub fn new(store: Arc<dyn NoteStore>) -> Self {
        Self {
            store,
            locks: NameLocks::new(),
        }
    }

    /// Apply the reconciliation rule to a fetched note.
    ///
    /// # Postconditions
    /// - On `WriteBack`, the store holds `remote` verbatim (version not bumped)
    /// - On `Discard`, the store is untouched
    pub async fn apply_remote(&self, remote: &Note) -> Result<Reconciliation> {
        let _guard = self.locks.lock(&remote.name).await;
        let local = self.store.get(&remote.name).await?;

        let decision = reconcile(local.as_ref(), remote);
        match decision {
            Reconciliation::WriteBack => {
                self.store.upsert(remote).await?;
                info!(
                    "Remote {} replaces local v{}",
                    remote,
                    local.map_or_else(|| "-".to_string(), |n| n.version.to_string())
                );
            }
            Reconciliation::Discard => {
                debug!("Discarding remote {}: local is current", remote);
            }
        }
        Ok(decision)
    }

    /// Store a local edit one version above what is currently stored.
    ///
    /// When nothing is stored yet, the edit lands at `note.version + 1`.
    ///
    /// # Errors
    /// - Empty name
    /// - Version overflow
    /// - Store failure
    pub async fn upsert_local(&self, note: &Note) -> Result<Note> {
        note.validate()?;
        let _guard = self.locks.lock(&note.name).await;

        let base = match self.store.get(&note.name).await? {
            Some(previous) => previous.version,
            None => note.version,
        };
        let version = base
            .checked_add(1)
            .ok_or_else(|| Error::InvalidInput(format!("Version overflow for {}", note.name)))?;

        let stored = Note {
            version,
            ..note.clone()
        };
        self.store.upsert(&stored).await?;
        debug!("Local edit stored as {}", stored);
        Ok(stored)
    }
}

struct ViewState {
    current: Option<Note>,
    subscribers: Vec<mpsc::UnboundedSender<Option<Note>>>,
}

/// The continuously-updated value of one note.
///
/// Cloning yields another handle to the same view. Every subscriber receives
/// every update in the same order.
#[derive(Clone)]
pub struct MergedView {
    name: Arc<str>,
    state: Arc<Mutex<ViewState>>,
}

impl MergedView {
    /// Create a view starting at `current`.
    pub fn new(name: &str, current: Option<Note>) -> Self {
        Self {
            name: Arc::from(name),
            state: Arc::new(Mutex::new(ViewState {
                current,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Get the note name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current value.
    pub async fn current(&self) -> Option<Note> {
        self.state.lock().await.current.clone()
    }

    /// Start receiving updates.
    ///
    /// The snapshot and the registration happen atomically, so no update
    /// falls between `Subscription::initial` and the first streamed item.
    pub async fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        state.subscribers.push(tx);
        Subscription {
            name: self.name.to_string(),
            initial: state.current.clone(),
            updates: rx,
        }
    }

    /// Number of live subscribers.
    pub async fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock().await;
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }

    /// Set the current value and fan it out.
    pub(crate) async fn publish(&self, value: Option<Note>) {
        let mut state = self.state.lock().await;
        state.current = value.clone();
        state
            .subscribers
            .retain(|tx| tx.send(value.clone()).is_ok());
    }

    /// End every subscriber's stream.
    pub(crate) async fn close(&self) {
        self.state.lock().await.subscribers.clear();
    }
}

/// One subscriber's feed of a merged view.
///
/// Yields `Some(note)` for every stored value and `None` when the note is
/// deleted locally. The stream ends when syncing for the name stops.
pub struct Subscription {
    name: String,
    initial: Option<Note>,
    updates: mpsc::UnboundedReceiver<Option<Note>>,
}

impl Subscription {
    /// Get the note name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of the view when the subscription was taken.
    pub fn initial(&self) -> Option<&Note> {
        self.initial.as_ref()
    }

    /// Wait for the next update.
    ///
    /// # Returns
    /// `None` once syncing for the name has stopped.
    pub async fn next_update(&mut self) -> Option<Option<Note>> {
        self.updates.recv().await
    }
}

impl Stream for Subscription {
    type Item = Option<Note>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().updates.poll_recv(cx)
    }
}

/// Background task feeding one merged view.
pub struct Synchronizer {
    view: MergedView,
    reconciler: Arc<Reconciler>,
}

impl Synchronizer {
    /// Create a synchronizer for a view.
    pub fn new(view: MergedView, reconciler: Arc<Reconciler>) -> Self {
        Self { view, reconciler }
    }

    /// Spawn the merge loop.
    ///
    /// `local` is the store's watch for the view's name, `remote` carries
    /// fetched notes from the poller, and `stop` ends the loop when it flips
    /// to `true` or its sender is dropped.
    pub fn spawn(
        self,
        local: watch::Receiver<Option<Note>>,
        remote: mpsc::Receiver<Note>,
        stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(local, remote, stop))
    }

    async fn run(
        self,
        mut local: watch::Receiver<Option<Note>>,
        mut remote: mpsc::Receiver<Note>,
        mut stop: watch::Receiver<bool>,
    ) {
        let name = self.view.name().to_string();
        debug!("Synchronizer started for {}", name);

        // Writes may land between seeding the view and this task's first poll.
        let seen = local.borrow_and_update().clone();
        if seen != self.view.current().await {
            self.view.publish(seen).await;
        }

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                changed = local.changed() => {
                    if changed.is_err() {
                        warn!("Local store stopped notifying for {}", name);
                        break;
                    }
                    let value = local.borrow_and_update().clone();
                    self.view.publish(value).await;
                }

                Some(note) = remote.recv() => {
                    if note.name != name {
                        warn!("Ignoring remote {} on the {} channel", note, name);
                        continue;
                    }
                    if let Err(e) = self.reconciler.apply_remote(&note).await {
                        warn!("Failed to apply remote {}: {}", note, e);
                    }
                }

                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.view.close().await;
        debug!("Synchronizer stopped for {}", name);
    }
}

//! One poller and synchronizer per note name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sharednotes_common::{Error, Result};
use sharednotes_storage::{NoteApi, NoteStore};

use crate::poller::{Poller, PollerConfig};
use crate::state::PollState;
use crate::synchronizer::{MergedView, Reconciler, Synchronizer};

/// Live background activity for one name.
struct Pairing {
    view: MergedView,
    stop: watch::Sender<bool>,
    poller: JoinHandle<()>,
    synchronizer: JoinHandle<()>,
}

impl Pairing {
    async fn stop(self, name: &str) {
        let _ = self.stop.send(true);
        if let Err(e) = self.poller.await {
            warn!("Poller for {} ended abnormally: {}", name, e);
        }
        if let Err(e) = self.synchronizer.await {
            warn!("Synchronizer for {} ended abnormally: {}", name, e);
        }
    }
}

/// Tracks the pairing for every subscribed name.
///
/// Keys are exact note names. Concurrent requests for an unseen name are
/// serialized, so exactly one pairing is ever started per name.
pub struct SyncRegistry {
    store: Arc<dyn NoteStore>,
    api: Arc<dyn NoteApi>,
    reconciler: Arc<Reconciler>,
    state: Arc<RwLock<PollState>>,
    poller_config: PollerConfig,
    update_buffer: usize,
    pairings: Mutex<HashMap<String, Pairing>>,
    closed: AtomicBool,
}

impl SyncRegistry {
    /// Create an empty registry.
    pub fn new(
        store: Arc<dyn NoteStore>,
        api: Arc<dyn NoteApi>,
        reconciler: Arc<Reconciler>,
        state: Arc<RwLock<PollState>>,
        poller_config: PollerConfig,
        update_buffer: usize,
    ) -> Self {
        Self {
            store,
            api,
            reconciler,
            state,
            poller_config,
            update_buffer: update_buffer.max(1),
            pairings: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the view for `name`, starting its poller and synchronizer on first use.
    ///
    /// Never waits on the network: the first fetch runs in the spawned poller.
    ///
    /// # Errors
    /// - Registry shut down
    /// - Local store failure while setting up the watch
    pub async fn get_or_create(&self, name: &str) -> Result<MergedView> {
        let mut pairings = self.pairings.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Shutdown("sync registry is closed".to_string()));
        }
        if let Some(pairing) = pairings.get(name) {
            return Ok(pairing.view.clone());
        }

        let local = self.store.watch(name).await?;
        let initial = local.borrow().clone();
        let view = MergedView::new(name, initial);

        let (stop_tx, stop_rx) = watch::channel(false);
        let (update_tx, update_rx) = mpsc::channel(self.update_buffer);

        let synchronizer = Synchronizer::new(view.clone(), self.reconciler.clone()).spawn(
            local,
            update_rx,
            stop_rx.clone(),
        );
        let poller = Poller::new(
            name,
            self.api.clone(),
            self.poller_config,
            update_tx,
            self.state.clone(),
        )
        .spawn(stop_rx);

        pairings.insert(
            name.to_string(),
            Pairing {
                view: view.clone(),
                stop: stop_tx,
                poller,
                synchronizer,
            },
        );
        info!("Started syncing {}", name);

        Ok(view)
    }

    /// Check if a name is being synced.
    pub async fn contains(&self, name: &str) -> bool {
        self.pairings.lock().await.contains_key(name)
    }

    /// Names currently being synced, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pairings.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of live pairings.
    pub async fn len(&self) -> usize {
        self.pairings.lock().await.len()
    }

    /// Check if nothing is being synced.
    pub async fn is_empty(&self) -> bool {
        self.pairings.lock().await.is_empty()
    }

    /// Stop syncing one name.
    ///
    /// Its subscribers' streams end. A later `get_or_create` starts afresh.
    ///
    /// # Returns
    /// `true` if the name was being synced.
    pub async fn stop(&self, name: &str) -> bool {
        let pairing = self.pairings.lock().await.remove(name);
        match pairing {
            Some(pairing) => {
                pairing.stop(name).await;
                self.state.write().await.remove(name);
                info!("Stopped syncing {}", name);
                true
            }
            None => false,
        }
    }

    /// Stop every pairing and refuse new ones.
    pub async fn shutdown(&self) {
        let pairings: Vec<(String, Pairing)> = {
            let mut pairings = self.pairings.lock().await;
            self.closed.store(true, Ordering::SeqCst);
            pairings.drain().collect()
        };

        let count = pairings.len();
        for (name, pairing) in pairings {
            pairing.stop(&name).await;
        }
        info!("Sync registry shut down ({} names stopped)", count);
    }
}

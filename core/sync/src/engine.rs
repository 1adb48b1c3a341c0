//! Application-facing sync engine.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use sharednotes_common::{Error, Note, Result};
use sharednotes_storage::{NoteApi, NoteStore};

use crate::deadline::{within, Deadline};
use crate::poller::PollerConfig;
use crate::policy::Reconciliation;
use crate::registry::SyncRegistry;
use crate::state::{PollState, PollStatus};
use crate::synchronizer::{MergedView, Reconciler, Subscription};

/// Durations in config files are whole milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Configuration for the sync engine.
///
/// In JSON the durations are `*_ms` keys, e.g. `{"poll_interval_ms": 3000}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Time between remote fetches for each subscribed name.
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    /// Upper bound on a single remote fetch.
    #[serde(rename = "fetch_timeout_ms", with = "millis")]
    pub fetch_timeout: Duration,
    /// Upper bound on a single remote store.
    #[serde(rename = "store_timeout_ms", with = "millis")]
    pub store_timeout: Duration,
    /// Fetched notes buffered between a poller and its synchronizer.
    pub update_buffer: usize,
}

impl SyncConfig {
    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the store timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Set the update buffer size.
    pub fn with_update_buffer(mut self, size: usize) -> Self {
        self.update_buffer = size;
        self
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    /// - Zero poll interval (the poll loop would spin)
    /// - Zero fetch or store timeout
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidInput("poll_interval must be positive".to_string()));
        }
        if self.fetch_timeout.is_zero() || self.store_timeout.is_zero() {
            return Err(Error::InvalidInput("timeouts must be positive".to_string()));
        }
        Ok(())
    }

    fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
            fetch_timeout: self.fetch_timeout,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            fetch_timeout: Duration::from_secs(1),
            store_timeout: Duration::from_secs(5),
            update_buffer: 16,
        }
    }
}

/// What happened to the remote side of a bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRead {
    /// The server's note was newer and is now stored locally.
    Applied,
    /// The server's note was not newer than the local one.
    Discarded,
    /// The server has no such note.
    Absent,
    /// The fetch failed.
    Failed(String),
    /// The deadline passed before the server answered.
    Elapsed,
}

/// Result of a bounded synced read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedRead {
    /// Local value after the remote side was handled.
    pub note: Option<Note>,
    /// Remote side outcome.
    pub remote: RemoteRead,
}

/// Main sync engine for keeping local notes in step with the server.
///
/// Constructed explicitly with its store and remote client; nothing here is
/// process-global.
pub struct SyncEngine {
    /// Local note store.
    store: Arc<dyn NoteStore>,
    /// Remote notes service.
    api: Arc<dyn NoteApi>,
    /// Serialized local write path.
    reconciler: Arc<Reconciler>,
    /// Per-name background activity.
    registry: SyncRegistry,
    /// Poll diagnostics.
    state: Arc<RwLock<PollState>>,
    /// Configuration.
    config: SyncConfig,
}

impl SyncEngine {
    /// Create a new sync engine.
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(
        store: Arc<dyn NoteStore>,
        api: Arc<dyn NoteApi>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;

        let reconciler = Arc::new(Reconciler::new(store.clone()));
        let state = Arc::new(RwLock::new(PollState::new()));
        let registry = SyncRegistry::new(
            store.clone(),
            api.clone(),
            reconciler.clone(),
            state.clone(),
            config.poller_config(),
            config.update_buffer,
        );

        info!(
            "Sync engine ready (store: {}, poll every {:?})",
            store.name(),
            config.poll_interval
        );

        Ok(Self {
            store,
            api,
            reconciler,
            registry,
            state,
            config,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Get the merged view for a name, starting background sync on first use.
    pub async fn view(&self, name: &str) -> Result<MergedView> {
        self.registry.get_or_create(name).await
    }

    /// Subscribe to a note.
    ///
    /// Returns immediately; the initial value may be absent and fills in
    /// once the local store or the first poll produces one.
    pub async fn subscribe(&self, name: &str) -> Result<Subscription> {
        let view = self.registry.get_or_create(name).await?;
        Ok(view.subscribe().await)
    }

    /// Store a local edit, bumping the version by one.
    pub async fn upsert_local(&self, note: &Note) -> Result<Note> {
        self.reconciler.upsert_local(note).await
    }

    /// Store a note on the server as-is.
    ///
    /// # Errors
    /// - `Timeout` past `store_timeout`
    /// - Any error from the remote client
    pub async fn store_remote(&self, note: &Note) -> Result<String> {
        match within(self.config.store_timeout, self.api.store(note)).await {
            Deadline::Completed(result) => result,
            Deadline::Elapsed => Err(Error::Timeout(format!(
                "store of {} exceeded {:?}",
                note, self.config.store_timeout
            ))),
        }
    }

    /// Store a local edit, then push the stored note to the server.
    ///
    /// The local write is kept even when the remote store fails; the error
    /// is returned so the caller knows the server did not get it.
    ///
    /// # Returns
    /// The note as stored locally (and remotely).
    pub async fn write_and_sync(&self, note: &Note) -> Result<Note> {
        let stored = self.upsert_local(note).await?;

        match self.store_remote(&stored).await {
            Ok(reply) => {
                debug!("Server accepted {}: {}", stored, reply);
                Ok(stored)
            }
            Err(e) => {
                error!("Remote store of {} failed (kept locally): {}", stored, e);
                Err(e)
            }
        }
    }

    /// Same as [`SyncEngine::write_and_sync`].
    pub async fn upsert_synced(&self, note: &Note) -> Result<Note> {
        self.write_and_sync(note).await
    }

    /// Fetch once, bounded by `deadline`, and return the local value after
    /// reconciling whatever arrived.
    ///
    /// Remote failures are reported in [`SyncedRead::remote`], not as errors;
    /// only local store failures are errors.
    pub async fn read_synced(&self, name: &str, deadline: Duration) -> Result<SyncedRead> {
        let remote = match within(deadline, self.api.fetch(name)).await {
            Deadline::Completed(Ok(note)) => {
                if note.name != name {
                    RemoteRead::Failed(format!("server returned {} for {}", note, name))
                } else {
                    match self.reconciler.apply_remote(&note).await? {
                        Reconciliation::WriteBack => RemoteRead::Applied,
                        Reconciliation::Discard => RemoteRead::Discarded,
                    }
                }
            }
            Deadline::Completed(Err(e)) if e.is_not_found() => RemoteRead::Absent,
            Deadline::Completed(Err(e)) => {
                warn!("Synced read of {} fell back to local: {}", name, e);
                RemoteRead::Failed(e.to_string())
            }
            Deadline::Elapsed => {
                warn!("Synced read of {} timed out after {:?}", name, deadline);
                RemoteRead::Elapsed
            }
        };

        let note = self.store.get(name).await?;
        Ok(SyncedRead { note, remote })
    }

    /// Get the locally stored note.
    pub async fn get_local(&self, name: &str) -> Result<Option<Note>> {
        self.store.get(name).await
    }

    /// List all locally stored notes.
    pub async fn list_local(&self) -> Result<Vec<Note>> {
        self.store.list().await
    }

    /// Watch the list of locally stored notes.
    pub async fn watch_all_local(&self) -> Result<watch::Receiver<Vec<Note>>> {
        self.store.watch_all().await
    }

    /// Delete a note locally.
    ///
    /// Subscribers see an absent value. A later poll that finds the note on
    /// the server stores it again.
    pub async fn delete_local(&self, name: &str) -> Result<bool> {
        self.store.delete(name).await
    }

    /// Check if a note is stored locally.
    pub async fn exists_local(&self, name: &str) -> Result<bool> {
        self.store.exists(name).await
    }

    /// Poll diagnostics for a name.
    pub async fn poll_status(&self, name: &str) -> Option<PollStatus> {
        self.state.read().await.get(name).cloned()
    }

    /// Poll diagnostics for every synced name.
    pub async fn poll_statuses(&self) -> Vec<PollStatus> {
        self.state
            .read()
            .await
            .statuses()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Names currently being synced.
    pub async fn synced_names(&self) -> Vec<String> {
        self.registry.names().await
    }

    /// Stop background sync for one name.
    pub async fn stop(&self, name: &str) -> bool {
        self.registry.stop(name).await
    }

    /// Stop all background sync.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedApi;
    use futures::StreamExt;
    use sharednotes_storage::MemoryNoteStore;

    const WAIT: Duration = Duration::from_secs(30);

    fn engine(store: Arc<MemoryNoteStore>, api: Arc<ScriptedApi>) -> SyncEngine {
        SyncEngine::new(store, api, SyncConfig::default()).unwrap()
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config = SyncConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.fetch_timeout, Duration::from_secs(1));
        assert!(config.validate().is_ok());

        let bad = SyncConfig::default().with_poll_interval(Duration::ZERO);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"update_buffer": 4}"#).unwrap();
        assert_eq!(config.update_buffer, 4);
        assert_eq!(config.poll_interval, Duration::from_secs(3));
    }

    #[test]
    fn test_config_durations_are_millis() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"poll_interval_ms": 500, "fetch_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.fetch_timeout, Duration::from_millis(250));
        assert_eq!(config.store_timeout, Duration::from_secs(5));

        let json = serde_json::to_value(SyncConfig::default()).unwrap();
        assert_eq!(json["poll_interval_ms"], 3000);
        assert_eq!(json["store_timeout_ms"], 5000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_remote_converges() {
        let store = Arc::new(MemoryNoteStore::with_notes(vec![Note::with_version(
            "foo", "old text", 2,
        )]));
        let api = Arc::new(ScriptedApi::with_note(Note::with_version("foo", "new text", 5)));
        let engine = engine(store.clone(), api);

        let mut sub = engine.subscribe("foo").await.unwrap();
        assert_eq!(sub.initial().unwrap().version, 2);

        let update = tokio::time::timeout(WAIT, sub.next_update())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(update.version, 5);
        assert_eq!(update.content, "new text");

        let local = engine.get_local("foo").await.unwrap().unwrap();
        assert_eq!(local.version, 5);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_remote_leaves_view_alone() {
        let store = Arc::new(MemoryNoteStore::with_notes(vec![Note::with_version(
            "bar", "mine", 7,
        )]));
        let api = Arc::new(ScriptedApi::with_note(Note::with_version("bar", "theirs", 3)));
        let engine = engine(store.clone(), api.clone());

        let view = engine.view("bar").await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(api.fetch_count("bar") >= 3);
        assert_eq!(view.current().await.unwrap().version, 7);
        assert_eq!(store.write_count(), 0);
        assert_eq!(engine.poll_status("bar").await.unwrap().remote_version, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_everywhere_stays_empty() {
        let store = Arc::new(MemoryNoteStore::new());
        let api = Arc::new(ScriptedApi::new());
        let engine = engine(store.clone(), api.clone());

        let sub = engine.subscribe("baz").await.unwrap();
        assert!(sub.initial().is_none());
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(api.fetch_count("baz") >= 3);
        assert!(engine.view("baz").await.unwrap().current().await.is_none());
        assert_eq!(store.write_count(), 0);

        let status = engine.poll_status("baz").await.unwrap();
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.cycles >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_appears_later() {
        let store = Arc::new(MemoryNoteStore::new());
        let api = Arc::new(ScriptedApi::new());
        let engine = engine(store, api.clone());

        let mut sub = engine.subscribe("baz").await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        api.set_remote(Note::with_version("baz", "hello", 1));

        let update = tokio::time::timeout(WAIT, sub.next_update())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(update.content, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_share_one_poller_and_sequence() {
        let store = Arc::new(MemoryNoteStore::new());
        let api = Arc::new(ScriptedApi::with_note(Note::with_version("foo", "v1", 1)));
        let engine = engine(store, api.clone());

        let (a, b) = tokio::join!(engine.subscribe("foo"), engine.subscribe("foo"));
        let mut a = a.unwrap();
        let mut b = b.unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        api.set_remote(Note::with_version("foo", "v2", 2));
        tokio::time::sleep(Duration::from_secs(6)).await;

        // Ticks at 0s, 3s, 6s and 9s.
        assert_eq!(api.fetch_count("foo"), 4);
        assert_eq!(engine.synced_names().await, vec!["foo".to_string()]);

        let mut seen_a = Vec::new();
        let mut seen_b = Vec::new();
        for _ in 0..2 {
            seen_a.push(a.next().await.unwrap().unwrap().version);
            seen_b.push(b.next().await.unwrap().unwrap().version);
        }
        assert_eq!(seen_a, vec![1, 2]);
        assert_eq!(seen_a, seen_b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_fetch_never_touches_view() {
        let store = Arc::new(MemoryNoteStore::with_notes(vec![Note::with_version(
            "foo", "mine", 2,
        )]));
        let api = Arc::new(ScriptedApi::with_note(Note::with_version("foo", "theirs", 9)));
        api.fail_fetches(true);
        let engine = engine(store.clone(), api.clone());

        let view = engine.view("foo").await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(view.current().await.unwrap().version, 2);
        assert_eq!(engine.poll_status("foo").await.unwrap().consecutive_failures, 4);

        // Slow server: every fetch runs past the timeout.
        api.fail_fetches(false);
        api.set_delay(Some(Duration::from_secs(2)));
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(view.current().await.unwrap().version, 2);
        assert_eq!(store.write_count(), 0);

        // Server recovers; the same loop picks it up.
        api.set_delay(None);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(view.current().await.unwrap().version, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_local_ignores_unmerged_remote() {
        let store = Arc::new(MemoryNoteStore::with_notes(vec![Note::with_version(
            "foo", "mine", 3,
        )]));
        let api = Arc::new(ScriptedApi::with_note(Note::with_version("foo", "theirs", 2)));
        let engine = engine(store, api);
        let _view = engine.view("foo").await.unwrap();

        let stored = engine
            .upsert_local(&Note::with_version("foo", "edit", 100))
            .await
            .unwrap();
        assert_eq!(stored.version, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_and_sync_pushes_incremented_note() {
        let store = Arc::new(MemoryNoteStore::with_notes(vec![Note::with_version(
            "foo", "old", 4,
        )]));
        let api = Arc::new(ScriptedApi::new());
        let engine = engine(store, api.clone());

        let stored = engine.write_and_sync(&Note::new("foo", "new")).await.unwrap();
        assert_eq!(stored.version, 5);
        assert_eq!(api.stored(), vec![Note::with_version("foo", "new", 5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_and_sync_keeps_local_on_failure() {
        let store = Arc::new(MemoryNoteStore::new());
        let api = Arc::new(ScriptedApi::new());
        api.fail_stores(true);
        let engine = engine(store, api.clone());

        let result = engine.upsert_synced(&Note::new("foo", "draft")).await;
        assert!(matches!(result, Err(Error::Transport(_))));

        let local = engine.get_local("foo").await.unwrap().unwrap();
        assert_eq!(local.version, 1);
        assert_eq!(local.content, "draft");
        assert!(api.stored().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_remote_times_out() {
        let store = Arc::new(MemoryNoteStore::new());
        let api = Arc::new(ScriptedApi::new());
        api.set_delay(Some(Duration::from_secs(60)));
        let engine = engine(store, api);

        let result = engine.store_remote(&Note::with_version("foo", "x", 1)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_synced_outcomes() {
        let store = Arc::new(MemoryNoteStore::with_notes(vec![Note::with_version(
            "foo", "old text", 2,
        )]));
        let api = Arc::new(ScriptedApi::with_note(Note::with_version("foo", "new text", 5)));
        let engine = engine(store, api.clone());
        let deadline = Duration::from_secs(1);

        let read = engine.read_synced("foo", deadline).await.unwrap();
        assert_eq!(read.remote, RemoteRead::Applied);
        assert_eq!(read.note.unwrap().version, 5);

        let read = engine.read_synced("foo", deadline).await.unwrap();
        assert_eq!(read.remote, RemoteRead::Discarded);

        let read = engine.read_synced("baz", deadline).await.unwrap();
        assert_eq!(read.remote, RemoteRead::Absent);
        assert!(read.note.is_none());

        api.set_delay(Some(Duration::from_secs(5)));
        let read = engine.read_synced("foo", deadline).await.unwrap();
        assert_eq!(read.remote, RemoteRead::Elapsed);
        assert_eq!(read.note.unwrap().version, 5);

        api.set_delay(None);
        api.fail_fetches(true);
        let read = engine.read_synced("foo", deadline).await.unwrap();
        assert!(matches!(read.remote, RemoteRead::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_local_publishes_absence() {
        let store = Arc::new(MemoryNoteStore::with_notes(vec![Note::with_version(
            "foo", "x", 1,
        )]));
        let api = Arc::new(ScriptedApi::new());
        let engine = engine(store, api);

        let mut sub = engine.subscribe("foo").await.unwrap();
        assert!(engine.delete_local("foo").await.unwrap());
        assert!(!engine.exists_local("foo").await.unwrap());

        assert_eq!(sub.next_update().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_right_after_subscribe_is_seen() {
        let store = Arc::new(MemoryNoteStore::new());
        let engine = engine(store.clone(), Arc::new(ScriptedApi::new()));

        let view = engine.view("foo").await.unwrap();
        let mut sub = view.subscribe().await;
        engine.upsert_local(&Note::new("foo", "draft")).await.unwrap();

        let update = tokio::time::timeout(Duration::from_millis(500), sub.next_update())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(update.version, 1);
        assert_eq!(view.current().await, store.get("foo").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_and_watch_all_local() {
        let store = Arc::new(MemoryNoteStore::new());
        let engine = engine(store, Arc::new(ScriptedApi::new()));
        let mut all = engine.watch_all_local().await.unwrap();

        engine.upsert_local(&Note::new("a", "1")).await.unwrap();
        all.changed().await.unwrap();
        assert_eq!(all.borrow_and_update().len(), 1);
        assert_eq!(engine.list_local().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_streams() {
        let store = Arc::new(MemoryNoteStore::new());
        let api = Arc::new(ScriptedApi::new());
        let engine = engine(store, api.clone());

        let mut sub = engine.subscribe("foo").await.unwrap();
        engine.shutdown().await;

        assert!(sub.next_update().await.is_none());
        assert!(matches!(
            engine.subscribe("foo").await,
            Err(Error::Shutdown(_))
        ));

        let fetched = api.fetch_count("foo");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(api.fetch_count("foo"), fetched);
    }
}

//! Periodic remote fetch for one note name.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use sharednotes_common::{Error, Note};
use sharednotes_storage::NoteApi;

use crate::deadline::{within, Deadline};
use crate::state::PollState;

/// Timing for a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Time between fetch attempts.
    pub interval: Duration,
    /// Upper bound on a single fetch.
    pub fetch_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            fetch_timeout: Duration::from_secs(1),
        }
    }
}

/// Outcome of a single poll cycle.
#[derive(Debug)]
pub enum PollOutcome {
    /// The server returned the note.
    Fetched(Note),
    /// The server has no note under this name.
    Absent,
    /// The fetch failed or ran past its timeout.
    Failed(Error),
}

/// Fetches one name on a fixed interval and forwards results.
///
/// Failures never end the loop; the next tick simply tries again.
pub struct Poller {
    name: String,
    api: Arc<dyn NoteApi>,
    config: PollerConfig,
    updates: mpsc::Sender<Note>,
    state: Arc<RwLock<PollState>>,
}

impl Poller {
    /// Create a poller sending fetched notes into `updates`.
    pub fn new(
        name: impl Into<String>,
        api: Arc<dyn NoteApi>,
        config: PollerConfig,
        updates: mpsc::Sender<Note>,
        state: Arc<RwLock<PollState>>,
    ) -> Self {
        Self {
            name: name.into(),
            api,
            config,
            updates,
            state,
        }
    }

    /// Spawn the poll loop.
    ///
    /// The first fetch happens right away. The loop ends when `stop` flips to
    /// `true`, its sender is dropped, or the receiving side of `updates` is gone.
    pub fn spawn(self, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }

    async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Poller started for {} (every {:?})",
            self.name, self.config.interval
        );

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let outcome = self.poll_once().await;
                    self.record(&outcome).await;

                    match outcome {
                        PollOutcome::Fetched(note) => {
                            if self.updates.send(note).await.is_err() {
                                debug!("Synchronizer for {} is gone", self.name);
                                break;
                            }
                        }
                        PollOutcome::Absent => {
                            debug!("No remote note named {}", self.name);
                        }
                        PollOutcome::Failed(e) => {
                            warn!("Poll for {} skipped: {}", self.name, e);
                        }
                    }
                }
            }
        }

        info!("Poller stopped for {}", self.name);
    }

    /// Run one bounded fetch.
    pub async fn poll_once(&self) -> PollOutcome {
        match within(self.config.fetch_timeout, self.api.fetch(&self.name)).await {
            Deadline::Completed(Ok(note)) => PollOutcome::Fetched(note),
            Deadline::Completed(Err(e)) if e.is_not_found() => PollOutcome::Absent,
            Deadline::Completed(Err(e)) => PollOutcome::Failed(e),
            Deadline::Elapsed => PollOutcome::Failed(Error::Timeout(format!(
                "fetch of {} exceeded {:?}",
                self.name, self.config.fetch_timeout
            ))),
        }
    }

    async fn record(&self, outcome: &PollOutcome) {
        let mut state = self.state.write().await;
        let status = state.entry(&self.name);
        match outcome {
            PollOutcome::Fetched(note) => status.mark_fetched(note.version),
            PollOutcome::Absent => status.mark_absent(),
            PollOutcome::Failed(e) => status.mark_failed(e.to_string()),
        }
    }
}

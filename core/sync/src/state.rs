//! Poll status tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use sharednotes_common::{Error, Result};

/// Poll history for a single note name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollStatus {
    /// Note name.
    pub name: String,
    /// Number of completed poll cycles.
    pub cycles: u64,
    /// Last cycle time, whatever its outcome.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Last time the server returned the note.
    pub last_success: Option<DateTime<Utc>>,
    /// Version seen in the last successful fetch.
    pub remote_version: Option<u64>,
    /// Failed cycles since the last success or absence.
    pub consecutive_failures: u32,
    /// Last error message if the last cycle failed.
    pub last_error: Option<String>,
}

impl PollStatus {
    /// Create an empty status for a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cycles: 0,
            last_attempt: None,
            last_success: None,
            remote_version: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    /// Record a successful fetch.
    pub fn mark_fetched(&mut self, version: u64) {
        let now = Utc::now();
        self.cycles += 1;
        self.last_attempt = Some(now);
        self.last_success = Some(now);
        self.remote_version = Some(version);
        self.consecutive_failures = 0;
        self.last_error = None;
    }

    /// Record a cycle where the server had no such note.
    pub fn mark_absent(&mut self) {
        self.cycles += 1;
        self.last_attempt = Some(Utc::now());
        self.remote_version = None;
        self.consecutive_failures = 0;
        self.last_error = None;
    }

    /// Record a failed cycle.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.cycles += 1;
        self.last_attempt = Some(Utc::now());
        self.consecutive_failures += 1;
        self.last_error = Some(error.into());
    }

    /// Check if the server was unreachable for the last `threshold` cycles.
    pub fn is_degraded(&self, threshold: u32) -> bool {
        threshold > 0 && self.consecutive_failures >= threshold
    }
}

/// Poll status for every polled name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollState {
    entries: HashMap<String, PollStatus>,
}

impl PollState {
    /// Create a new empty poll state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get status for a name.
    pub fn get(&self, name: &str) -> Option<&PollStatus> {
        self.entries.get(name)
    }

    /// Get or create the status for a name.
    pub fn entry(&mut self, name: &str) -> &mut PollStatus {
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| PollStatus::new(name))
    }

    /// Remove a name.
    pub fn remove(&mut self, name: &str) -> Option<PollStatus> {
        self.entries.remove(name)
    }

    /// Get all statuses ordered by name.
    pub fn statuses(&self) -> Vec<&PollStatus> {
        let mut statuses: Vec<&PollStatus> = self.entries.values().collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Names whose last `threshold` cycles all failed.
    pub fn degraded(&self, threshold: u32) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .values()
            .filter(|s| s.is_degraded(threshold))
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

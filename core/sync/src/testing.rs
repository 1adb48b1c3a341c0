//! Scripted remote service for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use sharednotes_common::{Error, Note, Result};
use sharednotes_storage::NoteApi;

#[derive(Default)]
struct Script {
    notes: HashMap<String, Note>,
    fetches: HashMap<String, usize>,
    stored: Vec<Note>,
    fail_fetch: bool,
    fail_store: bool,
    delay: Option<Duration>,
}

/// In-memory `NoteApi` whose behavior tests can change mid-run.
#[derive(Default)]
pub struct ScriptedApi {
    script: Mutex<Script>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_note(note: Note) -> Self {
        let api = Self::new();
        api.set_remote(note);
        api
    }

    pub fn set_remote(&self, note: Note) {
        self.script.lock().unwrap().notes.insert(note.name.clone(), note);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.script.lock().unwrap().fail_fetch = fail;
    }

    pub fn fail_stores(&self, fail: bool) {
        self.script.lock().unwrap().fail_store = fail;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.script.lock().unwrap().delay = delay;
    }

    pub fn fetch_count(&self, name: &str) -> usize {
        self.script.lock().unwrap().fetches.get(name).copied().unwrap_or(0)
    }

    pub fn stored(&self) -> Vec<Note> {
        self.script.lock().unwrap().stored.clone()
    }
}

#[async_trait]
impl NoteApi for ScriptedApi {
    async fn fetch(&self, name: &str) -> Result<Note> {
        let (delay, outcome) = {
            let mut script = self.script.lock().unwrap();
            *script.fetches.entry(name.to_string()).or_insert(0) += 1;
            let outcome = if script.fail_fetch {
                Err(Error::Transport("connection refused".to_string()))
            } else {
                script
                    .notes
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(name.to_string()))
            };
            (script.delay, outcome)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }

    async fn store(&self, note: &Note) -> Result<String> {
        let delay = {
            let mut script = self.script.lock().unwrap();
            if script.fail_store {
                return Err(Error::Transport("connection refused".to_string()));
            }
            script.stored.push(note.clone());
            script.notes.insert(note.name.clone(), note.clone());
            script.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(format!("stored {}", note))
    }
}

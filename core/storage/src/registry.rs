//! Local store backends selectable by name.
//!
//! Each backend declares the configuration keys it accepts. Configuration is
//! checked against that declaration before the backend's constructor runs, so
//! a typo such as `"pth"` is reported instead of silently ignored.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::store::NoteStore;
use sharednotes_common::{Error, Result};

/// Constructor for a backend, given its already-checked options.
pub type StoreFactory =
    Box<dyn Fn(&Map<String, Value>) -> Result<Arc<dyn NoteStore>> + Send + Sync>;

/// A named store backend and the options it takes.
pub struct StoreBackend {
    required: Vec<&'static str>,
    optional: Vec<&'static str>,
    factory: StoreFactory,
}

impl StoreBackend {
    /// Backend with no options.
    pub fn new(factory: StoreFactory) -> Self {
        Self {
            required: Vec::new(),
            optional: Vec::new(),
            factory,
        }
    }

    /// Require a non-empty string option.
    pub fn require(mut self, key: &'static str) -> Self {
        self.required.push(key);
        self
    }

    /// Accept an option without requiring it.
    pub fn allow(mut self, key: &'static str) -> Self {
        self.optional.push(key);
        self
    }

    fn check(&self, backend: &str, config: &Map<String, Value>) -> Result<()> {
        for key in &self.required {
            match config.get(*key) {
                Some(Value::String(s)) if !s.is_empty() => {}
                Some(_) => {
                    return Err(Error::InvalidInput(format!(
                        "Store backend '{}': '{}' must be a non-empty string",
                        backend, key
                    )))
                }
                None => {
                    return Err(Error::InvalidInput(format!(
                        "Store backend '{}' requires '{}'",
                        backend, key
                    )))
                }
            }
        }

        let known = |key: &str| self.required.contains(&key) || self.optional.contains(&key);
        if let Some(unknown) = config.keys().find(|key| !known(key)) {
            return Err(Error::InvalidInput(format!(
                "Store backend '{}' has no option '{}'",
                backend, unknown
            )));
        }
        Ok(())
    }
}

/// Registry of local store backends.
pub struct StoreRegistry {
    backends: BTreeMap<String, StoreBackend>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            backends: BTreeMap::new(),
        }
    }

    /// Register a backend.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, backend: StoreBackend) -> Result<()> {
        let name = name.into();
        if self.backends.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "Store backend '{}' is already registered",
                name
            )));
        }
        self.backends.insert(name, backend);
        Ok(())
    }

    /// Open a store by backend name and JSON options.
    ///
    /// `null` is treated as no options.
    ///
    /// # Errors
    /// - Backend not registered (the message lists the available ones)
    /// - Options not an object, missing, mistyped or unknown
    /// - The backend failing to open
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn NoteStore>> {
        let backend = self.backends.get(name).ok_or_else(|| {
            Error::NotFound(format!(
                "Store backend '{}' is not registered (available: {})",
                name,
                self.backends().join(", ")
            ))
        })?;

        let options = match config {
            Value::Null => Map::new(),
            Value::Object(options) => options,
            other => {
                return Err(Error::InvalidInput(format!(
                    "Store backend '{}' options must be an object, got {}",
                    name, other
                )))
            }
        };

        backend.check(name, &options)?;
        (backend.factory)(&options)
    }

    /// Get list of registered backend names, sorted.
    pub fn backends(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Check if a backend is registered.
    pub fn has_backend(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in backends.
pub fn create_default_registry() -> StoreRegistry {
    let mut backends = BTreeMap::new();

    backends.insert(
        "memory".to_string(),
        StoreBackend::new(Box::new(|_| Ok(Arc::new(crate::memory::MemoryNoteStore::new())))),
    );

    backends.insert(
        "sqlite".to_string(),
        StoreBackend::new(Box::new(|options| {
            // Presence and type were checked against the declaration.
            let path = options.get("path").and_then(Value::as_str).unwrap_or_default();
            Ok(Arc::new(crate::sqlite::SqliteNoteStore::open(path)?))
        }))
        .require("path"),
    );

    StoreRegistry { backends }
}

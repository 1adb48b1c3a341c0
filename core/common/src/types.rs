//! Common types used throughout SharedNotes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named, versioned text record.
///
/// The name is the unique key and never changes once created. The version
/// orders competing values for the same name: higher always wins during
/// reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier of the note.
    pub name: String,
    /// Arbitrary text payload.
    #[serde(default)]
    pub content: String,
    /// Ordering field, bumped by one on every accepted local edit.
    #[serde(default)]
    pub version: u64,
}

impl Note {
    /// Create an unversioned note.
    ///
    /// The first local write stores it at version 1.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            version: 0,
        }
    }

    /// Create a note at an explicit version.
    pub fn with_version(name: impl Into<String>, content: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            version,
        }
    }

    /// Check that the note can be stored.
    ///
    /// # Errors
    /// - Returns error if the name is empty
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Note name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize to the JSON wire format `{name, content, version}`.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from the JSON wire format.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.name, self.version)
    }
}

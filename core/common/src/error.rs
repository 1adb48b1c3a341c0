//! Common error types for SharedNotes.

use thiserror::Error;

/// Top-level error type for SharedNotes operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No note exists under the requested name.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Network or connection failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server response could not be interpreted as a note.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Local store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The sync machinery has been shut down.
    #[error("Shut down: {0}")]
    Shutdown(String),
}

impl Error {
    /// Whether the failure is expected to clear up on its own
    /// (slow network, unreachable server).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Transport(_))
    }

    /// Whether this error only signals absence.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

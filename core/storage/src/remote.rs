//! Remote notes service trait definition.

use async_trait::async_trait;

use sharednotes_common::{Note, Result};

/// Client for the remote notes service.
///
/// Implementations must not retry on their own; the sync layer decides what
/// a failure means (skip the poll cycle, or surface it to the caller).
#[async_trait]
pub trait NoteApi: Send + Sync {
    /// Fetch the latest server-side value of a note.
    ///
    /// # Errors
    /// - `NotFound` when the server has no note under `name`
    /// - `Timeout` / `Transport` on network failure
    /// - `MalformedResponse` when the body is not a note
    async fn fetch(&self, name: &str) -> Result<Note>;

    /// Persist a note on the server.
    ///
    /// # Returns
    /// The server's confirmation body.
    async fn store(&self, note: &Note) -> Result<String>;
}

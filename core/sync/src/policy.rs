//! Version reconciliation rule.

use sharednotes_common::Note;

/// What to do with a value fetched from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Remote is strictly newer (or nothing is stored): write it to the local store.
    WriteBack,
    /// Local is current or newer: drop the remote value.
    Discard,
}

/// Decide between the locally stored note and a fetched one.
///
/// Highest version wins; ties keep the local value. Content is never merged.
pub fn reconcile(local: Option<&Note>, remote: &Note) -> Reconciliation {
    match local {
        Some(local) if local.version >= remote.version => Reconciliation::Discard,
        _ => Reconciliation::WriteBack,
    }
}

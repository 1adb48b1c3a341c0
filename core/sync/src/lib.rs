//! SharedNotes Sync Engine
//!
//! Keeps locally stored notes in step with the notes server:
//! - One poller and one synchronizer per subscribed note name
//! - Version-based reconciliation, serialized per name
//! - Fan-out of the merged value to any number of subscribers
//! - Local-first writes with a remote push

pub mod deadline;
pub mod engine;
pub mod locks;
pub mod poller;
pub mod policy;
pub mod registry;
pub mod state;
pub mod synchronizer;

#[cfg(test)]
mod testing;

// Re-export main types
pub use deadline::{within, Deadline};
pub use engine::{RemoteRead, SyncConfig, SyncEngine, SyncedRead};
pub use locks::NameLocks;
pub use poller::{PollOutcome, Poller, PollerConfig};
pub use policy::{reconcile, Reconciliation};
pub use registry::SyncRegistry;
pub use state::{PollState, PollStatus};
pub use synchronizer::{MergedView, Reconciler, Subscription, Synchronizer};

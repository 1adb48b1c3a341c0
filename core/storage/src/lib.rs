//! Local and remote note storage for SharedNotes.
//!
//! This module provides trait-based interfaces for the two collaborators the
//! sync engine depends on: the local note store (durable, observable) and the
//! remote notes service. Concrete implementations and a backend registry for
//! dynamic store resolution live alongside the traits.
//!
//! # Design Principles
//! - Store isolation: the sync layer only sees the `NoteStore` and `NoteApi` traits
//! - Async operations: all I/O operations are async
//! - Observable state: every store write is pushed to its watchers
//! - Unified error semantics: consistent error types across backends

pub mod http;
pub mod memory;
pub mod notify;
pub mod registry;
pub mod remote;
pub mod sqlite;
pub mod store;

pub use http::{HttpNoteApi, DEFAULT_SERVER_URL};
pub use memory::MemoryNoteStore;
pub use notify::ChangeNotifier;
pub use registry::{create_default_registry, StoreBackend, StoreFactory, StoreRegistry};
pub use remote::NoteApi;
pub use sqlite::SqliteNoteStore;
pub use store::NoteStore;

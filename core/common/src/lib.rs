//! Common utilities and types shared across SharedNotes modules.
//!
//! This module provides the note record and the error type used by the
//! storage, remote and sync layers.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::Note;

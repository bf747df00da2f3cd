// src/artefacts/mod.rs

//! Artefact storage.
//!
//! - [`record`] defines the stored record types.
//! - [`store`] holds the keyed, write-once-per-task record store.
//! - [`dumps`] manages task-owned dump directories and file references.

pub mod dumps;
pub mod record;
pub mod store;

pub use dumps::DumpStore;
pub use record::{ArtefactRecord, FileRef, ResultRef};
pub use store::{ArtefactStore, MemoryArtefactStore};

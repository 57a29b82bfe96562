//! Tamper-evident memory for the BlackRoad gateway.
//!
//! The journal is an append-only, hash-chained, line-delimited JSON file
//! recording every agent call and verify result. The context store is a
//! small key/value JSON file read and written whole.

pub mod context;
pub mod journal;

pub use context::ContextStore;
pub use journal::{verify_journal, JournalStats, MemoryJournal};

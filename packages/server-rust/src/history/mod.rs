//! History collaborators for the dispatch engine.
//!
//! The engine only depends on the [`HistoryStore`](crate::traits::HistoryStore)
//! trait. [`InMemoryHistory`] is the implementation used by tests and the
//! simulation binary.

pub mod in_memory;

pub use in_memory::InMemoryHistory;

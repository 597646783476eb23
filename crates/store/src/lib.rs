//! Message store implementations for Continuum.
//!
//! Durable stores belong to the embedding application; this crate ships the
//! in-memory store used by tests, the CLI, and ephemeral sessions.

pub mod in_memory;

pub use in_memory::InMemoryStore;

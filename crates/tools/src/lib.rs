//! Tool exposure for Continuum.
//!
//! The engine never runs tools; it decides which schemas a model call gets
//! to see. This crate holds the canonical tool names, the capability →
//! keyword table, the built-in schema catalog, the relevance filter and
//! schema compaction.

pub mod builtin;
pub mod capability;
pub mod compact;
pub mod filter;
pub mod names;

pub use builtin::{builtin_catalog, builtin_descriptors};
pub use compact::{compact_all, compact_definition};
pub use filter::{CatalogReport, Selection, ToolRelevanceFilter};

//! Query-driven tool selection.
//!
//! Every request carries the essential tools plus whatever the latest user
//! message asks for. When the query gives no signal the whole catalog is
//! exposed, so the filter can only ever narrow a request that it understood.

use crate::capability;
use crate::names::ESSENTIAL;
use continuum_core::error::CatalogError;
use continuum_core::provider::ToolDefinition;
use continuum_core::tool::{CapabilityTag, ToolCatalog, ToolDescriptor};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

/// Result of one selection pass.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Chosen tools, in catalog order, unique by name.
    pub tools: Vec<ToolDescriptor>,
    /// Tags the query matched.
    pub matched_tags: BTreeSet<CapabilityTag>,
    /// The full catalog was returned because the query gave no usable signal.
    pub fail_open: bool,
}

impl Selection {
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(ToolDescriptor::to_definition).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Names referenced by the filter but absent from a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogReport {
    pub missing_essential: Vec<String>,
    pub missing_table: Vec<String>,
}

impl CatalogReport {
    pub fn is_clean(&self) -> bool {
        self.missing_essential.is_empty() && self.missing_table.is_empty()
    }
}

/// Picks the tool subset to expose for a query.
#[derive(Debug, Clone)]
pub struct ToolRelevanceFilter {
    essentials: Vec<String>,
}

impl ToolRelevanceFilter {
    /// A filter with the built-in essential set.
    pub fn new() -> Self {
        Self {
            essentials: ESSENTIAL.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replace the essential set.
    pub fn with_essentials(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.essentials = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn essentials(&self) -> &[String] {
        &self.essentials
    }

    /// Compare the essential set and the capability table against a catalog.
    pub fn check_catalog(&self, catalog: &dyn ToolCatalog) -> CatalogReport {
        let schemas = catalog.list_schemas();
        let names: HashSet<&str> = schemas.iter().map(|t| t.name.as_str()).collect();

        let missing_essential = self
            .essentials
            .iter()
            .filter(|e| !names.contains(e.as_str()))
            .cloned()
            .collect();

        let mut missing_table = BTreeSet::new();
        for tag in CapabilityTag::ALL {
            for entry in capability::tools(tag) {
                if !names.iter().any(|n| capability::entry_matches(entry, n)) {
                    missing_table.insert(entry.to_string());
                }
            }
        }

        CatalogReport {
            missing_essential,
            missing_table: missing_table.into_iter().collect(),
        }
    }

    /// Build a filter after checking it against the live catalog.
    ///
    /// Missing essentials fail construction in strict mode and are logged
    /// otherwise. Missing table entries are always just logged.
    pub fn validated(catalog: &dyn ToolCatalog, strict: bool) -> Result<Self, CatalogError> {
        let filter = Self::new();
        let report = filter.check_catalog(catalog);

        if !report.missing_essential.is_empty() {
            if strict {
                return Err(CatalogError::MissingEssential(report.missing_essential));
            }
            warn!(
                missing = ?report.missing_essential,
                "Essential tools missing from catalog"
            );
        }
        if !report.missing_table.is_empty() {
            warn!(
                missing = ?report.missing_table,
                "Capability table names tools the catalog does not provide"
            );
        }
        Ok(filter)
    }

    /// Select tools for `query` out of `catalog` (already listed).
    pub fn select(&self, query: &str, catalog: &[ToolDescriptor]) -> Selection {
        let unique = dedupe(catalog);
        let matched_tags = capability::matched_tags(query);

        if matched_tags.is_empty() {
            debug!(tools = unique.len(), "No capability matched, exposing full catalog");
            return Selection {
                tools: unique,
                matched_tags,
                fail_open: true,
            };
        }

        let entries: Vec<&str> = matched_tags
            .iter()
            .flat_map(|&tag| capability::tools(tag).iter().copied())
            .collect();

        let selected: Vec<ToolDescriptor> = unique
            .iter()
            .filter(|tool| {
                self.essentials.iter().any(|e| e == &tool.name)
                    || entries
                        .iter()
                        .any(|entry| capability::entry_matches(entry, &tool.name))
                    || tool.tags.iter().any(|t| matched_tags.contains(t))
            })
            .cloned()
            .collect();

        if selected.is_empty() {
            debug!(tags = ?matched_tags, "Matched tags select nothing in catalog, exposing full catalog");
            return Selection {
                tools: unique,
                matched_tags,
                fail_open: true,
            };
        }

        debug!(
            tags = ?matched_tags,
            selected = selected.len(),
            total = unique.len(),
            "Filtered tools by relevance"
        );
        Selection {
            tools: selected,
            matched_tags,
            fail_open: false,
        }
    }

    /// Convenience: list the catalog, select, and return wire definitions.
    pub fn filter(&self, query: &str, catalog: &dyn ToolCatalog) -> Vec<ToolDefinition> {
        self.select(query, &catalog.list_schemas()).definitions()
    }
}

impl Default for ToolRelevanceFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep the first descriptor of each name, preserving order.
fn dedupe(catalog: &[ToolDescriptor]) -> Vec<ToolDescriptor> {
    let mut seen = HashSet::new();
    catalog
        .iter()
        .filter(|t| seen.insert(t.name.as_str()))
        .cloned()
        .collect()
}

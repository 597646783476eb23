//! Tool catalog types: the engine's view of agent capabilities.
//!
//! The engine never executes tools itself. It only sees their schemas (to
//! decide what to expose to the model) and hands requested calls to an
//! external [`ToolDispatcher`].

use crate::error::{CatalogError, ToolError};
use crate::message::{ConversationId, Message, MessageToolCall};
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Capability groups used to match user queries to tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTag {
    Communication,
    FileOps,
    TaskOps,
    WebSearch,
    DataOps,
    BrowserOps,
    ProcessOps,
    MemoryOps,
    Documents,
    Spreadsheets,
    Presentations,
    Media,
}

impl CapabilityTag {
    pub const ALL: [CapabilityTag; 12] = [
        Self::Communication,
        Self::FileOps,
        Self::TaskOps,
        Self::WebSearch,
        Self::DataOps,
        Self::BrowserOps,
        Self::ProcessOps,
        Self::MemoryOps,
        Self::Documents,
        Self::Spreadsheets,
        Self::Presentations,
        Self::Media,
    ];
}

/// A tool as published by the catalog: schema plus capability tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<CapabilityTag>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: &[CapabilityTag]) -> Self {
        self.tags = tags.to_vec();
        self
    }

    /// Convert into the definition sent to the LLM.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Read-only source of tool schemas, populated once at startup.
pub trait ToolCatalog: Send + Sync {
    /// Every registered schema, in registration order.
    fn list_schemas(&self) -> Vec<ToolDescriptor>;
}

/// Executes tool calls on behalf of the engine.
///
/// Returned messages are tool results (one per call, normally) and are
/// appended to the conversation before the next model call.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        conversation_id: &ConversationId,
        calls: &[MessageToolCall],
    ) -> std::result::Result<Vec<Message>, ToolError>;
}

/// An in-process catalog that keeps registration order.
pub struct StaticCatalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. Duplicate names are rejected.
    pub fn register(&mut self, tool: ToolDescriptor) -> std::result::Result<(), CatalogError> {
        if self.index.contains_key(&tool.name) {
            return Err(CatalogError::DuplicateName(tool.name));
        }
        self.index.insert(tool.name.clone(), self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Build a catalog from a list, rejecting duplicates.
    pub fn from_descriptors(
        tools: impl IntoIterator<Item = ToolDescriptor>,
    ) -> std::result::Result<Self, CatalogError> {
        let mut catalog = Self::new();
        for tool in tools {
            catalog.register(tool)?;
        }
        Ok(catalog)
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// List all registered tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCatalog for StaticCatalog {
    fn list_schemas(&self) -> Vec<ToolDescriptor> {
        self.tools.clone()
    }
}

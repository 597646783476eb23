//! # Continuum Core
//!
//! Domain types, traits, and error definitions for the Continuum context
//! budget & continuation engine. This crate has **no framework
//! dependencies**, it defines the domain model that all other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here: the model invocation gateway
//! ([`Provider`]), the tool catalog ([`ToolCatalog`]), tool execution
//! ([`ToolDispatcher`]) and the message store ([`MessageStore`]).
//! Implementations live in their respective crates or in the embedding
//! application, and are injected explicitly at startup.

pub mod error;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{CatalogError, Error, ProviderError, ProviderErrorKind, Result, StoreError, ToolError};
pub use message::{Content, ContentBlock, ConversationId, Message, MessageToolCall, Role};
pub use provider::{
    CacheBreakpoint, ChunkReceiver, FinishReason, Provider, ProviderRequest, ProviderResponse,
    StreamChunk, ToolChoice, ToolDefinition, Usage,
};
pub use store::MessageStore;
pub use tool::{CapabilityTag, StaticCatalog, ToolCatalog, ToolDescriptor, ToolDispatcher};

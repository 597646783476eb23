//! Events surfaced to the caller of a run.
//!
//! A run emits any number of `content`, `tool_call` and `status` events and
//! ends with exactly one `finish` event.

use continuum_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Done,
    Error,
    LimitReached,
    Cancelled,
}

/// Kind of a `status` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// The run switched to the fallback model.
    Fallback,
    /// A user-visible notice, such as the iteration cap.
    Notice,
    /// A structured error description.
    Error,
}

/// Events emitted by the continuation controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    /// Partial text from the model.
    Content { content: String },

    /// The model requested a tool.
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },

    /// Out-of-band status for the caller.
    Status { kind: StatusKind, message: String },

    /// The run is over. Always the last event.
    Finish {
        reason: RunOutcome,
        iterations: u32,
        tool_calls: u32,
        model: String,
        usage: Usage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl OutputEvent {
    /// Wire name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Content { .. } => "content",
            Self::ToolCall { .. } => "tool_call",
            Self::Status { .. } => "status",
            Self::Finish { .. } => "finish",
        }
    }
}

//! Per-turn state of the continuation loop.

use continuum_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Where a turn is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    Running,
    Continuing,
    Done,
    Error,
    LimitReached,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::Error | Self::LimitReached | Self::Cancelled
        )
    }
}

/// Mutable state for one user turn, owned by the controller task.
#[derive(Debug, Clone)]
pub struct RunState {
    pub phase: RunPhase,
    /// Model calls made so far.
    pub iterations: u32,
    /// Tool-call rounds requested by the model so far.
    pub tool_calls: u32,
    /// Output of `length`-truncated calls awaiting continuation.
    pub partial: String,
    /// Another iteration has been scheduled.
    pub active: bool,
    /// Model that replaces the configured one after a fallback.
    pub model_override: Option<String>,
    /// The single transient-error retry has been spent.
    pub fallback_used: bool,
    /// Usage summed over every completed call.
    pub usage: Usage,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Init,
            iterations: 0,
            tool_calls: 0,
            partial: String::new(),
            active: false,
            model_override: None,
            fallback_used: false,
            usage: Usage::default(),
        }
    }

    /// Model for the next call.
    pub fn model<'a>(&'a self, configured: &'a str) -> &'a str {
        self.model_override.as_deref().unwrap_or(configured)
    }

    /// Record a `length` finish and schedule a continuation.
    pub fn push_partial(&mut self, text: &str) {
        self.partial.push_str(text);
        self.active = true;
        self.phase = RunPhase::Continuing;
    }

    /// Take the accumulated partial output, leaving it empty.
    pub fn take_partial(&mut self) -> String {
        std::mem::take(&mut self.partial)
    }

    /// Spend the fallback, switching to `model` for the rest of the turn.
    ///
    /// Returns false if it was already spent.
    pub fn use_fallback(&mut self, model: String) -> bool {
        if self.fallback_used {
            return false;
        }
        self.fallback_used = true;
        self.model_override = Some(model);
        true
    }

    pub fn finish(&mut self, phase: RunPhase) {
        self.phase = phase;
        self.active = false;
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

//! Context window compression.
//!
//! Fits a message list into a token budget by omitting messages, never by
//! rewriting them. The leading system message and the latest user message
//! always survive; everything else is kept newest-first.

use crate::context::token::TokenEstimator;
use continuum_core::message::{Message, Role, last_user_index};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Default number of non-system messages kept by the recency window.
pub const DEFAULT_RECENT_MESSAGES: usize = 8;

/// Default share of the context window used as the budget.
pub const DEFAULT_BUDGET_FRACTION: f32 = 0.6;

/// Outcome of one compression pass.
#[derive(Debug, Clone)]
pub struct Compression {
    /// Retained messages, in original order.
    pub messages: Vec<Message>,
    /// Estimate of the input list.
    pub original_tokens: usize,
    /// Estimate of `messages`.
    pub final_tokens: usize,
    /// Number of messages omitted.
    pub dropped: usize,
    /// Budget the pass worked against.
    pub budget: usize,
    /// Only the floor remained and it is still over budget.
    pub floor_reached: bool,
}

impl Compression {
    pub fn is_unchanged(&self) -> bool {
        self.dropped == 0
    }
}

/// Trims conversation history to a token budget.
#[derive(Debug, Clone)]
pub struct ContextCompressor {
    estimator: TokenEstimator,
    recent_messages: usize,
    budget_fraction: f32,
}

impl ContextCompressor {
    pub fn new(estimator: TokenEstimator) -> Self {
        Self {
            estimator,
            recent_messages: DEFAULT_RECENT_MESSAGES,
            budget_fraction: DEFAULT_BUDGET_FRACTION,
        }
    }

    /// Set how many non-system messages the recency window keeps.
    pub fn with_recent_messages(mut self, k: usize) -> Self {
        self.recent_messages = k.max(1);
        self
    }

    /// Set the share of the model's context window used as the budget.
    pub fn with_budget_fraction(mut self, fraction: f32) -> Self {
        self.budget_fraction = fraction.clamp(f32::EPSILON, 1.0);
        self
    }

    /// Resolve the budget: an explicit ceiling wins over the window fraction.
    pub fn budget(&self, model: &str, ceiling: Option<usize>) -> usize {
        ceiling.unwrap_or_else(|| {
            (self.estimator.context_window(model) as f32 * self.budget_fraction) as usize
        })
    }

    /// Compress `messages` for `model`.
    ///
    /// # Algorithm
    ///
    /// 1. If the whole list fits the budget, return it unchanged.
    /// 2. Keep the leading system message plus the last K non-system
    ///    messages (and the latest user message even if it is older).
    /// 3. While over budget, drop the oldest retained message other than
    ///    the system message and the latest user message.
    ///
    /// Tool results whose assistant call was dropped are omitted at every
    /// step. Reaching the floor while still over budget is not an error.
    pub fn compress(&self, messages: &[Message], model: &str, ceiling: Option<usize>) -> Compression {
        let budget = self.budget(model, ceiling);
        let costs = self.estimator.message_costs(model, messages);
        let original_tokens: usize = costs.iter().sum();
        let total = |kept: &[usize]| kept.iter().map(|&i| costs[i]).sum::<usize>();

        // Tool calls that never got a result cannot be replayed.
        let candidates = drop_orphans(messages, &drop_unanswered(messages));
        let candidate_tokens = total(&candidates);
        if candidate_tokens <= budget {
            return Compression {
                messages: candidates.iter().map(|&i| messages[i].clone()).collect(),
                original_tokens,
                final_tokens: candidate_tokens,
                dropped: messages.len() - candidates.len(),
                budget,
                floor_reached: false,
            };
        }

        let system = match messages.first() {
            Some(m) if m.role == Role::System => Some(0),
            _ => None,
        };
        let last_user = last_user_index(messages);

        // Recency window over non-system messages.
        let window: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| messages[i].role != Role::System)
            .collect();
        let start = window.len().saturating_sub(self.recent_messages);
        let mut kept: Vec<usize> = system.into_iter().chain(window[start..].iter().copied()).collect();
        if let Some(u) = last_user {
            if !kept.contains(&u) {
                kept.push(u);
                kept.sort_unstable();
            }
        }
        kept = drop_orphans(messages, &kept);

        let is_floor = |i: usize| Some(i) == system || Some(i) == last_user;

        let mut tokens = total(&kept);
        while tokens > budget {
            let Some(pos) = kept.iter().position(|&i| !is_floor(i)) else {
                break;
            };
            kept.remove(pos);
            kept = drop_orphans(messages, &kept);
            tokens = total(&kept);
        }

        let floor_reached = tokens > budget;
        if floor_reached {
            warn!(
                budget,
                tokens,
                model,
                "Context still over budget at the floor (system + latest user message)"
            );
        }

        let dropped = messages.len() - kept.len();
        debug!(
            original_tokens,
            final_tokens = tokens,
            budget,
            dropped,
            "Compressed context window"
        );

        Compression {
            messages: kept.iter().map(|&i| messages[i].clone()).collect(),
            original_tokens,
            final_tokens: tokens,
            dropped,
            budget,
            floor_reached,
        }
    }
}

/// Indices of every message except assistant turns with a tool call that
/// has no result anywhere in `messages`.
fn drop_unanswered(messages: &[Message]) -> Vec<usize> {
    let answered: HashSet<&str> = messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();

    (0..messages.len())
        .filter(|&i| {
            let m = &messages[i];
            let unanswered = m.role == Role::Assistant
                && m.tool_calls.iter().any(|c| !answered.contains(c.id.as_str()));
            if unanswered {
                debug!(index = i, "Omitting assistant turn with unanswered tool calls");
            }
            !unanswered
        })
        .collect()
}

/// Remove tool results whose originating call is in an omitted message.
fn drop_orphans(messages: &[Message], kept: &[usize]) -> Vec<usize> {
    let kept_set: HashSet<usize> = kept.iter().copied().collect();
    let omitted_calls: HashSet<&str> = messages
        .iter()
        .enumerate()
        .filter(|(i, _)| !kept_set.contains(i))
        .flat_map(|(_, m)| m.tool_calls.iter().map(|c| c.id.as_str()))
        .collect();

    if omitted_calls.is_empty() {
        return kept.to_vec();
    }

    kept.iter()
        .copied()
        .filter(|&i| {
            let m = &messages[i];
            !(m.role == Role::Tool
                && m.tool_call_id
                    .as_deref()
                    .is_some_and(|id| omitted_calls.contains(id)))
        })
        .collect()
}

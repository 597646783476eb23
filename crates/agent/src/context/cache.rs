//! Prompt-cache breakpoint allocation.
//!
//! Within one turn every model call resends the same prefix: the system
//! prompt and the history before the newest user message. Marking that
//! prefix lets providers with prompt caching bill it at the cached rate.
//! Only this stable region is ever marked.

use crate::context::token::{ModelFamily, TokenEstimator};
use continuum_core::message::{Message, last_user_index};
use continuum_core::provider::CacheBreakpoint;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Provider-specific caching limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheProfile {
    /// Most breakpoints a single request may carry.
    pub max_breakpoints: usize,
    /// Smallest cacheable block, in tokens.
    pub min_block_tokens: usize,
}

impl CacheProfile {
    /// No caching support.
    pub const NONE: Self = Self {
        max_breakpoints: 0,
        min_block_tokens: 0,
    };

    /// Anthropic Messages API: four `cache_control` markers, 1024-token blocks.
    pub const ANTHROPIC: Self = Self {
        max_breakpoints: 4,
        min_block_tokens: 1024,
    };

    pub fn for_model(model: &str) -> Self {
        match ModelFamily::from_model(model) {
            ModelFamily::Anthropic => Self::ANTHROPIC,
            _ => Self::NONE,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_breakpoints > 0
    }
}

/// Number of leading messages that stay identical across the calls of a turn.
pub fn stable_prefix_len(messages: &[Message]) -> usize {
    last_user_index(messages).unwrap_or(0)
}

/// Places cache breakpoints over the stable prefix of a request.
#[derive(Debug, Clone, Default)]
pub struct CacheAllocator {
    estimator: TokenEstimator,
}

impl CacheAllocator {
    pub fn new(estimator: TokenEstimator) -> Self {
        Self { estimator }
    }

    /// Allocate breakpoints for `messages` using the model's own profile.
    ///
    /// `supported` is the gateway's answer for this model; when false, or
    /// when the stable prefix is smaller than one block, nothing is placed.
    pub fn allocate(&self, model: &str, messages: &[Message], supported: bool) -> Vec<CacheBreakpoint> {
        if !supported {
            return Vec::new();
        }
        self.allocate_with(CacheProfile::for_model(model), model, messages)
    }

    /// Allocate with an explicit profile.
    ///
    /// The last stable boundary is always taken first. Earlier boundaries are
    /// then chosen walking backwards, latest feasible first, so that every
    /// block (including the first) is at least `min_block_tokens`.
    pub fn allocate_with(
        &self,
        profile: CacheProfile,
        model: &str,
        messages: &[Message],
    ) -> Vec<CacheBreakpoint> {
        let stable = stable_prefix_len(messages);
        if !profile.is_enabled() || stable == 0 {
            return Vec::new();
        }

        let mut cumulative = Vec::with_capacity(stable);
        let mut running = 0;
        for cost in self.estimator.message_costs(model, &messages[..stable]) {
            running += cost;
            cumulative.push(running);
        }

        let last = stable - 1;
        if cumulative[last] < profile.min_block_tokens {
            debug!(
                stable_tokens = cumulative[last],
                min_block = profile.min_block_tokens,
                "Stable prefix below minimum cacheable size"
            );
            return Vec::new();
        }

        let mut chosen = vec![last];
        let mut upper = last;
        for i in (0..last).rev() {
            if chosen.len() >= profile.max_breakpoints {
                break;
            }
            let block = cumulative[upper] - cumulative[i];
            if block >= profile.min_block_tokens && cumulative[i] >= profile.min_block_tokens {
                chosen.push(i);
                upper = i;
            }
        }
        chosen.reverse();

        let keys = stability_keys(messages, &chosen);
        let breakpoints: Vec<CacheBreakpoint> = chosen
            .iter()
            .zip(keys)
            .map(|(&index, stability_key)| CacheBreakpoint {
                message_index: index,
                covered_tokens: cumulative[index],
                stability_key,
            })
            .collect();

        validate(breakpoints, stable, profile.max_breakpoints)
    }
}

/// Drop breakpoints that break ascending order, point past the stable
/// region, or exceed the count limit (the latest ones are kept).
pub fn validate(
    breakpoints: Vec<CacheBreakpoint>,
    stable_len: usize,
    max_breakpoints: usize,
) -> Vec<CacheBreakpoint> {
    let before = breakpoints.len();
    let mut valid: Vec<CacheBreakpoint> = Vec::with_capacity(before);
    for bp in breakpoints {
        if bp.message_index >= stable_len {
            continue;
        }
        if valid.last().is_some_and(|prev| prev.message_index >= bp.message_index) {
            continue;
        }
        valid.push(bp);
    }
    if valid.len() > max_breakpoints {
        valid.drain(..valid.len() - max_breakpoints);
    }
    if valid.len() != before {
        debug!(
            dropped = before - valid.len(),
            "Dropped invalid cache breakpoints"
        );
    }
    valid
}

/// Hex SHA-256 over role and content of every message up to each index.
fn stability_keys(messages: &[Message], indices: &[usize]) -> Vec<String> {
    let mut keys = Vec::with_capacity(indices.len());
    let Some(&last) = indices.last() else {
        return keys;
    };
    let mut hasher = Sha256::new();
    let mut next = indices.iter().peekable();
    for (i, message) in messages.iter().enumerate().take(last + 1) {
        hasher.update(message.role.as_str().as_bytes());
        hasher.update([0u8]);
        // Content and tool calls serialize deterministically; fall back to
        // plain text if serialization ever fails.
        let content = serde_json::to_vec(&(&message.content, &message.tool_calls))
            .unwrap_or_else(|_| message.text().into_bytes());
        hasher.update(&content);
        hasher.update([0u8]);
        if next.peek() == Some(&&i) {
            keys.push(format!("{:x}", hasher.clone().finalize()));
            next.next();
        }
    }
    keys
}

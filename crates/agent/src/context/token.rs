//! Token estimation.
//!
//! A character-count heuristic with a per-family characters-per-token ratio.
//! It never fails: unknown models fall back to ~4 characters per token and a
//! conservative context window, so budgeting can always proceed.

use continuum_core::message::Message;
use continuum_core::provider::ToolDefinition;
use tracing::warn;

/// Tokenizer family, resolved from a model id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    Anthropic,
    OpenAi,
    Gemini,
    DeepSeek,
    Unknown,
}

impl ModelFamily {
    /// Resolve a model id such as `claude-sonnet-4-20250514` or
    /// `openai/gpt-4o`. Provider prefixes are ignored.
    pub fn from_model(model: &str) -> Self {
        let id = bare_model_id(model);

        if id.starts_with("claude") {
            Self::Anthropic
        } else if id.starts_with("gpt")
            || id.starts_with("o1")
            || id.starts_with("o3")
            || id.starts_with("o4")
            || id.starts_with("chatgpt")
        {
            Self::OpenAi
        } else if id.starts_with("gemini") {
            Self::Gemini
        } else if id.starts_with("deepseek") {
            Self::DeepSeek
        } else {
            Self::Unknown
        }
    }

    /// Average characters per token for English-heavy text.
    pub fn chars_per_token(self) -> f32 {
        match self {
            Self::Anthropic => 3.5,
            Self::DeepSeek => 3.5,
            Self::OpenAi | Self::Gemini | Self::Unknown => 4.0,
        }
    }
}

/// Lower-cased model id without any `provider/` prefix.
fn bare_model_id(model: &str) -> String {
    let lower = model.to_ascii_lowercase();
    match lower.rsplit_once('/') {
        Some((_, id)) => id.to_string(),
        None => lower,
    }
}

/// Context window assumed for models we do not recognize.
pub const FALLBACK_CONTEXT_WINDOW: usize = 32_000;

/// Per-message cost of role name and delimiters.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Flat cost of one image block.
pub const IMAGE_TOKENS: usize = 1_600;

/// Deterministic, model-aware token estimator.
#[derive(Debug, Clone, Default)]
pub struct TokenEstimator;

impl TokenEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Published context window of a model, in tokens.
    pub fn context_window(&self, model: &str) -> usize {
        let id = bare_model_id(model);
        match ModelFamily::from_model(model) {
            ModelFamily::Anthropic => 200_000,
            ModelFamily::OpenAi if id.starts_with("gpt-4.1") => 1_047_576,
            ModelFamily::OpenAi if id.starts_with("gpt-3.5") => 16_385,
            ModelFamily::OpenAi if id.starts_with('o') => 200_000,
            ModelFamily::OpenAi => 128_000,
            ModelFamily::Gemini => 1_000_000,
            ModelFamily::DeepSeek => 128_000,
            ModelFamily::Unknown => FALLBACK_CONTEXT_WINDOW,
        }
    }

    /// Estimate tokens for raw text. Rounds up; empty text is zero.
    pub fn estimate_text(&self, model: &str, text: &str) -> usize {
        Self::text_tokens(ModelFamily::from_model(model), text)
    }

    fn text_tokens(family: ModelFamily, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let chars = text.chars().count() as f32;
        (chars / family.chars_per_token()).ceil() as usize
    }

    fn message_tokens(family: ModelFamily, message: &Message) -> usize {
        let mut tokens = MESSAGE_OVERHEAD + Self::text_tokens(family, &message.text());
        tokens += message.content.image_count() * IMAGE_TOKENS;
        for call in &message.tool_calls {
            tokens += Self::text_tokens(family, &call.name);
            tokens += Self::text_tokens(family, &call.arguments);
        }
        if let Some(id) = &message.tool_call_id {
            tokens += Self::text_tokens(family, id);
        }
        tokens
    }

    /// Estimate one message including its overhead.
    pub fn estimate_message(&self, model: &str, message: &Message) -> usize {
        Self::message_tokens(ModelFamily::from_model(model), message)
    }

    /// Estimate a message list.
    pub fn estimate_messages(&self, model: &str, messages: &[Message]) -> usize {
        let family = ModelFamily::from_model(model);
        messages.iter().map(|m| Self::message_tokens(family, m)).sum()
    }

    /// Per-message estimates, in order.
    pub fn message_costs(&self, model: &str, messages: &[Message]) -> Vec<usize> {
        let family = ModelFamily::from_model(model);
        messages.iter().map(|m| Self::message_tokens(family, m)).collect()
    }

    /// Estimate a tool definition from its JSON serialization.
    pub fn estimate_tool(&self, model: &str, tool: &ToolDefinition) -> usize {
        let family = ModelFamily::from_model(model);
        match serde_json::to_string(tool) {
            Ok(json) => Self::text_tokens(family, &json),
            Err(e) => {
                warn!(tool = %tool.name, error = %e, "Tool schema not serializable, estimating from name and description");
                Self::text_tokens(family, &tool.name) + Self::text_tokens(family, &tool.description)
            }
        }
    }

    /// Estimate a list of tool definitions.
    pub fn estimate_tools(&self, model: &str, tools: &[ToolDefinition]) -> usize {
        tools.iter().map(|t| self.estimate_tool(model, t)).sum()
    }
}

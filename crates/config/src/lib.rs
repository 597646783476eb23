//! Configuration loading, validation, and management for Continuum.
//!
//! Loads configuration from `~/.continuum/config.toml` with environment
//! variable overrides. Validates all settings at startup so the engine can
//! consume them without re-checking.

use continuum_core::provider::ToolChoice;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.continuum/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model used for every call of a turn unless a fallback is taken
    #[serde(default = "default_model")]
    pub model: String,

    /// Alternate model for the single transient-error retry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Tool-choice mode sent with every request
    #[serde(default)]
    pub tool_choice: ToolChoice,

    /// Stream model output to the caller
    #[serde(default = "default_true")]
    pub stream: bool,

    /// Continuation loop limits
    #[serde(default)]
    pub continuation: ContinuationConfig,

    /// Context window management
    #[serde(default)]
    pub context: ContextConfig,

    /// Prompt caching
    #[serde(default)]
    pub caching: CachingConfig,

    /// Tool exposure
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "anthropic".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("model", &self.model)
            .field("fallback_model", &self.fallback_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("tool_choice", &self.tool_choice)
            .field("stream", &self.stream)
            .field("continuation", &self.continuation)
            .field("context", &self.context)
            .field("caching", &self.caching)
            .field("tools", &self.tools)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Auto-continue loop limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationConfig {
    /// Maximum automatic continuations per turn (0 disables auto-continue)
    #[serde(default = "default_max_auto_continues")]
    pub max_auto_continues: u32,

    /// Hard cap on tool-call rounds per turn
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,
}

fn default_max_auto_continues() -> u32 {
    25
}
fn default_max_tool_calls() -> u32 {
    5
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            max_auto_continues: default_max_auto_continues(),
            max_tool_calls: default_max_tool_calls(),
        }
    }
}

/// Context window compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Compress history when it exceeds the budget
    #[serde(default = "default_true")]
    pub enable_compression: bool,

    /// Non-system messages kept by the recency window
    #[serde(default = "default_recent_messages")]
    pub recent_messages: usize,

    /// Share of the model's context window used as the budget
    #[serde(default = "default_budget_fraction")]
    pub budget_fraction: f32,

    /// Explicit token ceiling; overrides the fraction when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<usize>,
}

fn default_recent_messages() -> usize {
    8
}
fn default_budget_fraction() -> f32 {
    0.6
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enable_compression: true,
            recent_messages: default_recent_messages(),
            budget_fraction: default_budget_fraction(),
            max_context_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Tool exposure settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Filter the catalog by query relevance
    #[serde(default = "default_true")]
    pub relevance_filter: bool,

    /// Fail startup when essential tools are missing from the catalog
    #[serde(default)]
    pub strict_essentials: bool,

    /// Compact tool schemas once they exceed this share of the budget
    #[serde(default = "default_compress_above")]
    pub compress_above: f32,
}

fn default_compress_above() -> f32 {
    0.25
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            relevance_filter: true,
            strict_essentials: false,
            compress_above: default_compress_above(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Per-call timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

impl EngineConfig {
    /// Load configuration from the default path (~/.continuum/config.toml).
    ///
    /// Also checks environment variables:
    /// - `CONTINUUM_API_KEY` (highest priority), then `ANTHROPIC_API_KEY`
    /// - `CONTINUUM_MODEL`
    /// - `CONTINUUM_FALLBACK_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("CONTINUUM_API_KEY").or_else(|| lookup("ANTHROPIC_API_KEY"));
        }
        if let Some(model) = lookup("CONTINUUM_MODEL") {
            self.model = model;
        }
        if let Some(fallback) = lookup("CONTINUUM_FALLBACK_MODEL") {
            self.fallback_model = Some(fallback);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".continuum")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationError("max_tokens must be > 0".into()));
        }

        if self.continuation.max_tool_calls == 0 {
            return Err(ConfigError::ValidationError(
                "continuation.max_tool_calls must be > 0".into(),
            ));
        }

        if !(self.context.budget_fraction > 0.0 && self.context.budget_fraction <= 1.0) {
            return Err(ConfigError::ValidationError(
                "context.budget_fraction must be in (0.0, 1.0]".into(),
            ));
        }

        if self.context.recent_messages == 0 {
            return Err(ConfigError::ValidationError(
                "context.recent_messages must be > 0".into(),
            ));
        }

        if !(self.tools.compress_above > 0.0 && self.tools.compress_above <= 1.0) {
            return Err(ConfigError::ValidationError(
                "tools.compress_above must be in (0.0, 1.0]".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            model: default_model(),
            fallback_model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            tool_choice: ToolChoice::Auto,
            stream: true,
            continuation: ContinuationConfig::default(),
            context: ContextConfig::default(),
            caching: CachingConfig::default(),
            tools: ToolsConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.continuation.max_tool_calls, 5);
        assert_eq!(config.context.recent_messages, 8);
        assert!(config.caching.enabled);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(
            parsed.continuation.max_auto_continues,
            config.continuation.max_auto_continues
        );
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = EngineConfig {
            temperature: 5.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_tool_call_cap_rejected() {
        let mut config = EngineConfig::default();
        config.continuation.max_tool_calls = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn budget_fraction_bounds() {
        let mut config = EngineConfig::default();
        config.context.budget_fraction = 0.0;
        assert!(config.validate().is_err());
        config.context.budget_fraction = 1.5;
        assert!(config.validate().is_err());
        config.context.budget_fraction = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = EngineConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_provider, "anthropic");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
model = "gpt-4o"
fallback_model = "gpt-4o-mini"
tool_choice = "required"

[continuation]
max_auto_continues = 3

[context]
max_context_tokens = 20000
"#
        )
        .unwrap();

        let config = EngineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.fallback_model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.tool_choice, ToolChoice::Required);
        assert_eq!(config.continuation.max_auto_continues, 3);
        assert_eq!(config.continuation.max_tool_calls, 5);
        assert_eq!(config.context.max_context_tokens, Some(20000));
        assert!(config.stream);
    }

    #[test]
    fn invalid_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model = [").unwrap();
        let err = EngineConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = EngineConfig::default();
        config.apply_env(|key| match key {
            "ANTHROPIC_API_KEY" => Some("sk-ant".into()),
            "CONTINUUM_FALLBACK_MODEL" => Some("claude-3-5-haiku-latest".into()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("sk-ant"));
        assert_eq!(
            config.fallback_model.as_deref(),
            Some("claude-3-5-haiku-latest")
        );
        assert_eq!(config.model, default_model());
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = EngineConfig {
            api_key: Some("sk-secret".into()),
            ..EngineConfig::default()
        };
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = EngineConfig::default_toml();
        assert!(toml_str.contains("max_tool_calls"));
        assert!(toml_str.contains("recent_messages"));
    }
}

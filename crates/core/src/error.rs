//! Error types for the Continuum domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Continuum operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Message store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Tool catalog consistency ---
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reported by a model invocation gateway.
///
/// Gateways classify provider responses into these variants so the
/// continuation controller never has to inspect provider-specific text.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider overloaded: {0}")]
    Overloaded(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Coarse classification of a [`ProviderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimited,
    Overloaded,
    Timeout,
    Auth,
    InvalidRequest,
    Malformed,
    Other,
}

impl ProviderError {
    /// Classify this error.
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::RateLimited { .. } => ProviderErrorKind::RateLimited,
            Self::Overloaded(_) => ProviderErrorKind::Overloaded,
            Self::Timeout(_) => ProviderErrorKind::Timeout,
            Self::AuthenticationFailed(_) => ProviderErrorKind::Auth,
            Self::InvalidRequest(_) => ProviderErrorKind::InvalidRequest,
            Self::MalformedResponse(_) => ProviderErrorKind::Malformed,
            Self::ApiError { .. }
            | Self::StreamInterrupted(_)
            | Self::NotConfigured(_)
            | Self::Network(_) => ProviderErrorKind::Other,
        }
    }

    /// Whether a single fallback-and-retry is allowed for this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ProviderErrorKind::RateLimited
                | ProviderErrorKind::Overloaded
                | ProviderErrorKind::Timeout
        )
    }

    /// Map an HTTP status code to a typed error.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status_code {
            429 => Self::RateLimited { retry_after_secs: 5 },
            503 | 529 => Self::Overloaded(message),
            408 | 504 => Self::Timeout(message),
            401 | 403 => Self::AuthenticationFailed(message),
            400 | 404 | 413 | 422 => Self::InvalidRequest(message),
            _ => Self::ApiError {
                status_code,
                message,
            },
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Drift between the hard-coded tool tables and the registered catalog.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Essential tools missing from catalog: {}", .0.join(", "))]
    MissingEssential(Vec<String>),

    #[error("Duplicate tool name in catalog: {0}")]
    DuplicateName(String),
}

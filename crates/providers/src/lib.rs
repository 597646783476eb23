//! Model invocation gateways for Continuum.
//!
//! All providers implement the `continuum_core::Provider` trait.
//! The router selects the correct provider for each model id, and every
//! configured provider is wrapped in a per-call timeout.

pub mod anthropic;
pub mod router;
pub mod timeout;

pub use anthropic::AnthropicProvider;
pub use router::{ProviderRouter, build_from_config};
pub use timeout::TimeoutProvider;

//! Provider router: selects the LLM provider for each model id.
//!
//! A model id may carry a provider prefix (`anthropic/claude-sonnet-4`).
//! When the prefix names a registered provider the request goes there with
//! the prefix stripped; otherwise it goes to the default provider unchanged.
//! The router is itself a [`Provider`], so the continuation controller can
//! switch to a fallback model on another backend without knowing it.

use crate::anthropic::AnthropicProvider;
use crate::timeout::TimeoutProvider;
use async_trait::async_trait;
use continuum_config::EngineConfig;
use continuum_core::error::ProviderError;
use continuum_core::provider::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default_provider(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Resolve the provider and provider-side model id for `model`.
    pub fn resolve(&self, model: &str) -> Option<(Arc<dyn Provider>, String)> {
        if let Some((prefix, rest)) = model.split_once('/') {
            if let Some(provider) = self.get(prefix) {
                return Some((provider, rest.to_string()));
            }
        }
        self.default_provider().map(|p| (p, model.to_string()))
    }

    /// List all registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    fn route(&self, request: &mut ProviderRequest) -> Result<Arc<dyn Provider>, ProviderError> {
        let (provider, model) = self.resolve(&request.model).ok_or_else(|| {
            ProviderError::NotConfigured(format!("no provider for model '{}'", request.model))
        })?;
        debug!(provider = %provider.name(), model = %model, "Routing request");
        request.model = model;
        Ok(provider)
    }
}

#[async_trait]
impl Provider for ProviderRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn complete(
        &self,
        mut request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let provider = self.route(&mut request)?;
        provider.complete(request).await
    }

    async fn stream(
        &self,
        mut request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let provider = self.route(&mut request)?;
        provider.stream(request).await
    }

    fn supports_prompt_caching(&self, model: &str) -> bool {
        self.resolve(model)
            .is_some_and(|(provider, model)| provider.supports_prompt_caching(&model))
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        match self.default_provider() {
            Some(provider) => provider.health_check().await,
            None => Err(ProviderError::NotConfigured(self.default_provider.clone())),
        }
    }
}

/// Build providers from configuration.
///
/// Every provider is wrapped in a [`TimeoutProvider`] using its configured
/// `timeout_secs`. Unsupported provider names are skipped with a warning.
pub fn build_from_config(config: &EngineConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        let provider: Arc<dyn Provider> = match name.as_str() {
            "anthropic" => {
                let mut p = AnthropicProvider::new(&api_key);
                if let Some(url) = &provider_config.api_url {
                    p = p.with_base_url(url);
                }
                Arc::new(p)
            }
            other => {
                warn!(provider = %other, "Unsupported provider in config, skipping");
                continue;
            }
        };

        let timeout = Duration::from_secs(provider_config.timeout_secs);
        router.register(name.clone(), Arc::new(TimeoutProvider::new(provider, timeout)));
    }

    // Ensure the default provider exists (even if not explicitly configured)
    if router.get(&config.default_provider).is_none() && config.default_provider == "anthropic" {
        let api_key = config.api_key.clone().unwrap_or_default();
        router.register(
            config.default_provider.clone(),
            Arc::new(TimeoutProvider::new(
                Arc::new(AnthropicProvider::new(&api_key)),
                crate::timeout::DEFAULT_TIMEOUT,
            )),
        );
    }

    router
}

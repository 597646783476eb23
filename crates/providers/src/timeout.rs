//! Per-call timeout for any provider.
//!
//! Wraps a provider so that a call which produces nothing within the limit
//! fails with [`ProviderError::Timeout`], a transient error the continuation
//! controller may answer with its single fallback retry. For streams the
//! limit applies to opening the stream and to every gap between chunks.

use async_trait::async_trait;
use continuum_core::error::ProviderError;
use continuum_core::provider::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Default limit when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// A provider whose calls give up after a fixed duration.
pub struct TimeoutProvider {
    inner: Arc<dyn Provider>,
    timeout: Duration,
}

impl TimeoutProvider {
    pub fn new(inner: Arc<dyn Provider>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn elapsed(&self, what: &str) -> ProviderError {
        warn!(
            provider = %self.inner.name(),
            timeout_secs = self.timeout.as_secs(),
            "{what} timed out"
        );
        ProviderError::Timeout(format!(
            "{} produced no {what} within {}s",
            self.inner.name(),
            self.timeout.as_secs()
        ))
    }
}

#[async_trait]
impl Provider for TimeoutProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        match tokio::time::timeout(self.timeout, self.inner.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(self.elapsed("response")),
        }
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let mut inner = match tokio::time::timeout(self.timeout, self.inner.stream(request)).await {
            Ok(result) => result?,
            Err(_) => return Err(self.elapsed("stream")),
        };

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let timeout = self.timeout;
        let name = self.inner.name().to_string();

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = tx.closed() => return,
                    next = tokio::time::timeout(timeout, inner.recv()) => next,
                };
                match next {
                    Ok(Some(item)) => {
                        if tx.send(item).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(_) => {
                        warn!(provider = %name, timeout_secs = timeout.as_secs(), "Stream stalled");
                        let _ = tx
                            .send(Err(ProviderError::Timeout(format!(
                                "{name} stream stalled for {}s",
                                timeout.as_secs()
                            ))))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    fn supports_prompt_caching(&self, model: &str) -> bool {
        self.inner.supports_prompt_caching(model)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        match tokio::time::timeout(self.timeout, self.inner.health_check()).await {
            Ok(result) => result,
            Err(_) => Err(self.elapsed("health check")),
        }
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{LlmClient, LlmError, LlmRequest};
use tokio::sync::Semaphore;
use tracing::trace;

/// Caps the number of outstanding calls across every job sharing this client.
///
/// Job-local worker pools bound concurrency within one job; this bounds it
/// across the process so provider rate limits hold no matter how many jobs run.
pub struct ConcurrencyLimitedClient<C> {
    inner: C,
    permits: Arc<Semaphore>,
}

impl<C: LlmClient> ConcurrencyLimitedClient<C> {
    /// `max_outstanding` of zero is treated as one.
    pub fn new(inner: C, max_outstanding: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_outstanding.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for ConcurrencyLimitedClient<C> {
    async fn invoke(&self, request: LlmRequest) -> Result<serde_json::Value, LlmError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| LlmError::Provider {
                message: "call limiter closed".into(),
            })?;
        trace!(available = self.permits.available_permits(), "Limiter permit acquired");
        self.inner.invoke(request).await
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, WealthWiseError};
use crate::interfaces::providers::{CompletionClient, CompletionRequest, CompletionResponse};

/// Bounds every completion call; an elapsed deadline is reported as `Timeout`.
pub struct TimedCompletionClient {
    inner: Arc<dyn CompletionClient>,
    timeout: Duration,
}

impl TimedCompletionClient {
    pub fn new(inner: Arc<dyn CompletionClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl CompletionClient for TimedCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        tokio::time::timeout(self.timeout, self.inner.complete(request))
            .await
            .map_err(|_| WealthWiseError::Timeout(self.timeout.as_secs()))?
    }
}

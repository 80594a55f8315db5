//! Content generator wrapped with backoff and quota fallback.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{GenerateRequest, GenerateResponse};
use crate::util::retry::RetryFallbackCoordinator;

use super::ContentGenerator;

/// Dispatches every request through a [`RetryFallbackCoordinator`].
///
/// The request's model is replaced by the fallback model while fallback mode
/// is active for the session.
#[derive(Clone)]
pub struct RetryingGenerator {
    inner: Arc<dyn ContentGenerator>,
    coordinator: RetryFallbackCoordinator,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn ContentGenerator>, coordinator: RetryFallbackCoordinator) -> Self {
        Self { inner, coordinator }
    }

    pub fn coordinator(&self) -> &RetryFallbackCoordinator {
        &self.coordinator
    }
}

#[async_trait]
impl ContentGenerator for RetryingGenerator {
    async fn generate(
        &self,
        request: &GenerateRequest,
        prompt_id: &str,
    ) -> Result<GenerateResponse> {
        let cancel = request.abort.clone();
        self.coordinator
            .execute(&request.model, &cancel, |model| {
                let inner = self.inner.clone();
                let mut attempt = request.clone();
                attempt.model = model;
                async move { inner.generate(&attempt, prompt_id).await }
            })
            .await
    }
}

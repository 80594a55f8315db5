//! Content generation client trait.

pub mod retrying;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{GenerateRequest, GenerateResponse};

pub use retrying::RetryingGenerator;

/// One-shot (non-streaming) model invocation.
///
/// Used for summarization and classification calls; streamed turns go through
/// [`crate::session::TurnExecutor`].
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerateRequest, prompt_id: &str)
        -> Result<GenerateResponse>;
}

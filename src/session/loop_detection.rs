//! Loop detector contract.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::events::TurnEvent;

/// Flags repetitive model behavior within a sequence.
#[async_trait]
pub trait LoopDetector: Send + Sync {
    /// Forget state from the previous sequence.
    fn reset(&self, prompt_id: &str);

    /// Called before each model call; true if the sequence is already looping.
    async fn turn_started(&self, cancel: &CancellationToken) -> bool;

    /// Feed one streamed event; true if a loop was detected.
    fn add_and_check(&self, event: &TurnEvent) -> bool;
}

/// Never detects a loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLoopDetector;

#[async_trait]
impl LoopDetector for NoopLoopDetector {
    fn reset(&self, _prompt_id: &str) {}

    async fn turn_started(&self, _cancel: &CancellationToken) -> bool {
        false
    }

    fn add_and_check(&self, _event: &TurnEvent) -> bool {
        false
    }
}

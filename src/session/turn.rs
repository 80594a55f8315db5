//! One streamed model call and its observed outcome.

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::chat::Chat;
use crate::types::{FinishReason, FunctionCall, Part};

use super::events::TurnEvent;

/// Runs one model call (and its tool loop) against a chat.
///
/// Implementations append the request and the model's reply to `chat` and end
/// the stream when the call is exhausted or `cancel` fires.
pub trait TurnExecutor: Send + Sync {
    fn run(
        &self,
        chat: Chat,
        model: String,
        request: Vec<Part>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, TurnEvent>;
}

/// Outcome of a turn, accumulated from its events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub prompt_id: String,
    /// Model the turn ran against; empty when no call was made.
    pub model: String,
    pub pending_tool_calls: Vec<FunctionCall>,
    pub finish_reason: Option<FinishReason>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Turn {
    pub fn new(prompt_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    /// A turn that made no model call.
    pub fn empty(prompt_id: impl Into<String>) -> Self {
        Self::new(prompt_id, "")
    }

    pub fn observe(&mut self, event: &TurnEvent) {
        match event {
            TurnEvent::ToolCallRequest { call } => self.pending_tool_calls.push(call.clone()),
            TurnEvent::Finished { reason } => {
                self.finish_reason = Some(*reason);
                self.finished_at = Some(Utc::now());
            }
            _ => {}
        }
    }

    pub fn has_pending_tool_calls(&self) -> bool {
        !self.pending_tool_calls.is_empty()
    }
}

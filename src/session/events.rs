//! Session event stream types.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::compression::{CompressionResult, CompressionStatus};
use crate::config::AuthType;
use crate::error::ParleyError;
use crate::types::{FinishReason, FunctionCall, UsageMetadata};

use super::turn::Turn;

/// Events produced by one turn executor run, forwarded unchanged to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Content {
        text: String,
    },
    Thought {
        text: String,
    },
    ToolCallRequest {
        call: FunctionCall,
    },
    UsageMetadata {
        usage: UsageMetadata,
    },
    Finished {
        reason: FinishReason,
    },
    /// The stream ended without valid model output.
    InvalidStream,
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
    },
    UserCancelled,
}

impl TurnEvent {
    /// The failure carried by an `Error` event.
    pub fn as_error(&self) -> Option<ParleyError> {
        match self {
            Self::Error {
                message,
                status: Some(status),
            } => Some(ParleyError::api(*status, message.clone())),
            Self::Error {
                message,
                status: None,
            } => Some(ParleyError::Stream(message.clone())),
            _ => None,
        }
    }
}

/// Events emitted by [`super::SessionOrchestrator::send_message_stream`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SessionEvent {
    Turn(TurnEvent),
    /// Session turn budget exceeded; no model call was made.
    MaxSessionTurns,
    /// Request would not fit in the remaining window; no model call was made.
    ContextWindowWillOverflow {
        estimated_request_tokens: usize,
        remaining_tokens: usize,
    },
    ChatCompressed(CompressionResult),
    LoopDetected,
    ModelInfo {
        model: String,
    },
    /// Always the last event: the top-level turn.
    Finished(Turn),
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::MaxSessionTurns
                | Self::ContextWindowWillOverflow { .. }
                | Self::LoopDetected
                | Self::Turn(TurnEvent::Error { .. })
        )
    }
}

/// Structured records for hosts that collect telemetry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    ContentRetryFailure {
        total_attempts: u32,
        error_type: String,
        model: String,
    },
    NextSpeakerCheck {
        prompt_id: String,
        finish_reason: Option<FinishReason>,
        result: String,
    },
    ChatCompression {
        original_token_count: usize,
        new_token_count: usize,
        status: CompressionStatus,
    },
    ModelRouted {
        prompt_id: String,
        model: String,
        reason: String,
    },
    FlashFallback {
        from: String,
        to: String,
        auth_type: AuthType,
    },
}

/// Callback for telemetry records.
pub type TelemetrySink = Arc<dyn Fn(TelemetryEvent) + Send + Sync>;

pub(crate) fn emit(sink: Option<&TelemetrySink>, event: TelemetryEvent) {
    if let Some(sink) = sink {
        sink(event);
    }
}

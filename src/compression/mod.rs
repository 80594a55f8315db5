//! History compression: split point selection and summary rebuild.

pub mod prompt;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;

use crate::chat::Chat;
use crate::error::{ParleyError, Result};
use crate::provider::ContentGenerator;
use crate::session::events::{emit, TelemetryEvent, TelemetrySink};
use crate::session::SessionState;
use crate::types::{Content, GenerateRequest, Role};
use crate::util::tokens::{estimate_history_tokens, serialized_len};

use self::prompt::{compression_prompt, SUMMARY_ACK, SUMMARY_REQUEST};

/// Outcome of one compression attempt.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CompressionStatus {
    Noop,
    Compressed,
    /// The rebuilt history was not smaller than the original.
    FailedInflated,
    /// The summarization call failed or returned nothing.
    FailedEmptySummary,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompressionResult {
    pub original_token_count: usize,
    pub new_token_count: usize,
    pub status: CompressionStatus,
}

impl CompressionResult {
    fn noop(tokens: usize) -> Self {
        Self {
            original_token_count: tokens,
            new_token_count: tokens,
            status: CompressionStatus::Noop,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.status == CompressionStatus::Compressed
    }
}

/// Index below which entries are summarized; entries at or after it are kept.
///
/// Only user entries without a function response are candidates, so a
/// function call is never separated from its response.
pub fn find_split_point(history: &[Content], fraction: f64) -> Result<usize> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(ParleyError::InvalidArgument(format!(
            "compress fraction must be between 0 and 1, got {fraction}"
        )));
    }

    let weights: Vec<usize> = history.iter().map(serialized_len).collect();
    let total: usize = weights.iter().sum();
    let target = total as f64 * fraction;

    let mut last_candidate = 0;
    let mut seen = 0usize;
    for (index, content) in history.iter().enumerate() {
        if content.role == Role::User && !content.has_function_response() {
            if seen as f64 >= target {
                return Ok(index);
            }
            last_candidate = index;
        }
        seen += weights[index];
    }

    // A trailing plain model answer closes every exchange.
    if let Some(last) = history.last() {
        if last.role == Role::Model && !last.has_function_call() {
            return Ok(history.len());
        }
    }
    Ok(last_candidate)
}

/// Decides whether to compact a chat and performs the summarize-and-rebuild.
#[derive(Clone)]
pub struct CompressionEngine {
    threshold: f64,
    preserve_fraction: f64,
    generator: Arc<dyn ContentGenerator>,
    telemetry: Option<TelemetrySink>,
}

impl CompressionEngine {
    pub fn new(threshold: f64, preserve_fraction: f64, generator: Arc<dyn ContentGenerator>) -> Self {
        Self {
            threshold,
            preserve_fraction,
            generator,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, sink: TelemetrySink) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Compress `chat` if it is over the threshold, or unconditionally when `force`.
    ///
    /// Failures never propagate: the live chat is left untouched and, for
    /// non-forced attempts, further non-forced compression is disabled.
    #[allow(clippy::too_many_arguments)]
    pub async fn compress(
        &self,
        chat: &Chat,
        state: &mut SessionState,
        model: &str,
        token_limit: usize,
        prompt_id: &str,
        force: bool,
        cancel: &CancellationToken,
    ) -> CompressionResult {
        let curated = chat.curated_history();
        let original = match chat.last_prompt_token_count() {
            0 => estimate_history_tokens(&curated),
            observed => observed,
        };

        if curated.is_empty() || (state.compression_disabled && !force) {
            return CompressionResult::noop(original);
        }

        if !force && (original as f64) < self.threshold * token_limit as f64 {
            return CompressionResult::noop(original);
        }

        let split = match find_split_point(&curated, 1.0 - self.preserve_fraction) {
            Ok(split) => split,
            Err(err) => {
                tracing::warn!(error = %err, "Invalid compression fraction");
                return CompressionResult::noop(original);
            }
        };
        if split == 0 {
            return CompressionResult::noop(original);
        }

        let (to_compress, to_keep) = curated.split_at(split);
        let mut contents = to_compress.to_vec();
        contents.push(Content::user(SUMMARY_REQUEST));

        let request = GenerateRequest::builder()
            .model(model)
            .contents(contents)
            .system_instruction(compression_prompt())
            .abort(cancel.clone())
            .build();

        let summary = match self.generator.generate(&request, prompt_id).await {
            Ok(response) => response.text,
            Err(ParleyError::Cancelled) => {
                tracing::debug!(prompt_id, "Summarization cancelled");
                return CompressionResult::noop(original);
            }
            Err(err) => {
                tracing::warn!(prompt_id, error = %err, "Summarization call failed");
                String::new()
            }
        };
        if summary.trim().is_empty() {
            return self.fail(state, original, original, CompressionStatus::FailedEmptySummary, force);
        }

        let mut rebuilt = state.initial_history.clone();
        rebuilt.push(Content::user(summary));
        rebuilt.push(Content::model(SUMMARY_ACK));
        rebuilt.extend_from_slice(to_keep);

        let new_tokens = estimate_history_tokens(&rebuilt);
        if new_tokens >= original {
            return self.fail(state, original, new_tokens, CompressionStatus::FailedInflated, force);
        }

        chat.set_history(rebuilt);
        chat.set_last_prompt_token_count(new_tokens);

        tracing::info!(
            prompt_id,
            original_tokens = original,
            new_tokens,
            split,
            "Compressed chat history"
        );
        let result = CompressionResult {
            original_token_count: original,
            new_token_count: new_tokens,
            status: CompressionStatus::Compressed,
        };
        self.record(&result);
        result
    }

    fn fail(
        &self,
        state: &mut SessionState,
        original: usize,
        new_tokens: usize,
        status: CompressionStatus,
        force: bool,
    ) -> CompressionResult {
        if !force {
            state.compression_disabled = true;
        }
        tracing::warn!(
            original_tokens = original,
            new_tokens,
            %status,
            "Compression failed; keeping the existing history"
        );
        let result = CompressionResult {
            original_token_count: original,
            new_token_count: new_tokens,
            status,
        };
        self.record(&result);
        result
    }

    fn record(&self, result: &CompressionResult) {
        emit(
            self.telemetry.as_ref(),
            TelemetryEvent::ChatCompression {
                original_token_count: result.original_token_count,
                new_token_count: result.new_token_count,
                status: result.status,
            },
        );
    }
}

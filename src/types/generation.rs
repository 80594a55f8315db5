//! One-shot generation requests and responses.

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;

use super::content::Content;

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    MalformedFunctionCall,
    Other,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: usize,
    #[serde(default)]
    pub candidates_token_count: usize,
    #[serde(default)]
    pub total_token_count: usize,
}

/// A single non-streaming request to the content generator.
#[derive(Debug, Clone, Builder)]
pub struct GenerateRequest {
    #[builder(into)]
    pub model: String,
    pub contents: Vec<Content>,
    #[builder(into)]
    pub system_instruction: Option<String>,
    /// JSON schema the response text must conform to.
    pub response_schema: Option<serde_json::Value>,
    #[builder(default)]
    pub abort: CancellationToken,
}

/// Response from the content generator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateResponse {
    pub text: String,
    pub usage: Option<UsageMetadata>,
    pub finish_reason: Option<FinishReason>,
}

impl GenerateResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            finish_reason: Some(FinishReason::Stop),
        }
    }
}

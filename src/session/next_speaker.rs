//! Decides whether the model should keep speaking without new user input.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;

use crate::chat::Chat;
use crate::models::DEFAULT_FLASH_MODEL;
use crate::provider::ContentGenerator;
use crate::types::{Content, GenerateRequest, Part, Role};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NextSpeaker {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NextSpeakerResponse {
    pub reasoning: String,
    pub next_speaker: NextSpeaker,
}

impl NextSpeakerResponse {
    fn model(reasoning: &str) -> Self {
        Self {
            reasoning: reasoning.to_string(),
            next_speaker: NextSpeaker::Model,
        }
    }
}

/// Auxiliary classifier consulted after a turn ends without tool calls.
#[async_trait]
pub trait NextSpeakerChecker: Send + Sync {
    /// `None` means no decision; the orchestrator then stops.
    async fn check(
        &self,
        chat: &Chat,
        client: &dyn ContentGenerator,
        cancel: &CancellationToken,
        prompt_id: &str,
    ) -> Option<NextSpeakerResponse>;
}

const CHECK_PROMPT: &str = r#"Analyze *only* the content and structure of your immediately preceding response (your last turn in the conversation history). Based *strictly* on that response, determine who should logically speak next: the 'user' or the 'model' (you).

**Decision Rules (apply in order):**
1. **Model Continues:** If your last response explicitly states an immediate next action *you* intend to take (e.g., "Next, I will...", "Now I'll process...", "Moving on to analyze..."), OR if the response seems clearly incomplete (cut off mid-thought without a natural conclusion), then the **'model'** should speak next.
2. **Question to User:** If your last response ends with a direct question specifically addressed *to the user*, then the **'user'** should speak next.
3. **Waiting for User:** If your last response completed a thought, statement, or task *and* does not meet the criteria for Rule 1 or Rule 2, it implies a pause expecting user input. In this case, the **'user'** should speak next.

Respond *only* in JSON format according to the following schema. Do not include any text outside the JSON structure.
```json
{
  "type": "object",
  "properties": {
    "reasoning": {
      "type": "string",
      "description": "Brief explanation justifying the 'next_speaker' choice based *strictly* on the applicable rule and the content/structure of the preceding turn."
    },
    "next_speaker": {
      "type": "string",
      "enum": ["user", "model"],
      "description": "Who should speak next based *only* on the preceding turn and the decision rules."
    }
  },
  "required": ["reasoning", "next_speaker"]
}
```"#;

/// Default classifier: cheap structural checks, then a small model call.
#[derive(Debug, Clone)]
pub struct LlmNextSpeakerChecker {
    model: String,
}

impl Default for LlmNextSpeakerChecker {
    fn default() -> Self {
        Self::new(DEFAULT_FLASH_MODEL)
    }
}

impl LlmNextSpeakerChecker {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    fn response_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "reasoning": { "type": "string" },
                "next_speaker": { "type": "string", "enum": ["user", "model"] }
            },
            "required": ["reasoning", "next_speaker"]
        })
    }
}

#[async_trait]
impl NextSpeakerChecker for LlmNextSpeakerChecker {
    async fn check(
        &self,
        chat: &Chat,
        client: &dyn ContentGenerator,
        cancel: &CancellationToken,
        prompt_id: &str,
    ) -> Option<NextSpeakerResponse> {
        let curated = chat.curated_history();
        if curated.is_empty() {
            return None;
        }

        let last = chat.last_entry()?;
        let only_function_responses =
            !last.parts.is_empty() && last.parts.iter().all(Part::is_function_response);
        if last.role == Role::User && only_function_responses {
            return Some(NextSpeakerResponse::model(
                "The last message was a function response, so the model should speak next.",
            ));
        }
        if last.role == Role::Model && last.parts.is_empty() {
            return Some(NextSpeakerResponse::model(
                "The last message was an empty model response; the model should speak next.",
            ));
        }

        let last_curated = curated.last()?;
        if last_curated.role != Role::Model {
            return None;
        }

        let mut contents = curated;
        contents.push(Content::user(CHECK_PROMPT));
        let request = GenerateRequest::builder()
            .model(self.model.clone())
            .contents(contents)
            .response_schema(Self::response_schema())
            .abort(cancel.clone())
            .build();

        let response = match client.generate(&request, prompt_id).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(prompt_id, error = %err, "Next speaker check failed");
                return None;
            }
        };

        match parse_verdict(&response.text) {
            Some(verdict) => Some(verdict),
            None => {
                tracing::debug!(prompt_id, "Next speaker check returned no usable verdict");
                None
            }
        }
    }
}

/// Parse a JSON verdict, tolerating a surrounding code fence.
fn parse_verdict(text: &str) -> Option<NextSpeakerResponse> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).ok()
}

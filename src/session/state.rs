//! Session-scoped mutable state owned by the orchestrator.

use uuid::Uuid;

use crate::context::IdeContextSnapshot;
use crate::types::Content;

#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: Uuid,
    /// Model turns started in this session.
    pub turn_counter: u32,
    sticky_model: Option<String>,
    last_prompt_id: Option<String>,
    /// Set after a failed non-forced compression.
    pub compression_disabled: bool,
    pub last_user_memory: Option<String>,
    /// Send the full editor context on the next injection.
    pub force_full_ide_context: bool,
    pub last_sent_ide_context: Option<IdeContextSnapshot>,
    /// Handshake entries that open the chat and survive compression.
    pub initial_history: Vec<Content>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            turn_counter: 0,
            sticky_model: None,
            last_prompt_id: None,
            compression_disabled: false,
            last_user_memory: None,
            force_full_ide_context: false,
            last_sent_ide_context: None,
            initial_history: Vec::new(),
        }
    }
}

impl SessionState {
    /// Record `prompt_id`; returns true when it starts a new sequence.
    ///
    /// A new sequence clears the sticky model.
    pub fn begin_sequence(&mut self, prompt_id: &str) -> bool {
        if self.last_prompt_id.as_deref() == Some(prompt_id) {
            return false;
        }
        self.last_prompt_id = Some(prompt_id.to_string());
        self.sticky_model = None;
        true
    }

    pub fn last_prompt_id(&self) -> Option<&str> {
        self.last_prompt_id.as_deref()
    }

    pub fn sticky_model(&self) -> Option<&str> {
        self.sticky_model.as_deref()
    }

    /// Pin `model` for the rest of the current sequence.
    pub fn pin_model(&mut self, model: impl Into<String>) {
        self.sticky_model = Some(model.into());
    }

    /// Reset chat-scoped fields for a freshly started chat.
    pub fn reset_for_new_chat(&mut self, initial_history: Vec<Content>) {
        self.initial_history = initial_history;
        self.compression_disabled = false;
        self.force_full_ide_context = true;
        self.last_sent_ide_context = None;
    }
}

//! Shared conversation history handle.
//!
//! The orchestrator and the turn executor both hold a [`Chat`]; clones share the
//! same underlying history. Callers guarantee a single request in flight per
//! session, so the lock is only ever held for the duration of one accessor.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{Content, Role};

/// Acknowledgement the model gives for the environment handshake.
pub const HANDSHAKE_ACK: &str = "Got it. Thanks for the context!";

#[derive(Debug, Default)]
struct ChatInner {
    history: Vec<Content>,
    system_instruction: Option<String>,
    last_prompt_token_count: usize,
}

/// Cheap-clone handle over one conversation.
#[derive(Debug, Clone, Default)]
pub struct Chat {
    inner: Arc<RwLock<ChatInner>>,
}

impl Chat {
    pub fn new(history: Vec<Content>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ChatInner {
                history,
                ..ChatInner::default()
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ChatInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ChatInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Full history, including invalid or partial model output.
    pub fn history(&self) -> Vec<Content> {
        self.read().history.clone()
    }

    /// History considered valid for sending to the model.
    pub fn curated_history(&self) -> Vec<Content> {
        extract_curated_history(&self.read().history)
    }

    pub fn last_entry(&self) -> Option<Content> {
        self.read().history.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.read().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().history.is_empty()
    }

    pub fn add_history(&self, content: Content) {
        self.write().history.push(content);
    }

    pub fn set_history(&self, history: Vec<Content>) {
        self.write().history = history;
    }

    pub fn system_instruction(&self) -> Option<String> {
        self.read().system_instruction.clone()
    }

    pub fn set_system_instruction(&self, instruction: impl Into<String>) {
        self.write().system_instruction = Some(instruction.into());
    }

    /// Prompt size reported by the provider for the most recent request.
    pub fn last_prompt_token_count(&self) -> usize {
        self.read().last_prompt_token_count
    }

    pub fn set_last_prompt_token_count(&self, count: usize) {
        self.write().last_prompt_token_count = count;
    }
}

/// Keep user entries and every run of consecutive model entries whose output is valid.
pub fn extract_curated_history(history: &[Content]) -> Vec<Content> {
    let mut curated = Vec::with_capacity(history.len());
    let mut i = 0;
    while i < history.len() {
        if history[i].role == Role::User {
            curated.push(history[i].clone());
            i += 1;
            continue;
        }

        let start = i;
        while i < history.len() && history[i].role == Role::Model {
            i += 1;
        }
        let run = &history[start..i];
        if run.iter().all(Content::is_valid_model_output) {
            curated.extend_from_slice(run);
        }
    }
    curated
}

/// Environment handshake that opens every chat.
pub fn initial_handshake(environment: impl Into<String>) -> Vec<Content> {
    vec![Content::user(environment), Content::model(HANDSHAKE_ACK)]
}

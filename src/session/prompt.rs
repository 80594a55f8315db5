//! System instruction source.

/// Supplies the user memory and the system prompt built from it.
pub trait SystemPromptSource: Send + Sync {
    /// Current user memory; the prompt is rebuilt only when this changes.
    fn user_memory(&self) -> String;

    fn system_prompt(&self, user_memory: &str) -> String;
}

/// A fixed base prompt with the user memory appended as its own section.
#[derive(Debug, Clone, Default)]
pub struct StaticSystemPrompt {
    base: String,
    memory: String,
}

impl StaticSystemPrompt {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            memory: String::new(),
        }
    }

    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = memory.into();
        self
    }
}

impl SystemPromptSource for StaticSystemPrompt {
    fn user_memory(&self) -> String {
        self.memory.clone()
    }

    fn system_prompt(&self, user_memory: &str) -> String {
        let memory = user_memory.trim();
        if memory.is_empty() {
            self.base.clone()
        } else {
            format!("{}\n\n---\n\n{memory}", self.base)
        }
    }
}

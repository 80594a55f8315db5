//! Shared test helpers: mock generator and a streaming turn executor.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use parley::chat::Chat;
use parley::error::{ParleyError, Result};
use parley::prelude::CancellationToken;
use parley::provider::ContentGenerator;
use parley::session::{TurnEvent, TurnExecutor};
use parley::types::*;

/// A mock generator that returns queued replies, then a default one.
#[derive(Default)]
pub struct MockGenerator {
    replies: Mutex<VecDeque<Result<GenerateResponse>>>,
    pub requests: Mutex<Vec<GenerateRequest>>,
}

impl MockGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a text reply.
    pub fn queue_text(&self, text: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(GenerateResponse::text(text)));
    }

    /// Queue a failure.
    pub fn queue_error(&self, error: ParleyError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn models(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.model.clone())
            .collect()
    }
}

#[async_trait]
impl ContentGenerator for MockGenerator {
    async fn generate(&self, request: &GenerateRequest, _prompt_id: &str) -> Result<GenerateResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(GenerateResponse::text("Mock response")))
    }
}

/// What the executor should do for one call.
#[derive(Clone)]
pub enum Step {
    Say(&'static str),
    Call(&'static str, serde_json::Value),
}

/// Streams queued steps word by word and records them in the chat.
#[derive(Default)]
pub struct MockExecutor {
    steps: Mutex<VecDeque<Step>>,
    pub models: Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            models: Mutex::new(Vec::new()),
        })
    }
}

impl TurnExecutor for MockExecutor {
    fn run(
        &self,
        chat: Chat,
        model: String,
        request: Vec<Part>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, TurnEvent> {
        self.models.lock().unwrap().push(model);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Say("Mock reply"));

        async_stream::stream! {
            chat.add_history(Content::new(Role::User, request));
            match step {
                Step::Say(text) => {
                    for word in text.split_inclusive(' ') {
                        if cancel.is_cancelled() {
                            yield TurnEvent::UserCancelled;
                            return;
                        }
                        yield TurnEvent::Content { text: word.to_string() };
                    }
                    chat.add_history(Content::model(text));
                }
                Step::Call(name, args) => {
                    chat.add_history(Content::function_call(name, args.clone()));
                    yield TurnEvent::ToolCallRequest {
                        call: FunctionCall { id: None, name: name.to_string(), args },
                    };
                }
            }
            yield TurnEvent::Finished { reason: FinishReason::Stop };
        }
        .boxed()
    }
}

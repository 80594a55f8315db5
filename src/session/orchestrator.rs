//! Session orchestrator: one request in, an ordered event stream out.

use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::chat::{initial_handshake, Chat};
use crate::compression::{CompressionEngine, CompressionResult};
use crate::config::SessionConfig;
use crate::context::IdeContextSource;
use crate::error::{ParleyError, Result};
use crate::provider::{ContentGenerator, RetryingGenerator};
use crate::routing::{DefaultRouter, ModelRouter};
use crate::types::{Content, Part};
use crate::util::retry::{FallbackHandler, FallbackState, RetryFallbackCoordinator, RetryPolicy};

use super::events::{SessionEvent, TelemetrySink, TurnEvent};
use super::loop_detection::{LoopDetector, NoopLoopDetector};
use super::next_speaker::{LlmNextSpeakerChecker, NextSpeakerChecker};
use super::prompt::SystemPromptSource;
use super::state::SessionState;
use super::turn::{Turn, TurnExecutor};

mod control;

use control::{debug_enabled, Continuation, LevelEnd, Preflight, ANOMALY_RETRY_MESSAGE};

/// Absolute ceiling on chained turns for one request.
pub const MAX_TURNS: u32 = 100;

/// Drives one agent session: compression, routing, retries, and continuation.
///
/// Only one request may be in flight at a time; `send_message_stream` borrows
/// the orchestrator mutably for the life of the returned stream.
pub struct SessionOrchestrator {
    config: SessionConfig,
    chat: Chat,
    state: SessionState,
    generator: Arc<dyn ContentGenerator>,
    executor: Arc<dyn TurnExecutor>,
    router: Arc<dyn ModelRouter>,
    loop_detector: Arc<dyn LoopDetector>,
    next_speaker: Arc<dyn NextSpeakerChecker>,
    prompt_source: Option<Arc<dyn SystemPromptSource>>,
    ide_source: Option<Arc<dyn IdeContextSource>>,
    compression: CompressionEngine,
    retry: RetryFallbackCoordinator,
    fallback: Arc<FallbackState>,
    telemetry: Option<TelemetrySink>,
    environment: String,
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("session_id", &self.state.session_id)
            .field("model", &self.config.model)
            .field("turn_counter", &self.state.turn_counter)
            .field("history_len", &self.chat.len())
            .finish()
    }
}

impl SessionOrchestrator {
    pub fn builder(config: SessionConfig) -> SessionOrchestratorBuilder {
        SessionOrchestratorBuilder::new(config)
    }

    /// Run `request` and any chained continuations, flattening their events.
    ///
    /// The last event is always [`SessionEvent::Finished`] carrying the turn of
    /// the top-level call.
    pub fn send_message_stream(
        &mut self,
        request: Vec<Part>,
        cancel: CancellationToken,
        prompt_id: impl Into<String>,
        turns: u32,
    ) -> BoxStream<'_, SessionEvent> {
        let prompt_id = prompt_id.into();
        let this = self;

        Box::pin(stream! {
            let mut next = Some(Continuation::initial(request, turns));
            let mut outcome: Option<Turn> = None;

            while let Some(level) = next.take() {
                if debug_enabled() {
                    tracing::debug!(
                        prompt_id = %prompt_id,
                        turns = level.turns,
                        anomaly_retry = level.is_anomaly_retry,
                        "Starting session level"
                    );
                }

                let (model, bounded) = match this.preflight(&level, &cancel, &prompt_id).await {
                    Preflight::Proceed { events, model, bounded_turns } => {
                        for event in events {
                            yield event;
                        }
                        (model, bounded_turns)
                    }
                    Preflight::Stop { events } => {
                        for event in events {
                            yield event;
                        }
                        outcome.get_or_insert_with(|| Turn::empty(prompt_id.clone()));
                        break;
                    }
                };

                // Lets the orchestrator abort the executor without touching the caller's token.
                let internal = cancel.child_token();
                let mut turn = Turn::new(prompt_id.clone(), model.clone());
                let mut events = this.executor.run(
                    this.chat.clone(),
                    model.clone(),
                    level.request,
                    internal.clone(),
                );
                let mut end = LevelEnd::Exhausted;

                while let Some(event) = events.next().await {
                    if this.loop_detector.add_and_check(&event) {
                        tracing::warn!(prompt_id = %prompt_id, model = %model, "Loop detected in model stream");
                        yield SessionEvent::LoopDetected;
                        internal.cancel();
                        end = LevelEnd::Stopped;
                        break;
                    }

                    turn.observe(&event);
                    if let TurnEvent::UsageMetadata { usage } = &event {
                        if usage.prompt_token_count > 0 {
                            this.chat.set_last_prompt_token_count(usage.prompt_token_count);
                        }
                    }
                    let invalid_stream = matches!(event, TurnEvent::InvalidStream);
                    let failure = event.as_error();

                    yield SessionEvent::Turn(event);

                    if invalid_stream && this.config.continue_on_failed_api_call {
                        end = if level.is_anomaly_retry {
                            this.record_retry_failure(&model);
                            LevelEnd::Stopped
                        } else {
                            tracing::warn!(prompt_id = %prompt_id, model = %model, "Invalid stream; retrying once");
                            LevelEnd::Chain(Continuation {
                                request: vec![Part::text(ANOMALY_RETRY_MESSAGE)],
                                turns: bounded.saturating_sub(1),
                                is_anomaly_retry: true,
                            })
                        };
                        break;
                    }
                    if let Some(err) = failure {
                        this.retry.observe_stream_error(&model, &err).await;
                        end = LevelEnd::Stopped;
                        break;
                    }
                }
                drop(events);
                if matches!(end, LevelEnd::Exhausted) {
                    this.fallback.reset_stream_quota_streak();
                }

                next = match end {
                    LevelEnd::Chain(continuation) => Some(continuation),
                    LevelEnd::Stopped => None,
                    LevelEnd::Exhausted => {
                        this.continuation(&turn, &cancel, &prompt_id, bounded).await
                    }
                };
                outcome.get_or_insert(turn);
            }

            yield SessionEvent::Finished(outcome.unwrap_or_else(|| Turn::empty(prompt_id.clone())));
        })
    }

    /// Collect every event of `send_message_stream`.
    pub async fn send_message(
        &mut self,
        request: Vec<Part>,
        cancel: CancellationToken,
        prompt_id: impl Into<String>,
        turns: u32,
    ) -> Vec<SessionEvent> {
        self.send_message_stream(request, cancel, prompt_id, turns)
            .collect()
            .await
    }

    /// Compress the chat now, ignoring the threshold when `force` is set.
    pub async fn try_compress_chat(
        &mut self,
        prompt_id: &str,
        force: bool,
        cancel: &CancellationToken,
    ) -> CompressionResult {
        let model = self.model_for_limits();
        let token_limit = self.config.token_limit_for(&model);
        let result = self
            .compression
            .compress(
                &self.chat,
                &mut self.state,
                &model,
                token_limit,
                prompt_id,
                force,
                cancel,
            )
            .await;
        if result.is_compressed() {
            self.state.force_full_ide_context = true;
        }
        result
    }

    /// Replace the chat with a fresh one: handshake, then `extra_history`.
    pub fn start_chat(&mut self, extra_history: Vec<Content>) {
        let handshake = initial_handshake(self.environment.clone());
        let mut history = handshake.clone();
        history.extend(extra_history);

        self.chat.set_history(history);
        self.chat.set_last_prompt_token_count(0);
        self.state.reset_for_new_chat(handshake);
        self.state.last_user_memory = None;
        self.refresh_system_instruction();
    }

    pub fn reset_chat(&mut self) {
        self.start_chat(Vec::new());
    }

    pub fn chat(&self) -> &Chat {
        &self.chat
    }

    pub fn history(&self) -> Vec<Content> {
        self.chat.history()
    }

    pub fn curated_history(&self) -> Vec<Content> {
        self.chat.curated_history()
    }

    pub fn set_history(&mut self, history: Vec<Content>) {
        self.chat.set_history(history);
    }

    pub fn add_history(&mut self, content: Content) {
        self.chat.add_history(content);
    }

    pub fn last_prompt_token_count(&self) -> usize {
        self.chat.last_prompt_token_count()
    }

    pub fn sticky_model(&self) -> Option<&str> {
        self.state.sticky_model()
    }

    pub fn compression_disabled(&self) -> bool {
        self.state.compression_disabled
    }

    pub fn fallback_active(&self) -> bool {
        self.fallback.is_active()
    }

    pub fn quota_error_occurred(&self) -> bool {
        self.fallback.quota_error_occurred()
    }

    /// Coordinator shared with one-shot calls; executors may route their
    /// own model requests through it.
    pub fn retry_coordinator(&self) -> &RetryFallbackCoordinator {
        &self.retry
    }

    pub fn turn_count(&self) -> u32 {
        self.state.turn_counter
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.state.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }
}

/// Assembles a [`SessionOrchestrator`] from its collaborators.
pub struct SessionOrchestratorBuilder {
    config: SessionConfig,
    generator: Option<Arc<dyn ContentGenerator>>,
    executor: Option<Arc<dyn TurnExecutor>>,
    router: Option<Arc<dyn ModelRouter>>,
    loop_detector: Option<Arc<dyn LoopDetector>>,
    next_speaker: Option<Arc<dyn NextSpeakerChecker>>,
    prompt_source: Option<Arc<dyn SystemPromptSource>>,
    ide_source: Option<Arc<dyn IdeContextSource>>,
    fallback_handler: Option<Arc<dyn FallbackHandler>>,
    telemetry: Option<TelemetrySink>,
    environment: Option<String>,
    history: Vec<Content>,
}

impl SessionOrchestratorBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            generator: None,
            executor: None,
            router: None,
            loop_detector: None,
            next_speaker: None,
            prompt_source: None,
            ide_source: None,
            fallback_handler: None,
            telemetry: None,
            environment: None,
            history: Vec::new(),
        }
    }

    /// Client for one-shot calls; wrapped with retry and fallback on build.
    pub fn with_generator(mut self, generator: Arc<dyn ContentGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_turn_executor(mut self, executor: Arc<dyn TurnExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_router(mut self, router: Arc<dyn ModelRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_loop_detector(mut self, detector: Arc<dyn LoopDetector>) -> Self {
        self.loop_detector = Some(detector);
        self
    }

    pub fn with_next_speaker_checker(mut self, checker: Arc<dyn NextSpeakerChecker>) -> Self {
        self.next_speaker = Some(checker);
        self
    }

    pub fn with_system_prompt(mut self, source: Arc<dyn SystemPromptSource>) -> Self {
        self.prompt_source = Some(source);
        self
    }

    pub fn with_ide_context(mut self, source: Arc<dyn IdeContextSource>) -> Self {
        self.ide_source = Some(source);
        self
    }

    pub fn with_fallback_handler(mut self, handler: Arc<dyn FallbackHandler>) -> Self {
        self.fallback_handler = Some(handler);
        self
    }

    pub fn with_telemetry(mut self, sink: TelemetrySink) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Environment description sent as the opening user turn.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// History appended after the handshake when the chat starts.
    pub fn with_history(mut self, history: Vec<Content>) -> Self {
        self.history = history;
        self
    }

    pub fn build(self) -> Result<SessionOrchestrator> {
        self.config.validate()?;
        let raw_generator = self.generator.ok_or_else(|| {
            ParleyError::Configuration("content generator is not configured".into())
        })?;
        let executor = self
            .executor
            .ok_or_else(|| ParleyError::Configuration("turn executor is not configured".into()))?;

        let fallback = Arc::new(FallbackState::new(self.config.fallback_model.clone()));
        let mut coordinator = RetryFallbackCoordinator::new(
            RetryPolicy::from(&self.config.retry),
            fallback.clone(),
            self.config.auth_type,
        );
        if let Some(handler) = self.fallback_handler {
            coordinator = coordinator.with_handler(handler);
        }
        if let Some(sink) = &self.telemetry {
            coordinator = coordinator.with_telemetry(sink.clone());
        }
        let generator: Arc<dyn ContentGenerator> =
            Arc::new(RetryingGenerator::new(raw_generator, coordinator.clone()));

        let mut compression = CompressionEngine::new(
            self.config.compression_threshold,
            self.config.compression_preserve_fraction,
            generator.clone(),
        );
        if let Some(sink) = &self.telemetry {
            compression = compression.with_telemetry(sink.clone());
        }

        let router = self
            .router
            .unwrap_or_else(|| Arc::new(DefaultRouter::new(self.config.model.clone())));

        let mut orchestrator = SessionOrchestrator {
            chat: Chat::default(),
            state: SessionState::default(),
            generator,
            executor,
            router,
            loop_detector: self
                .loop_detector
                .unwrap_or_else(|| Arc::new(NoopLoopDetector)),
            next_speaker: self
                .next_speaker
                .unwrap_or_else(|| Arc::new(LlmNextSpeakerChecker::default())),
            prompt_source: self.prompt_source,
            ide_source: self.ide_source,
            compression,
            retry: coordinator,
            fallback,
            telemetry: self.telemetry,
            environment: self.environment.unwrap_or_else(default_environment),
            config: self.config,
        };
        orchestrator.start_chat(self.history);

        tracing::debug!(
            session_id = %orchestrator.state.session_id,
            model = %orchestrator.config.model,
            "Session orchestrator ready"
        );
        Ok(orchestrator)
    }
}

fn default_environment() -> String {
    let today = chrono::Local::now().format("%A, %B %-d, %Y");
    format!("This is the start of a new session. Today's date is {today}.")
}

#[cfg(test)]
#[path = "orchestrator/tests/mod.rs"]
mod tests;

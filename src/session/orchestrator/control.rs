use tokio_util::sync::CancellationToken;

use super::{SessionOrchestrator, MAX_TURNS};
use crate::context::{check_request, compute_payload};
use crate::models::resolve_model_for_limits;
use crate::routing::RoutingContext;
use crate::session::events::{emit, SessionEvent, TelemetryEvent};
use crate::session::next_speaker::NextSpeaker;
use crate::session::turn::Turn;
use crate::types::{Content, Part};

/// Sent after an invalid stream to give the model one more attempt.
pub(super) const ANOMALY_RETRY_MESSAGE: &str = "System: Please continue.";
/// Sent when the classifier decides the model should keep speaking.
pub(super) const CONTINUE_MESSAGE: &str = "Please continue.";
/// Two initial attempts plus two injected continuations.
const FAILED_RETRY_TOTAL_ATTEMPTS: u32 = 4;

/// One level of the request chain.
#[derive(Debug, Clone)]
pub(super) struct Continuation {
    pub request: Vec<Part>,
    pub turns: u32,
    pub is_anomaly_retry: bool,
}

impl Continuation {
    pub fn initial(request: Vec<Part>, turns: u32) -> Self {
        Self {
            request,
            turns,
            is_anomaly_retry: false,
        }
    }
}

pub(super) enum Preflight {
    Proceed {
        events: Vec<SessionEvent>,
        model: String,
        bounded_turns: u32,
    },
    Stop {
        events: Vec<SessionEvent>,
    },
}

/// How a level's event stream ended.
pub(super) enum LevelEnd {
    /// The executor ran out of events.
    Exhausted,
    /// A terminal event; nothing is chained.
    Stopped,
    Chain(Continuation),
}

impl SessionOrchestrator {
    /// Everything that happens before the model call, in order.
    pub(super) async fn preflight(
        &mut self,
        level: &Continuation,
        cancel: &CancellationToken,
        prompt_id: &str,
    ) -> Preflight {
        let mut events = Vec::new();

        if self.state.begin_sequence(prompt_id) {
            self.loop_detector.reset(prompt_id);
            self.fallback.clear_quota_error();
        }

        self.state.turn_counter += 1;
        let max_turns = self.config.max_session_turns;
        if max_turns > 0 && self.state.turn_counter > max_turns {
            tracing::info!(
                turn_counter = self.state.turn_counter,
                max_turns,
                "Session turn limit reached"
            );
            events.push(SessionEvent::MaxSessionTurns);
            return Preflight::Stop { events };
        }

        let bounded_turns = level.turns.min(MAX_TURNS);
        if bounded_turns == 0 {
            return Preflight::Stop { events };
        }

        let limit_model = self.model_for_limits();
        let token_limit = self.config.token_limit_for(&limit_model);
        let check = check_request(
            &level.request,
            token_limit,
            self.chat.last_prompt_token_count(),
        );
        if check.will_overflow() {
            tracing::warn!(
                estimated_request_tokens = check.estimated_request_tokens,
                remaining_tokens = check.remaining_tokens,
                "Request would overflow the context window"
            );
            events.push(SessionEvent::ContextWindowWillOverflow {
                estimated_request_tokens: check.estimated_request_tokens,
                remaining_tokens: check.remaining_tokens,
            });
            return Preflight::Stop { events };
        }

        let compression = self
            .compression
            .compress(
                &self.chat,
                &mut self.state,
                &limit_model,
                token_limit,
                prompt_id,
                false,
                cancel,
            )
            .await;
        if compression.is_compressed() {
            self.state.force_full_ide_context = true;
            events.push(SessionEvent::ChatCompressed(compression));
        }

        self.refresh_system_instruction();
        self.inject_ide_context();

        if self.loop_detector.turn_started(cancel).await {
            tracing::warn!(prompt_id, "Sequence already flagged as looping");
            events.push(SessionEvent::LoopDetected);
            return Preflight::Stop { events };
        }

        let routed = self.select_model(&level.request, cancel, prompt_id).await;
        let model = self.fallback.effective_model(&routed);
        events.push(SessionEvent::ModelInfo {
            model: model.clone(),
        });

        Preflight::Proceed {
            events,
            model,
            bounded_turns,
        }
    }

    /// Model whose window size governs pre-flight checks.
    pub(super) fn model_for_limits(&self) -> String {
        let model = self
            .state
            .sticky_model()
            .unwrap_or_else(|| resolve_model_for_limits(&self.config.model));
        self.fallback.effective_model(model)
    }

    /// Rebuild the system instruction when the user memory changed.
    pub(super) fn refresh_system_instruction(&mut self) {
        let Some(source) = &self.prompt_source else {
            return;
        };
        let memory = source.user_memory();
        if self.state.last_user_memory.as_deref() == Some(memory.as_str()) {
            return;
        }
        self.chat
            .set_system_instruction(source.system_prompt(&memory));
        self.state.last_user_memory = Some(memory);
    }

    /// Append the editor context unless a function call awaits its response.
    fn inject_ide_context(&mut self) {
        if !self.config.ide_mode {
            return;
        }
        let pending_call = self
            .chat
            .last_entry()
            .is_some_and(|last| last.role == crate::types::Role::Model && last.has_function_call());
        if pending_call {
            return;
        }
        let Some(snapshot) = self.ide_source.as_ref().and_then(|source| source.snapshot()) else {
            return;
        };

        if let Some(payload) = compute_payload(
            self.state.last_sent_ide_context.as_ref(),
            &snapshot,
            self.state.force_full_ide_context,
        ) {
            if debug_enabled() {
                tracing::debug!(mode = ?payload.mode, "Injecting editor context");
            }
            self.chat.add_history(Content::user(payload.text));
        }
        self.state.last_sent_ide_context = Some(snapshot);
        self.state.force_full_ide_context = false;
    }

    /// Sticky model for the sequence, routing once if none is pinned yet.
    async fn select_model(
        &mut self,
        request: &[Part],
        cancel: &CancellationToken,
        prompt_id: &str,
    ) -> String {
        if let Some(model) = self.state.sticky_model() {
            return model.to_string();
        }

        let history = self.chat.curated_history();
        let context = RoutingContext {
            history: &history,
            request,
            cancel,
        };
        let (model, reason) = match self.router.route(context).await {
            Ok(decision) => (decision.model, decision.reason),
            Err(err) => {
                let model = resolve_model_for_limits(&self.config.model).to_string();
                tracing::warn!(prompt_id, error = %err, model = %model, "Routing failed; using configured model");
                (model, format!("routing failed: {err}"))
            }
        };

        tracing::debug!(prompt_id, model = %model, reason = %reason, "Model routed");
        emit(
            self.telemetry.as_ref(),
            TelemetryEvent::ModelRouted {
                prompt_id: prompt_id.to_string(),
                model: model.clone(),
                reason,
            },
        );
        self.state.pin_model(model.clone());
        model
    }

    /// Ask the classifier whether to chain a "please continue" level.
    pub(super) async fn continuation(
        &self,
        turn: &Turn,
        cancel: &CancellationToken,
        prompt_id: &str,
        bounded_turns: u32,
    ) -> Option<Continuation> {
        if turn.has_pending_tool_calls() || cancel.is_cancelled() {
            return None;
        }
        if self.fallback.quota_error_occurred() || self.config.skip_next_speaker_check {
            return None;
        }

        let verdict = self
            .next_speaker
            .check(&self.chat, self.generator.as_ref(), cancel, prompt_id)
            .await;
        let next_speaker = verdict.as_ref().map(|v| v.next_speaker);

        emit(
            self.telemetry.as_ref(),
            TelemetryEvent::NextSpeakerCheck {
                prompt_id: prompt_id.to_string(),
                finish_reason: turn.finish_reason,
                result: next_speaker
                    .map(|speaker| speaker.to_string())
                    .unwrap_or_else(|| "none".to_string()),
            },
        );

        if next_speaker != Some(NextSpeaker::Model) {
            return None;
        }
        Some(Continuation {
            request: vec![Part::text(CONTINUE_MESSAGE)],
            turns: bounded_turns.saturating_sub(1),
            is_anomaly_retry: false,
        })
    }

    pub(super) fn record_retry_failure(&self, model: &str) {
        tracing::error!(
            total_attempts = FAILED_RETRY_TOTAL_ATTEMPTS,
            model,
            "Invalid stream persisted after injected continuation"
        );
        emit(
            self.telemetry.as_ref(),
            TelemetryEvent::ContentRetryFailure {
                total_attempts: FAILED_RETRY_TOTAL_ATTEMPTS,
                error_type: "FAILED_AFTER_PROMPT_INJECTION".to_string(),
                model: model.to_string(),
            },
        );
    }
}

pub(super) fn debug_enabled() -> bool {
    matches!(std::env::var("PARLEY_DEBUG").as_deref(), Ok("1" | "true"))
}

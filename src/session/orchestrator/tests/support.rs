use super::*;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use crate::context::{ActiveFile, CursorPosition, IdeContextSnapshot};
use crate::error::ParleyError;
use crate::routing::{RoutingContext, RoutingDecision};
use crate::session::events::TelemetryEvent;
use crate::session::next_speaker::{NextSpeaker, NextSpeakerResponse};
use crate::util::retry::FallbackIntent;
use crate::types::{FinishReason, FunctionCall, GenerateRequest, GenerateResponse, Role};

/// Canned event sequences for the stub turn executor.
#[derive(Clone)]
pub(super) enum TurnScript {
    /// Text reply followed by a normal finish.
    Reply(&'static str),
    /// A tool call request; the turn ends with the call pending.
    ToolCall(&'static str),
    InvalidStream,
    Error,
    /// The stream fails with a 429.
    QuotaError,
    /// Text, a loop-triggering chunk, then more text that must never be forwarded.
    LoopingReply,
    Usage(usize),
}

impl TurnScript {
    fn events(&self) -> Vec<TurnEvent> {
        match self {
            Self::Reply(text) => vec![
                TurnEvent::Content {
                    text: text.to_string(),
                },
                TurnEvent::Finished {
                    reason: FinishReason::Stop,
                },
            ],
            Self::ToolCall(name) => vec![
                TurnEvent::ToolCallRequest {
                    call: FunctionCall {
                        id: Some("call-1".to_string()),
                        name: name.to_string(),
                        args: serde_json::json!({}),
                    },
                },
                TurnEvent::Finished {
                    reason: FinishReason::Stop,
                },
            ],
            Self::InvalidStream => vec![TurnEvent::InvalidStream],
            Self::QuotaError => vec![TurnEvent::Error {
                message: "resource exhausted".to_string(),
                status: Some(429),
            }],
            Self::Error => vec![
                TurnEvent::Error {
                    message: "backend exploded".to_string(),
                    status: Some(500),
                },
                TurnEvent::Content {
                    text: "after error".to_string(),
                },
            ],
            Self::LoopingReply => vec![
                TurnEvent::Content {
                    text: "thinking".to_string(),
                },
                TurnEvent::Content {
                    text: LOOP_MARKER.to_string(),
                },
                TurnEvent::Content {
                    text: "never forwarded".to_string(),
                },
            ],
            Self::Usage(prompt_tokens) => vec![
                TurnEvent::UsageMetadata {
                    usage: crate::types::UsageMetadata {
                        prompt_token_count: *prompt_tokens,
                        candidates_token_count: 1,
                        total_token_count: prompt_tokens + 1,
                    },
                },
                TurnEvent::Content {
                    text: "counted".to_string(),
                },
                TurnEvent::Finished {
                    reason: FinishReason::Stop,
                },
            ],
        }
    }

    fn reply(&self) -> Option<Content> {
        match self {
            Self::Reply(text) => Some(Content::model(*text)),
            Self::ToolCall(name) => Some(Content::function_call(*name, serde_json::json!({}))),
            Self::Usage(_) => Some(Content::model("counted")),
            _ => None,
        }
    }
}

pub(super) const LOOP_MARKER: &str = "again and again";

#[derive(Clone)]
pub(super) struct RunRecord {
    pub model: String,
    pub request: Vec<Part>,
    pub history_before: Vec<Content>,
    pub cancel: CancellationToken,
}

impl RunRecord {
    pub fn request_text(&self) -> String {
        Content::new(Role::User, self.request.clone()).text()
    }
}

/// Plays one script per call; falls back to a plain reply once the queue is empty.
#[derive(Default)]
pub(super) struct ScriptedExecutor {
    scripts: Mutex<VecDeque<TurnScript>>,
    runs: Mutex<Vec<RunRecord>>,
}

impl ScriptedExecutor {
    pub fn new(scripts: Vec<TurnScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            runs: Mutex::new(Vec::new()),
        })
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

impl TurnExecutor for ScriptedExecutor {
    fn run(
        &self,
        chat: Chat,
        model: String,
        request: Vec<Part>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, TurnEvent> {
        self.runs.lock().unwrap().push(RunRecord {
            model,
            request: request.clone(),
            history_before: chat.history(),
            cancel,
        });
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TurnScript::Reply("ok"));

        chat.add_history(Content::new(Role::User, request));
        if let Some(reply) = script.reply() {
            chat.add_history(reply);
        }
        stream::iter(script.events()).boxed()
    }
}

/// One-shot generator answering every call with the same reply.
pub(super) struct StubGenerator {
    reply: std::result::Result<String, u16>,
    pub requests: Mutex<Vec<GenerateRequest>>,
}

impl StubGenerator {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(status),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentGenerator for StubGenerator {
    async fn generate(&self, request: &GenerateRequest, _prompt_id: &str) -> Result<GenerateResponse> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.reply {
            Ok(text) => Ok(GenerateResponse::text(text.clone())),
            Err(status) => Err(ParleyError::api(*status, "stub failure")),
        }
    }
}

/// Returns queued verdicts, then "no decision".
#[derive(Default)]
pub(super) struct ScriptedNextSpeaker {
    verdicts: Mutex<VecDeque<NextSpeaker>>,
    always_model: bool,
    calls: AtomicUsize,
}

impl ScriptedNextSpeaker {
    pub fn new(verdicts: Vec<NextSpeaker>) -> Arc<Self> {
        Arc::new(Self {
            verdicts: Mutex::new(verdicts.into()),
            ..Self::default()
        })
    }

    pub fn always_model() -> Arc<Self> {
        Arc::new(Self {
            always_model: true,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NextSpeakerChecker for ScriptedNextSpeaker {
    async fn check(
        &self,
        _chat: &Chat,
        _client: &dyn ContentGenerator,
        _cancel: &CancellationToken,
        _prompt_id: &str,
    ) -> Option<NextSpeakerResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next_speaker = if self.always_model {
            NextSpeaker::Model
        } else {
            self.verdicts.lock().unwrap().pop_front()?
        };
        Some(NextSpeakerResponse {
            reasoning: "scripted".to_string(),
            next_speaker,
        })
    }
}

/// Counts routing calls; fails every call when `fail` is set.
pub(super) struct CountingRouter {
    model: &'static str,
    fail: bool,
    calls: AtomicUsize,
}

impl CountingRouter {
    pub fn new(model: &'static str) -> Arc<Self> {
        Arc::new(Self {
            model,
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            model: "",
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelRouter for CountingRouter {
    async fn route(&self, _context: RoutingContext<'_>) -> Result<RoutingDecision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ParleyError::Routing("classifier unavailable".into()));
        }
        Ok(RoutingDecision::new(self.model, "counting router"))
    }
}

/// Flags a loop on a marker chunk, or before the n-th model call.
#[derive(Default)]
pub(super) struct MarkerLoopDetector {
    flag_on_turn: Option<usize>,
    turns: AtomicUsize,
    resets: Mutex<Vec<String>>,
}

impl MarkerLoopDetector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn flagging_turn(turn: usize) -> Arc<Self> {
        Arc::new(Self {
            flag_on_turn: Some(turn),
            ..Self::default()
        })
    }

    pub fn resets(&self) -> Vec<String> {
        self.resets.lock().unwrap().clone()
    }
}

#[async_trait]
impl LoopDetector for MarkerLoopDetector {
    fn reset(&self, prompt_id: &str) {
        self.resets.lock().unwrap().push(prompt_id.to_string());
    }

    async fn turn_started(&self, _cancel: &CancellationToken) -> bool {
        let turn = self.turns.fetch_add(1, Ordering::SeqCst) + 1;
        self.flag_on_turn == Some(turn)
    }

    fn add_and_check(&self, event: &TurnEvent) -> bool {
        matches!(event, TurnEvent::Content { text } if text == LOOP_MARKER)
    }
}

/// Agrees to every fallback switch and records the models it was asked about.
#[derive(Default)]
pub(super) struct SwitchingHandler {
    pub calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl FallbackHandler for SwitchingHandler {
    async fn handle(
        &self,
        current_model: &str,
        fallback_model: &str,
        _auth_type: crate::config::AuthType,
        _error: &ParleyError,
    ) -> FallbackIntent {
        self.calls
            .lock()
            .unwrap()
            .push((current_model.to_string(), fallback_model.to_string()));
        FallbackIntent::Switch
    }
}

/// Editor state the test can change between requests.
#[derive(Default)]
pub(super) struct FakeIde {
    snapshot: Mutex<Option<IdeContextSnapshot>>,
}

impl FakeIde {
    pub fn with_file(path: &str, line: u32) -> Arc<Self> {
        let ide = Arc::new(Self::default());
        ide.set_file(path, line);
        ide
    }

    pub fn set_file(&self, path: &str, line: u32) {
        *self.snapshot.lock().unwrap() = Some(IdeContextSnapshot {
            active_file: Some(ActiveFile {
                path: path.to_string(),
                cursor: Some(CursorPosition { line, character: 0 }),
                selected_text: None,
            }),
            other_open_files: Vec::new(),
        });
    }
}

impl IdeContextSource for FakeIde {
    fn snapshot(&self) -> Option<IdeContextSnapshot> {
        self.snapshot.lock().unwrap().clone()
    }
}

/// Counts prompt rebuilds.
pub(super) struct CountingPrompt {
    memory: Mutex<String>,
    pub builds: AtomicUsize,
}

impl CountingPrompt {
    pub fn new(memory: &str) -> Arc<Self> {
        Arc::new(Self {
            memory: Mutex::new(memory.to_string()),
            builds: AtomicUsize::new(0),
        })
    }

    pub fn set_memory(&self, memory: &str) {
        *self.memory.lock().unwrap() = memory.to_string();
    }
}

impl SystemPromptSource for CountingPrompt {
    fn user_memory(&self) -> String {
        self.memory.lock().unwrap().clone()
    }

    fn system_prompt(&self, user_memory: &str) -> String {
        self.builds.fetch_add(1, Ordering::SeqCst);
        format!("base prompt\n{user_memory}")
    }
}

pub(super) fn capture_telemetry() -> (TelemetrySink, Arc<Mutex<Vec<TelemetryEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = events.clone();
    let sink: TelemetrySink = Arc::new(move |event| {
        sink_events.lock().unwrap().push(event);
    });
    (sink, events)
}

/// Orchestrator with a scripted executor, a counting router, and a silent classifier.
pub(super) struct Harness {
    pub session: SessionOrchestrator,
    pub executor: Arc<ScriptedExecutor>,
    pub router: Arc<CountingRouter>,
    pub next_speaker: Arc<ScriptedNextSpeaker>,
    pub generator: Arc<StubGenerator>,
}

pub(super) fn harness(config: SessionConfig, scripts: Vec<TurnScript>) -> Harness {
    harness_with(config, scripts, ScriptedNextSpeaker::new(Vec::new()), |builder| builder)
}

pub(super) fn harness_with(
    config: SessionConfig,
    scripts: Vec<TurnScript>,
    next_speaker: Arc<ScriptedNextSpeaker>,
    customize: impl FnOnce(SessionOrchestratorBuilder) -> SessionOrchestratorBuilder,
) -> Harness {
    let executor = ScriptedExecutor::new(scripts);
    let router = CountingRouter::new("routed-model");
    let generator = StubGenerator::replying("short summary");

    let builder = SessionOrchestrator::builder(config)
        .with_generator(generator.clone())
        .with_turn_executor(executor.clone())
        .with_router(router.clone())
        .with_next_speaker_checker(next_speaker.clone())
        .with_environment("test environment");
    let session = customize(builder).build().expect("build session");

    Harness {
        session,
        executor,
        router,
        next_speaker,
        generator,
    }
}

pub(super) async fn send(session: &mut SessionOrchestrator, text: &str, prompt_id: &str) -> Vec<SessionEvent> {
    session
        .send_message(
            vec![Part::text(text)],
            CancellationToken::new(),
            prompt_id,
            MAX_TURNS,
        )
        .await
}

pub(super) fn final_turn(events: &[SessionEvent]) -> Turn {
    match events.last() {
        Some(SessionEvent::Finished(turn)) => turn.clone(),
        other => panic!("expected a Finished event last, got {other:?}"),
    }
}

pub(super) fn texts(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Turn(TurnEvent::Content { text }) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

pub(super) fn long_history(pairs: usize) -> Vec<Content> {
    (0..pairs)
        .flat_map(|i| {
            [
                Content::user(format!("question {i} {}", "q".repeat(200))),
                Content::model(format!("answer {i} {}", "a".repeat(200))),
            ]
        })
        .collect()
}

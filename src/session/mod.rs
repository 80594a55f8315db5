//! Session orchestration: the request state machine and its collaborators.

pub mod events;
pub mod loop_detection;
pub mod next_speaker;
pub mod orchestrator;
pub mod prompt;
pub mod state;
pub mod turn;

pub use events::{SessionEvent, TelemetryEvent, TelemetrySink, TurnEvent};
pub use loop_detection::{LoopDetector, NoopLoopDetector};
pub use next_speaker::{LlmNextSpeakerChecker, NextSpeaker, NextSpeakerChecker, NextSpeakerResponse};
pub use orchestrator::{SessionOrchestrator, SessionOrchestratorBuilder, MAX_TURNS};
pub use prompt::{StaticSystemPrompt, SystemPromptSource};
pub use state::SessionState;
pub use turn::{Turn, TurnExecutor};

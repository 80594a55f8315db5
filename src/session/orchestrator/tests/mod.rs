use super::*;

use pretty_assertions::assert_eq;

use crate::compression::CompressionStatus;
use crate::session::events::TelemetryEvent;
use crate::session::next_speaker::NextSpeaker;

mod support;

mod ide_context;

use support::{
    capture_telemetry, final_turn, harness, harness_with, long_history, send, texts, TurnScript,
};

#[tokio::test]
async fn build_fails_without_turn_executor() {
    let err = SessionOrchestrator::builder(SessionConfig::default())
        .with_generator(support::StubGenerator::replying("x"))
        .build()
        .unwrap_err();
    assert!(matches!(err, ParleyError::Configuration(_)));
}

#[tokio::test]
async fn build_rejects_invalid_config() {
    let config = SessionConfig::builder().compression_threshold(1.5).build();
    let err = SessionOrchestrator::builder(config)
        .with_generator(support::StubGenerator::replying("x"))
        .with_turn_executor(support::ScriptedExecutor::new(Vec::new()))
        .build()
        .unwrap_err();
    assert!(matches!(err, ParleyError::Configuration(_)));
}

#[tokio::test]
async fn simple_request_streams_reply_and_finishes_with_turn() {
    let mut h = harness(SessionConfig::default(), vec![TurnScript::Reply("hello there")]);

    let events = send(&mut h.session, "hi", "p1").await;

    assert_eq!(
        events[0],
        SessionEvent::ModelInfo {
            model: "routed-model".to_string()
        }
    );
    assert_eq!(texts(&events), vec!["hello there"]);
    let turn = final_turn(&events);
    assert_eq!(turn.prompt_id, "p1");
    assert_eq!(turn.model, "routed-model");
    assert!(turn.finished_at.is_some());

    let history = h.session.history();
    assert_eq!(history[0].text(), "test environment");
    assert_eq!(history.last().unwrap().text(), "hello there");
    assert_eq!(h.session.turn_count(), 1);
}

#[tokio::test]
async fn usage_metadata_updates_token_counter() {
    let mut h = harness(SessionConfig::default(), vec![TurnScript::Usage(1234)]);

    send(&mut h.session, "hi", "p1").await;

    assert_eq!(h.session.last_prompt_token_count(), 1234);
}

#[tokio::test]
async fn reset_chat_restores_handshake_and_clears_compression_flag() {
    let mut h = harness(SessionConfig::default(), Vec::new());
    send(&mut h.session, "hi", "p1").await;
    h.session.state.compression_disabled = true;

    h.session.reset_chat();

    assert_eq!(h.session.history().len(), 2);
    assert!(!h.session.compression_disabled());
    assert_eq!(h.session.last_prompt_token_count(), 0);
}

#[tokio::test]
async fn forced_compression_emits_telemetry_and_rebuilds() {
    let (sink, telemetry) = capture_telemetry();
    let mut h = harness_with(
        SessionConfig::default(),
        Vec::new(),
        support::ScriptedNextSpeaker::new(Vec::new()),
        |builder| builder.with_history(long_history(10)).with_telemetry(sink),
    );

    let result = h
        .session
        .try_compress_chat("p1", true, &CancellationToken::new())
        .await;

    assert_eq!(result.status, CompressionStatus::Compressed);
    assert_eq!(h.session.history()[2].text(), "short summary");
    assert!(h.session.state().force_full_ide_context);
    assert!(telemetry.lock().unwrap().iter().any(|event| matches!(
        event,
        TelemetryEvent::ChatCompression {
            status: CompressionStatus::Compressed,
            ..
        }
    )));
}

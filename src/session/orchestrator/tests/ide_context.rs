use super::*;

use pretty_assertions::assert_eq;

use super::support::{FakeIde, ScriptedNextSpeaker};

fn ide_session(ide: Arc<FakeIde>) -> super::support::Harness {
    let config = SessionConfig::builder().ide_mode(true).build();
    harness_with(
        config,
        Vec::new(),
        ScriptedNextSpeaker::new(Vec::new()),
        |builder| builder.with_ide_context(ide),
    )
}

fn injected(history: &[Content]) -> Vec<String> {
    history
        .iter()
        .map(Content::text)
        .filter(|text| text.starts_with("Here is"))
        .collect()
}

#[tokio::test]
async fn first_request_gets_full_context_then_deltas() {
    let ide = FakeIde::with_file("/src/main.rs", 1);
    let mut h = ide_session(ide.clone());

    send(&mut h.session, "one", "p1").await;
    let first = injected(&h.executor.runs()[0].history_before);
    assert_eq!(first.len(), 1);
    assert!(first[0].starts_with("Here is the user's editor context"));

    send(&mut h.session, "two", "p2").await;
    assert_eq!(injected(&h.executor.runs()[1].history_before).len(), 1);

    ide.set_file("/src/main.rs", 9);
    send(&mut h.session, "three", "p3").await;
    let third = injected(&h.executor.runs()[2].history_before);
    assert_eq!(third.len(), 2);
    assert!(third[1].starts_with("Here is a summary of changes"));
    assert!(third[1].contains("cursorMoved"));
}

#[tokio::test]
async fn pending_function_call_blocks_injection() {
    let ide = FakeIde::with_file("/src/lib.rs", 0);
    let mut h = ide_session(ide);
    h.session
        .add_history(Content::function_call("read_file", serde_json::json!({})));

    h.session
        .send_message(
            vec![Part::FunctionResponse(crate::types::FunctionResponse {
                id: None,
                name: "read_file".to_string(),
                response: serde_json::json!({"ok": true}),
            })],
            CancellationToken::new(),
            "p1",
            MAX_TURNS,
        )
        .await;

    let history = &h.executor.runs()[0].history_before;
    assert!(injected(history).is_empty());
    assert!(history.last().unwrap().has_function_call());
    assert!(h.session.state().last_sent_ide_context.is_none());
}

#[tokio::test]
async fn reset_chat_forces_full_context_again() {
    let ide = FakeIde::with_file("/src/main.rs", 1);
    let mut h = ide_session(ide);

    send(&mut h.session, "one", "p1").await;
    h.session.reset_chat();
    send(&mut h.session, "two", "p2").await;

    let second = injected(&h.executor.runs()[1].history_before);
    assert_eq!(second.len(), 1);
    assert!(second[0].starts_with("Here is the user's editor context"));
}

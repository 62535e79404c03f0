// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use starry_core::SessionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use yare::parameterized;

async fn harness() -> (EventBus, Arc<Subscriptions>, mpsc::Receiver<String>) {
    let bus = EventBus::new();
    let subscriptions = Subscriptions::new();
    let (tx, rx) = mpsc::channel(64);
    let client = subscriptions.register(tx, CancellationToken::new());
    subscriptions.subscribe(client, SessionId::new("s1"));
    attach_forwarder(&bus, Arc::clone(&subscriptions));
    (bus, subscriptions, rx)
}

fn parse(line: &str) -> Value {
    serde_json::from_str(line).unwrap()
}

#[tokio::test]
async fn text_delta_maps_to_output() {
    let (bus, _subs, mut rx) = harness().await;
    bus.emit(
        names::STREAM_TEXT_DELTA,
        json!({"sessionId": "s1", "text": "Hel"}),
    )
    .await;

    let value = parse(&rx.try_recv().unwrap());
    assert_eq!(value["event"], "agent.output");
    assert_eq!(value["data"]["text"], "Hel");
    assert_eq!(value["data"]["isReasoning"], false);
}

#[tokio::test]
async fn reasoning_delta_flags_reasoning() {
    let (bus, _subs, mut rx) = harness().await;
    bus.emit(
        names::STREAM_REASONING_DELTA,
        json!({"sessionId": "s1", "text": "thinking"}),
    )
    .await;

    let value = parse(&rx.try_recv().unwrap());
    assert_eq!(value["data"]["isReasoning"], true);
}

#[tokio::test]
async fn system_message_gets_trailing_newline() {
    let (bus, _subs, mut rx) = harness().await;
    bus.emit(
        names::MESSAGE_SYSTEM,
        json!({"sessionId": "s1", "text": "note"}),
    )
    .await;

    let value = parse(&rx.try_recv().unwrap());
    assert_eq!(value["data"]["text"], "note\n");
}

#[parameterized(
    executing = { names::TOOL_EXECUTING, "started" },
    result = { names::TOOL_RESULT, "completed" },
    error = { names::TOOL_ERROR, "failed" },
)]
fn tool_events_map_to_status(event_type: &str, status: &str) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let (bus, _subs, mut rx) = harness().await;
        bus.emit(
            event_type,
            json!({"sessionId": "s1", "tool": "echo", "toolCallId": "c1"}),
        )
        .await;

        let value = parse(&rx.try_recv().unwrap());
        assert_eq!(value["event"], "agent.tool");
        assert_eq!(value["data"]["status"], status);
        assert_eq!(value["data"]["tool"], "echo");
    });
}

#[parameterized(
    started = { names::LOOP_STARTED, "started" },
    awaiting = { names::LOOP_AWAITING_LLM, "awaiting_llm" },
    finished = { names::LOOP_FINISHED, "finished" },
)]
fn loop_events_map_to_phase(event_type: &str, phase: &str) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let (bus, _subs, mut rx) = harness().await;
        bus.emit(event_type, json!({"sessionId": "s1"})).await;

        let value = parse(&rx.try_recv().unwrap());
        assert_eq!(value["event"], "agent.loop");
        assert_eq!(value["data"]["phase"], phase);
    });
}

#[tokio::test]
async fn loop_error_carries_reason() {
    let (bus, _subs, mut rx) = harness().await;
    bus.emit(
        names::LOOP_ERROR,
        json!({"sessionId": "s1", "reason": "Error cascade"}),
    )
    .await;

    let value = parse(&rx.try_recv().unwrap());
    assert_eq!(value["data"]["phase"], "error");
    assert_eq!(value["data"]["error"], "Error cascade");
}

#[tokio::test]
async fn unmapped_events_are_not_forwarded() {
    let (bus, _subs, mut rx) = harness().await;
    bus.emit(names::MESSAGE_USER, json!({"sessionId": "s1", "text": "x"}))
        .await;
    bus.emit(names::SESSION_CREATED, json!({"sessionId": "s1"}))
        .await;
    bus.emit("plugin:custom", json!({"sessionId": "s1"})).await;

    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn events_without_session_are_dropped() {
    let (bus, _subs, mut rx) = harness().await;
    bus.emit(names::STREAM_TEXT_DELTA, json!({"text": "orphan"}))
        .await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn metadata_session_id_is_used() {
    let (bus, _subs, mut rx) = harness().await;
    bus.emit(
        names::STREAM_TEXT_DELTA,
        json!({"metadata": {"sessionId": "s1"}, "text": "hi"}),
    )
    .await;

    let value = parse(&rx.try_recv().unwrap());
    assert_eq!(value["data"]["sessionId"], "s1");
}

#[tokio::test]
async fn other_sessions_do_not_receive() {
    let (bus, _subs, mut rx) = harness().await;
    bus.emit(
        names::STREAM_TEXT_DELTA,
        json!({"sessionId": "s2", "text": "for someone else"}),
    )
    .await;
    assert!(rx.try_recv().is_err());
}

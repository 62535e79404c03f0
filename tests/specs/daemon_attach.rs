// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: the daemon attach round-trip over a real socket.
//!
//! Client A attaches to a fresh session and receives a replay; client
//! B attaches to the same session; input from A produces output, tool
//! and loop notifications on both connections, and nothing leaks from
//! other sessions.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;

use starry_core::test_support::FallbackBehavior;
use starry_core::{FinishReason, SessionId, StreamEvent, TokenUsage, ToolCallId};
use starry_daemon::{DaemonClient, Notification};

use crate::prelude::*;

async fn serve(rig: &SpecRig) -> std::path::PathBuf {
    let socket_path = rig.dir.path().join("agent.sock");
    let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();
    tokio::spawn(starry_daemon::server::serve(
        Arc::clone(&rig.service),
        listener,
    ));
    socket_path
}

async fn collect_until(
    client: &mut DaemonClient,
    done: impl Fn(&[Notification]) -> bool,
) -> Vec<Notification> {
    let mut seen = Vec::new();
    for _ in 0..200 {
        match client.next_notification(Duration::from_millis(100)).await {
            Ok(notification) => {
                seen.push(notification);
                if done(&seen) {
                    break;
                }
            }
            Err(_) => {
                if done(&seen) {
                    break;
                }
            }
        }
    }
    seen
}

#[tokio::test]
async fn attach_round_trip_with_two_clients() {
    let rig = rig_with(FallbackBehavior::EndTurn).await;
    // One tool round, then a closing reply.
    rig.provider.push_script(vec![
        StreamEvent::ToolCallStart {
            id: ToolCallId::new("c1"),
            name: "echo".to_string(),
        },
        StreamEvent::ToolCallEnd {
            id: ToolCallId::new("c1"),
            name: "echo".to_string(),
            arguments: Map::new(),
        },
        StreamEvent::Finish {
            reason: FinishReason::ToolUse,
            usage: TokenUsage::default(),
        },
    ]);
    rig.provider.push_script(vec![
        StreamEvent::TextDelta {
            text: "done".to_string(),
        },
        StreamEvent::Finish {
            reason: FinishReason::EndTurn,
            usage: TokenUsage::default(),
        },
    ]);

    let socket_path = serve(&rig).await;

    // A second session generating noise that must not reach S.
    let (other, _) = rig
        .service
        .sessions
        .create_with_id(SessionId::new("OTHER"), Map::new())
        .await;

    let mut client_a = DaemonClient::connect(&socket_path).await.unwrap();
    let attach_a = client_a.attach(Some("S")).await.unwrap();
    assert_eq!(attach_a["sessionId"], "S");
    assert_eq!(attach_a["isNew"], true);
    assert_eq!(attach_a["agentId"], "spec-agent");
    assert_eq!(attach_a["agentName"], "Spec Agent");

    let mut client_b = DaemonClient::connect(&socket_path).await.unwrap();
    let attach_b = client_b.attach(Some("S")).await.unwrap();
    assert_eq!(attach_b["isNew"], false);

    // Noise on the other session.
    rig.service
        .input
        .push(starry_core::InputEvent::user("noise", Some(other.id)));

    // A drives a turn on S.
    let queued = client_a.input(Some("S"), "user_input", "go").await.unwrap();
    assert_eq!(queued["queued"], true);

    let finished =
        |seen: &[Notification]| seen.iter().any(|n| n.data["phase"] == "finished");
    let a_events = collect_until(&mut client_a, finished).await;
    let b_events = collect_until(&mut client_b, finished).await;

    for events in [&a_events, &b_events] {
        assert!(
            events
                .iter()
                .any(|n| n.event == "agent.output" && n.data["text"] == "done"),
            "agent.output missing: {events:?}"
        );
        assert!(
            events
                .iter()
                .any(|n| n.event == "agent.tool" && n.data["status"] == "completed"),
            "agent.tool missing: {events:?}"
        );
        assert!(
            events
                .iter()
                .any(|n| n.event == "agent.loop" && n.data["phase"] == "finished"),
            "agent.loop missing: {events:?}"
        );
        // Nothing from the other session leaked in.
        assert!(
            events.iter().all(|n| n.data["sessionId"] == "S"),
            "foreign session event leaked: {events:?}"
        );
    }
}

#[tokio::test]
async fn attach_replays_history_before_live_events() {
    let rig = rig().await;
    let socket_path = serve(&rig).await;

    // Seed history in S.
    let (session, _) = rig
        .service
        .sessions
        .create_with_id(SessionId::new("S"), Map::new())
        .await;
    {
        let store = rig.service.sessions.state_store(Some(&session.id));
        let mut store = store.lock();
        store.append(starry_core::Message::text(
            starry_core::Role::User,
            "earlier question",
        ));
        store.append(starry_core::Message::text(
            starry_core::Role::Assistant,
            "earlier answer",
        ));
    }

    let mut client = DaemonClient::connect(&socket_path).await.unwrap();
    client.attach(Some("S")).await.unwrap();

    let replayed = collect_until(&mut client, |seen| seen.len() >= 2).await;
    assert_eq!(replayed.len(), 2);
    assert!(replayed.iter().all(|n| n.event == "agent.replay"));
    assert_eq!(
        replayed[0].data["message"]["segments"][0]["text"],
        "earlier question"
    );
    assert_eq!(
        replayed[1].data["message"]["segments"][0]["text"],
        "earlier answer"
    );
}

#[tokio::test]
async fn ping_and_health_over_socket() {
    let rig = rig().await;
    let socket_path = serve(&rig).await;

    let mut client = DaemonClient::connect(&socket_path).await.unwrap();
    let pong = client.ping().await.unwrap();
    assert_eq!(pong["ok"], true);
    assert_eq!(pong["agentId"], "spec-agent");

    let health = client.request("daemon.health", None).await.unwrap();
    assert_eq!(health["ok"], true);
}

#[tokio::test]
async fn malformed_requests_get_protocol_errors() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let rig = rig().await;
    let socket_path = serve(&rig).await;

    let stream = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // Parse failure.
    write_half.write_all(b"this is not json\n").await.unwrap();
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(value["error"]["code"], -32700);

    // Malformed envelope; the connection is still open.
    write_half.write_all(b"{\"id\": null}\n").await.unwrap();
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(value["error"]["code"], -32600);

    // A valid request still works afterwards.
    write_half
        .write_all(b"{\"id\": \"1\", \"method\": \"agent.ping\"}\n")
        .await
        .unwrap();
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(value["result"]["ok"], true);
}

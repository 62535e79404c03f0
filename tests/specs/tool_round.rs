// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: a tool round followed by a closing reply.

use crate::prelude::*;
use serde_json::json;
use starry_core::test_support::FallbackBehavior;
use starry_core::{
    names, ContentSegment, FinishReason, InputEvent, Role, SessionId, StreamEvent, TokenUsage,
    ToolCallId,
};

#[tokio::test]
async fn tool_round_runs_echo_then_finishes() {
    let rig = rig_with(FallbackBehavior::EndTurn).await;

    rig.provider.push_script(vec![
        StreamEvent::ToolCallStart {
            id: ToolCallId::new("call-1"),
            name: "echo".to_string(),
        },
        StreamEvent::ToolCallEnd {
            id: ToolCallId::new("call-1"),
            name: "echo".to_string(),
            arguments: match json!({"x": "hi"}) {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            },
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

    let (session, _) = rig
        .service
        .sessions
        .create_with_id(SessionId::new("T1"), serde_json::Map::new())
        .await;
    rig.service
        .input
        .push(InputEvent::user("run echo", Some(session.id.clone())));

    wait_until(
        || {
            rig.recorder
                .types_for("T1")
                .contains(&names::LOOP_FINISHED.to_string())
        },
        "tool round to finish",
    )
    .await;

    // Transcript: user, assistant(tool-call), tool "hi", assistant "done".
    let transcript = rig
        .service
        .sessions
        .state_store(Some(&session.id))
        .lock()
        .snapshot();
    assert_eq!(transcript.len(), 4);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[1].tool_calls().len(), 1);
    match &transcript[2].segments[0] {
        ContentSegment::ToolResult {
            call_id,
            name,
            body,
            is_error,
        } => {
            assert_eq!(call_id.as_str(), "call-1");
            assert_eq!(name, "echo");
            assert_eq!(body, "hi");
            assert!(!*is_error);
        }
        other => panic!("unexpected segment: {other:?}"),
    }
    assert_eq!(transcript[3].text_content(), "done");

    // tool:executing and tool:result carry the matching call id.
    let events = rig.recorder.events.lock().clone();
    let executing = events
        .iter()
        .find(|e| e.event_type == names::TOOL_EXECUTING)
        .expect("tool:executing missing");
    let result = events
        .iter()
        .find(|e| e.event_type == names::TOOL_RESULT)
        .expect("tool:result missing");
    assert_eq!(executing.payload["toolCallId"], "call-1");
    assert_eq!(result.payload["toolCallId"], "call-1");
    assert_eq!(result.payload["result"], "hi");
}

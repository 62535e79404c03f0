// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: the safety monitor's escalation ladder under repeated
//! identical tool failures.

use crate::prelude::*;
use serde_json::Map;
use starry_core::test_support::FallbackBehavior;
use starry_core::{
    names, FinishReason, InputEvent, SessionId, StreamEvent, TokenUsage, ToolCallId,
};

fn bad_tool_script(call: usize) -> Vec<StreamEvent> {
    vec![
        StreamEvent::ToolCallStart {
            id: ToolCallId::new(format!("bad-{call}")),
            name: "bad".to_string(),
        },
        StreamEvent::ToolCallEnd {
            id: ToolCallId::new(format!("bad-{call}")),
            name: "bad".to_string(),
            arguments: Map::new(),
        },
        StreamEvent::Finish {
            reason: FinishReason::ToolUse,
            usage: TokenUsage::default(),
        },
    ]
}

#[tokio::test]
async fn repeated_identical_failures_escalate_to_cascade() {
    let rig = rig_with(FallbackBehavior::EndTurn).await;
    for call in 0..15 {
        rig.provider.push_script(bad_tool_script(call));
    }

    let (session, _) = rig
        .service
        .sessions
        .create_with_id(SessionId::new("SAFE"), serde_json::Map::new())
        .await;
    rig.service
        .input
        .push(InputEvent::user("loop forever", Some(session.id.clone())));

    wait_until(
        || {
            rig.recorder
                .types_for("SAFE")
                .contains(&names::LOOP_FINISHED.to_string())
        },
        "safety halt to finish the loop",
    )
    .await;

    let transcript = rig
        .service
        .sessions
        .state_store(Some(&session.id))
        .lock()
        .snapshot();

    // After three identical failures the corrective prompt appears in
    // the transcript as a system message; after five consecutive
    // failures the ask-for-help prompt follows.
    let system_texts: Vec<String> = transcript
        .iter()
        .filter(|m| m.is_system())
        .map(|m| m.text_content())
        .collect();
    assert!(
        system_texts.iter().any(|t| t.starts_with("stop and analyse")),
        "repetition prompt missing: {system_texts:?}"
    );
    assert!(
        system_texts
            .iter()
            .any(|t| t.starts_with("ask the user for help")),
        "frustration prompt missing: {system_texts:?}"
    );

    // The window filled with failures, so the loop halted on the
    // cascade breaker and still finished.
    let events = rig.recorder.events.lock().clone();
    let error = events
        .iter()
        .find(|e| e.event_type == names::LOOP_ERROR)
        .expect("loop:error missing");
    assert_eq!(error.payload["reason"], "Error cascade");

    let for_session = rig.recorder.types_for("SAFE");
    assert_eq!(
        for_session.last().map(String::as_str),
        Some(names::LOOP_FINISHED)
    );
}

#[tokio::test]
async fn success_between_failures_resets_the_ladder() {
    let rig = rig_with(FallbackBehavior::EndTurn).await;

    // Two failures, then a success, then two more failures: no prompt.
    rig.provider.push_script(bad_tool_script(0));
    rig.provider.push_script(bad_tool_script(1));
    rig.provider.push_script(vec![
        StreamEvent::ToolCallStart {
            id: ToolCallId::new("ok-1"),
            name: "echo".to_string(),
        },
        StreamEvent::ToolCallEnd {
            id: ToolCallId::new("ok-1"),
            name: "echo".to_string(),
            arguments: Map::new(),
        },
        StreamEvent::Finish {
            reason: FinishReason::ToolUse,
            usage: TokenUsage::default(),
        },
    ]);
    rig.provider.push_script(bad_tool_script(2));
    rig.provider.push_script(bad_tool_script(3));
    rig.provider.push_script(vec![
        StreamEvent::TextDelta {
            text: "giving up".to_string(),
        },
        StreamEvent::Finish {
            reason: FinishReason::EndTurn,
            usage: TokenUsage::default(),
        },
    ]);

    let (session, _) = rig
        .service
        .sessions
        .create_with_id(SessionId::new("RESET"), serde_json::Map::new())
        .await;
    rig.service
        .input
        .push(InputEvent::user("try things", Some(session.id.clone())));

    wait_until(
        || {
            rig.recorder
                .types_for("RESET")
                .contains(&names::LOOP_FINISHED.to_string())
        },
        "turn to finish",
    )
    .await;

    let transcript = rig
        .service
        .sessions
        .state_store(Some(&session.id))
        .lock()
        .snapshot();
    assert!(
        transcript.iter().all(|m| !m.is_system()),
        "no corrective prompt should have been injected"
    );
}

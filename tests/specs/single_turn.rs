// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: a single turn with no tools.

use crate::prelude::*;
use starry_core::{names, FinishReason, InputEvent, Role, SessionId, StreamEvent, TokenUsage};

#[tokio::test]
async fn single_turn_without_tools() {
    let rig = rig_with(starry_core::test_support::FallbackBehavior::EndTurn).await;
    rig.provider.push_script(vec![
        StreamEvent::TextDelta {
            text: "Hello".to_string(),
        },
        StreamEvent::Finish {
            reason: FinishReason::EndTurn,
            usage: TokenUsage {
                input_tokens: 0,
                output_tokens: 10,
                total_tokens: 10,
            },
        },
    ]);

    let (session, _) = rig
        .service
        .sessions
        .create_with_id(SessionId::new("S1"), serde_json::Map::new())
        .await;
    rig.service
        .input
        .push(InputEvent::user("hi", Some(session.id.clone())));

    wait_until(
        || {
            rig.recorder
                .types_for("S1")
                .contains(&names::LOOP_FINISHED.to_string())
        },
        "loop to finish",
    )
    .await;

    // The default session stayed empty; S1 holds exactly the pair.
    assert!(rig.service.sessions.state_store(None).lock().is_empty());
    let transcript = rig
        .service
        .sessions
        .state_store(Some(&session.id))
        .lock()
        .snapshot();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[0].text_content(), "hi");
    assert_eq!(transcript[1].role, Role::Assistant);
    assert_eq!(transcript[1].text_content(), "Hello");

    // The bus saw the full ordered sequence, all tagged S1.
    assert_eq!(
        rig.recorder.types_for("S1"),
        vec![
            names::SESSION_CREATED,
            names::LOOP_STARTED,
            names::MESSAGE_USER,
            names::LOOP_AWAITING_LLM,
            names::STREAM_TEXT_DELTA,
            names::STREAM_FINISH,
            names::MESSAGE_ASSISTANT,
            names::LOOP_FINISHED,
        ]
    );
}

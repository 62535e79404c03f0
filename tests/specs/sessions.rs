// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: concurrent sessions stay isolated; core session
//! invariants hold through the assembled service.

use crate::prelude::*;
use starry_core::{names, InputEvent, SessionId, DEFAULT_SESSION_ID};

#[tokio::test]
async fn two_sessions_do_not_leak_into_each_other() {
    let rig = rig().await;

    let (sa, _) = rig
        .service
        .sessions
        .create_with_id(SessionId::new("SA"), serde_json::Map::new())
        .await;
    let (sb, _) = rig
        .service
        .sessions
        .create_with_id(SessionId::new("SB"), serde_json::Map::new())
        .await;

    rig.service
        .input
        .push(InputEvent::user("A", Some(sa.id.clone())));
    rig.service
        .input
        .push(InputEvent::user("B", Some(sb.id.clone())));

    wait_until(
        || {
            rig.recorder
                .types_for("SB")
                .contains(&names::LOOP_FINISHED.to_string())
        },
        "both turns to finish",
    )
    .await;

    let a = rig
        .service
        .sessions
        .state_store(Some(&sa.id))
        .lock()
        .snapshot();
    let b = rig
        .service
        .sessions
        .state_store(Some(&sb.id))
        .lock()
        .snapshot();

    let a_texts: Vec<String> = a.iter().map(|m| m.text_content()).collect();
    let b_texts: Vec<String> = b.iter().map(|m| m.text_content()).collect();
    assert_eq!(a_texts, vec!["A", "A"]);
    assert_eq!(b_texts, vec!["B", "B"]);
}

#[tokio::test]
async fn default_session_cannot_be_destroyed() {
    let rig = rig().await;
    let default_id = SessionId::new(DEFAULT_SESSION_ID);

    assert!(!rig.service.sessions.destroy(&default_id).await);
    assert!(rig.service.sessions.get(&default_id).is_some());
}

#[tokio::test]
async fn snapshots_survive_later_mutation() {
    let rig = rig().await;
    let store = rig.service.sessions.state_store(None);

    store
        .lock()
        .append(starry_core::Message::text(starry_core::Role::User, "one"));
    let snap = store.lock().snapshot();

    store
        .lock()
        .append(starry_core::Message::text(starry_core::Role::User, "two"));
    store.lock().clear();

    assert_eq!(snap.len(), 1);
    assert_eq!(snap[0].text_content(), "one");

    // Restoring brings the snapshot back verbatim.
    store.lock().restore(&snap);
    assert_eq!(store.lock().snapshot(), snap);
}

#[tokio::test]
async fn ordering_within_one_session_is_fifo() {
    let rig = rig().await;
    let (session, _) = rig
        .service
        .sessions
        .create_with_id(SessionId::new("FIFO"), serde_json::Map::new())
        .await;

    for i in 0..3 {
        rig.service
            .input
            .push(InputEvent::user(format!("turn-{i}"), Some(session.id.clone())));
    }

    wait_until(
        || {
            rig.recorder
                .types_for("FIFO")
                .iter()
                .filter(|t| t.as_str() == names::LOOP_FINISHED)
                .count()
                == 3
        },
        "three turns to finish",
    )
    .await;

    let transcript = rig
        .service
        .sessions
        .state_store(Some(&session.id))
        .lock()
        .snapshot();
    let users: Vec<String> = transcript
        .iter()
        .filter(|m| m.is_user())
        .map(|m| m.text_content())
        .collect();
    assert_eq!(users, vec!["turn-0", "turn-1", "turn-2"]);
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn client(
    subs: &Arc<Subscriptions>,
    depth: usize,
) -> (u64, mpsc::Receiver<String>, CancellationToken) {
    let (tx, rx) = mpsc::channel(depth);
    let disconnect = CancellationToken::new();
    let id = subs.register(tx, disconnect.clone());
    (id, rx, disconnect)
}

fn event(session: &str) -> Notification {
    Notification::new("agent.output", json!({"sessionId": session, "text": "x"}))
}

#[tokio::test]
async fn broadcast_reaches_only_subscribers() {
    let subs = Subscriptions::new();
    let (a, mut rx_a, _da) = client(&subs, 8);
    let (b, mut rx_b, _db) = client(&subs, 8);

    subs.subscribe(a, SessionId::new("s1"));
    subs.subscribe(b, SessionId::new("s2"));

    subs.broadcast_to_session(&SessionId::new("s1"), &event("s1"));

    let line = rx_a.try_recv().unwrap();
    assert!(line.contains("agent.output"));
    assert!(rx_b.try_recv().is_err());
}

#[tokio::test]
async fn one_client_many_sessions() {
    let subs = Subscriptions::new();
    let (a, mut rx, _d) = client(&subs, 8);
    subs.subscribe(a, SessionId::new("s1"));
    subs.subscribe(a, SessionId::new("s2"));

    subs.broadcast_to_session(&SessionId::new("s1"), &event("s1"));
    subs.broadcast_to_session(&SessionId::new("s2"), &event("s2"));

    assert!(rx.try_recv().unwrap().contains("s1"));
    assert!(rx.try_recv().unwrap().contains("s2"));
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let subs = Subscriptions::new();
    let (a, mut rx, _d) = client(&subs, 8);
    let session = SessionId::new("s1");
    subs.subscribe(a, session.clone());
    subs.unsubscribe(a, &session);

    subs.broadcast_to_session(&session, &event("s1"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn remove_cleans_both_indices() {
    let subs = Subscriptions::new();
    let (a, _rx, _d) = client(&subs, 8);
    subs.subscribe(a, SessionId::new("s1"));

    subs.remove(a);
    assert_eq!(subs.client_count(), 0);
    assert!(subs.sessions_of(a).is_empty());

    // Broadcast after removal is a no-op, not a panic.
    subs.broadcast_to_session(&SessionId::new("s1"), &event("s1"));
}

#[tokio::test]
async fn list_clients_reports_sessions() {
    let subs = Subscriptions::new();
    let (a, _rx, _d) = client(&subs, 8);
    subs.subscribe(a, SessionId::new("s1"));

    let clients = subs.list_clients();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].0, a);
    assert_eq!(clients[0].1, vec![SessionId::new("s1")]);
}

#[tokio::test(start_paused = true)]
async fn backpressured_client_is_evicted_after_grace() {
    let subs = Subscriptions::with_grace(Duration::from_millis(100));
    let (a, _rx, disconnect) = client(&subs, 1);
    let session = SessionId::new("s1");
    subs.subscribe(a, session.clone());

    // Fill the outbox, then overflow it.
    subs.broadcast_to_session(&session, &event("s1"));
    subs.broadcast_to_session(&session, &event("s1"));
    assert!(!disconnect.is_cancelled());

    tokio::time::sleep(Duration::from_millis(150)).await;
    tokio::task::yield_now().await;
    assert!(disconnect.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn drain_within_grace_cancels_eviction() {
    let subs = Subscriptions::with_grace(Duration::from_millis(100));
    let (a, mut rx, disconnect) = client(&subs, 1);
    let session = SessionId::new("s1");
    subs.subscribe(a, session.clone());

    subs.broadcast_to_session(&session, &event("s1"));
    subs.broadcast_to_session(&session, &event("s1")); // back-pressure

    // Writer drains and reports it.
    let _ = rx.try_recv();
    subs.mark_drained(a);

    tokio::time::sleep(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;
    assert!(!disconnect.is_cancelled());
}

#[tokio::test]
async fn closed_outbox_disconnects() {
    let subs = Subscriptions::new();
    let (a, rx, disconnect) = client(&subs, 1);
    let session = SessionId::new("s1");
    subs.subscribe(a, session.clone());
    drop(rx);

    subs.broadcast_to_session(&session, &event("s1"));
    assert!(disconnect.is_cancelled());
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session subscription fan-out with slow-client eviction.
//!
//! Two indices: client → subscribed sessions, and session → subscribing
//! clients. Each client owns a bounded outbox drained by its writer
//! task. A write that hits back-pressure arms a 5 s eviction timer;
//! the writer cancels it once the outbox drains, otherwise the
//! connection is forcibly closed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use starry_core::SessionId;

use crate::protocol::Notification;

/// Outbox depth per client before back-pressure kicks in.
pub const CLIENT_OUTBOX_DEPTH: usize = 256;

/// Grace period for a back-pressured client to drain.
pub const SLOW_CLIENT_GRACE: Duration = Duration::from_secs(5);

struct ClientEntry {
    /// Serialised lines queued for the writer task
    outbox: mpsc::Sender<String>,
    /// Cancelling this closes the connection
    disconnect: CancellationToken,
    sessions: HashSet<SessionId>,
    /// Armed while the client is back-pressured
    slow_timer: Option<CancellationToken>,
}

/// Client/session double index shared by the server and forwarder.
pub struct Subscriptions {
    next_id: AtomicU64,
    clients: Mutex<HashMap<u64, ClientEntry>>,
    by_session: Mutex<HashMap<SessionId, HashSet<u64>>>,
    grace: Duration,
}

impl Subscriptions {
    pub fn new() -> Arc<Self> {
        Self::with_grace(SLOW_CLIENT_GRACE)
    }

    /// Test hook: shorten the eviction grace period.
    pub fn with_grace(grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            clients: Mutex::new(HashMap::new()),
            by_session: Mutex::new(HashMap::new()),
            grace,
        })
    }

    /// Register a connection; returns its client id.
    pub fn register(&self, outbox: mpsc::Sender<String>, disconnect: CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.clients.lock().insert(
            id,
            ClientEntry {
                outbox,
                disconnect,
                sessions: HashSet::new(),
                slow_timer: None,
            },
        );
        id
    }

    /// Remove a connection from every index and cancel its timers.
    pub fn remove(&self, client_id: u64) {
        let entry = self.clients.lock().remove(&client_id);
        let Some(entry) = entry else {
            return;
        };
        if let Some(timer) = entry.slow_timer {
            timer.cancel();
        }
        let mut by_session = self.by_session.lock();
        for session in entry.sessions {
            if let Some(subscribers) = by_session.get_mut(&session) {
                subscribers.remove(&client_id);
                if subscribers.is_empty() {
                    by_session.remove(&session);
                }
            }
        }
    }

    pub fn subscribe(&self, client_id: u64, session: SessionId) {
        let mut clients = self.clients.lock();
        let Some(entry) = clients.get_mut(&client_id) else {
            return;
        };
        entry.sessions.insert(session.clone());
        self.by_session
            .lock()
            .entry(session)
            .or_default()
            .insert(client_id);
    }

    pub fn unsubscribe(&self, client_id: u64, session: &SessionId) {
        if let Some(entry) = self.clients.lock().get_mut(&client_id) {
            entry.sessions.remove(session);
        }
        let mut by_session = self.by_session.lock();
        if let Some(subscribers) = by_session.get_mut(session) {
            subscribers.remove(&client_id);
            if subscribers.is_empty() {
                by_session.remove(session);
            }
        }
    }

    /// Sessions a client is attached to.
    pub fn sessions_of(&self, client_id: u64) -> Vec<SessionId> {
        self.clients
            .lock()
            .get(&client_id)
            .map(|entry| entry.sessions.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Connected client ids with their session sets.
    pub fn list_clients(&self) -> Vec<(u64, Vec<SessionId>)> {
        self.clients
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.sessions.iter().cloned().collect()))
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Queue a line for one client (replay path). Back-pressure rules
    /// apply as for broadcast.
    pub fn send_to(self: &Arc<Self>, client_id: u64, line: String) {
        self.deliver(client_id, line);
    }

    /// Deliver an event to every subscriber of a session, in order.
    pub fn broadcast_to_session(self: &Arc<Self>, session: &SessionId, event: &Notification) {
        let subscribers: Vec<u64> = self
            .by_session
            .lock()
            .get(session)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        if subscribers.is_empty() {
            return;
        }

        let line = event.to_line();
        for client_id in subscribers {
            self.deliver(client_id, line.clone());
        }
    }

    fn deliver(self: &Arc<Self>, client_id: u64, line: String) {
        let mut clients = self.clients.lock();
        let Some(entry) = clients.get_mut(&client_id) else {
            return;
        };

        match entry.outbox.try_send(line) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                if entry.slow_timer.is_none() {
                    warn!(client_id, "client back-pressured, arming eviction timer");
                    let timer = CancellationToken::new();
                    entry.slow_timer = Some(timer.clone());
                    let disconnect = entry.disconnect.clone();
                    let grace = self.grace;
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = timer.cancelled() => {}
                            _ = tokio::time::sleep(grace) => {
                                warn!(client_id, "slow client did not drain, disconnecting");
                                disconnect.cancel();
                            }
                        }
                    });
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(client_id, "client outbox closed");
                entry.disconnect.cancel();
            }
        }
    }

    /// Writer-side drain signal: cancels any armed eviction timer.
    pub fn mark_drained(&self, client_id: u64) {
        if let Some(entry) = self.clients.lock().get_mut(&client_id) {
            if let Some(timer) = entry.slow_timer.take() {
                timer.cancel();
            }
        }
    }
}

#[cfg(test)]
#[path = "subscriptions_tests.rs"]
mod tests;

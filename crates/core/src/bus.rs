// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process typed pub/sub event bus.
//!
//! Subscribers register by exact event type or as wildcards and receive
//! an opaque [`SubscriptionId`] token for later removal. Delivery is in
//! registration order, type-specific handlers before wildcard handlers.
//! A failing handler (error return or panic) is logged and never stops
//! delivery to the remaining handlers for the same event.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

use crate::event::BusEvent;
use crate::id::SubscriptionId;

/// Error type handlers may return; logged, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;
type HandlerFn = Arc<dyn Fn(Arc<BusEvent>) -> HandlerFuture + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    handler: HandlerFn,
    /// Set once the handler has fired for a `once` subscription.
    spent: Option<Arc<AtomicBool>>,
}

#[derive(Default)]
struct Registry {
    by_type: HashMap<String, Vec<Subscription>>,
    wildcard: Vec<Subscription>,
}

/// In-process event bus shared across the runtime.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    next_id: AtomicU64,
    registry: RwLock<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                registry: RwLock::new(Registry::default()),
            }),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        SubscriptionId::new(format!("sub-{n}"))
    }

    /// Subscribe to an exact event type.
    pub fn on<F>(&self, event_type: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<BusEvent>) -> HandlerFuture + Send + Sync + 'static,
    {
        let id = self.next_id();
        let sub = Subscription {
            id: id.clone(),
            handler: Arc::new(handler),
            spent: None,
        };
        self.inner
            .registry
            .write()
            .by_type
            .entry(event_type.into())
            .or_default()
            .push(sub);
        id
    }

    /// Subscribe to an exact event type for a single delivery.
    pub fn once<F>(&self, event_type: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<BusEvent>) -> HandlerFuture + Send + Sync + 'static,
    {
        let id = self.next_id();
        let sub = Subscription {
            id: id.clone(),
            handler: Arc::new(handler),
            spent: Some(Arc::new(AtomicBool::new(false))),
        };
        self.inner
            .registry
            .write()
            .by_type
            .entry(event_type.into())
            .or_default()
            .push(sub);
        id
    }

    /// Subscribe to every event, including types with no other subscribers.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<BusEvent>) -> HandlerFuture + Send + Sync + 'static,
    {
        let id = self.next_id();
        let sub = Subscription {
            id: id.clone(),
            handler: Arc::new(handler),
            spent: None,
        };
        self.inner.registry.write().wildcard.push(sub);
        id
    }

    /// Remove a subscription. Returns false when the token is unknown.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let mut registry = self.inner.registry.write();
        for subs in registry.by_type.values_mut() {
            if let Some(pos) = subs.iter().position(|s| &s.id == id) {
                subs.remove(pos);
                return true;
            }
        }
        if let Some(pos) = registry.wildcard.iter().position(|s| &s.id == id) {
            registry.wildcard.remove(pos);
            return true;
        }
        false
    }

    /// Build and emit an event in one step.
    pub async fn emit(&self, event_type: impl Into<String>, payload: Value) {
        self.emit_event(BusEvent::new(event_type, payload)).await;
    }

    /// Deliver an event to all matching subscribers.
    ///
    /// Type-specific handlers run first, then wildcards, each in
    /// registration order. Handler failures are isolated per handler.
    pub async fn emit_event(&self, event: BusEvent) {
        let event = Arc::new(event);

        // Snapshot matching handlers so no lock is held across awaits.
        let (typed, wildcard): (Vec<(SubscriptionId, HandlerFn)>, Vec<HandlerFn>) = {
            let registry = self.inner.registry.read();
            let typed = registry
                .by_type
                .get(event.event_type.as_str())
                .map(|subs| {
                    subs.iter()
                        .filter(|s| claim(s))
                        .map(|s| (s.id.clone(), Arc::clone(&s.handler)))
                        .collect()
                })
                .unwrap_or_default();
            let wildcard = registry
                .wildcard
                .iter()
                .map(|s| Arc::clone(&s.handler))
                .collect();
            (typed, wildcard)
        };

        // Drop spent `once` subscriptions before running handlers so a
        // re-entrant emit cannot see them again.
        {
            let mut registry = self.inner.registry.write();
            if let Some(subs) = registry.by_type.get_mut(event.event_type.as_str()) {
                subs.retain(|s| {
                    s.spent
                        .as_ref()
                        .map(|flag| !flag.load(Ordering::SeqCst))
                        .unwrap_or(true)
                });
            }
        }

        for (_, handler) in typed {
            run_handler(&handler, &event).await;
        }
        for handler in wildcard {
            run_handler(&handler, &event).await;
        }
    }

    /// Number of live subscriptions, wildcard included.
    pub fn subscription_count(&self) -> usize {
        let registry = self.inner.registry.read();
        registry.by_type.values().map(Vec::len).sum::<usize>() + registry.wildcard.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns true when this subscription should fire for the current
/// event. A `once` subscription only claims its first event.
fn claim(sub: &Subscription) -> bool {
    match &sub.spent {
        None => true,
        Some(flag) => !flag.swap(true, Ordering::SeqCst),
    }
}

async fn run_handler(handler: &HandlerFn, event: &Arc<BusEvent>) {
    let fut = std::panic::AssertUnwindSafe(handler(Arc::clone(event)));
    match fut.catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(event_type = %event.event_type, error = %e, "event handler failed");
        }
        Err(_) => {
            warn!(event_type = %event.event_type, "event handler panicked");
        }
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;

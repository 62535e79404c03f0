// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus → daemon-client event forwarding.
//!
//! A wildcard subscriber maps selected internal events to the client
//! notification vocabulary (`agent.output`, `agent.tool`,
//! `agent.loop`). Events without a session id are dropped; everything
//! else is fanned out to that session's subscribers only.

use std::sync::Arc;

use serde_json::{json, Value};

use starry_core::{names, BusEvent, EventBus, SubscriptionId};

use crate::protocol::Notification;
use crate::subscriptions::Subscriptions;

/// Attach the forwarder; the returned token unsubscribes it.
pub fn attach_forwarder(bus: &EventBus, subscriptions: Arc<Subscriptions>) -> SubscriptionId {
    bus.on_any(move |event| {
        let subscriptions = Arc::clone(&subscriptions);
        Box::pin(async move {
            forward(&event, &subscriptions);
            Ok(())
        })
    })
}

fn forward(event: &BusEvent, subscriptions: &Arc<Subscriptions>) {
    let Some(session_id) = event.session_id() else {
        return;
    };

    let Some(notification) = map_event(event, session_id.as_str()) else {
        return;
    };
    subscriptions.broadcast_to_session(&session_id, &notification);
}

/// The §event mapping: internal type → client notification.
fn map_event(event: &BusEvent, session_id: &str) -> Option<Notification> {
    let payload = &event.payload;
    match event.event_type.as_str() {
        names::STREAM_TEXT_DELTA => Some(Notification::new(
            "agent.output",
            json!({
                "sessionId": session_id,
                "text": payload.get("text").cloned().unwrap_or(Value::Null),
                "isReasoning": false,
            }),
        )),

        names::STREAM_REASONING_DELTA => Some(Notification::new(
            "agent.output",
            json!({
                "sessionId": session_id,
                "text": payload.get("text").cloned().unwrap_or(Value::Null),
                "isReasoning": true,
            }),
        )),

        names::MESSAGE_SYSTEM => {
            let text = payload
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(Notification::new(
                "agent.output",
                json!({
                    "sessionId": session_id,
                    "text": format!("{text}\n"),
                    "isReasoning": false,
                }),
            ))
        }

        names::TOOL_EXECUTING => Some(Notification::new(
            "agent.tool",
            json!({
                "sessionId": session_id,
                "tool": payload.get("tool").cloned().unwrap_or(Value::Null),
                "toolCallId": payload.get("toolCallId").cloned().unwrap_or(Value::Null),
                "status": "started",
                "args": payload.get("args").cloned().unwrap_or(Value::Null),
            }),
        )),

        names::TOOL_RESULT => Some(Notification::new(
            "agent.tool",
            json!({
                "sessionId": session_id,
                "tool": payload.get("tool").cloned().unwrap_or(Value::Null),
                "toolCallId": payload.get("toolCallId").cloned().unwrap_or(Value::Null),
                "status": "completed",
                "result": payload.get("result").cloned().unwrap_or(Value::Null),
            }),
        )),

        names::TOOL_ERROR => Some(Notification::new(
            "agent.tool",
            json!({
                "sessionId": session_id,
                "tool": payload.get("tool").cloned().unwrap_or(Value::Null),
                "toolCallId": payload.get("toolCallId").cloned().unwrap_or(Value::Null),
                "status": "failed",
                "error": payload.get("error").cloned().unwrap_or(Value::Null),
            }),
        )),

        names::LOOP_STARTED => Some(loop_notification(session_id, "started", None)),
        names::LOOP_AWAITING_LLM => Some(loop_notification(session_id, "awaiting_llm", None)),
        names::LOOP_FINISHED => Some(loop_notification(session_id, "finished", None)),
        names::LOOP_ERROR => Some(loop_notification(
            session_id,
            "error",
            payload.get("reason").cloned(),
        )),

        _ => None,
    }
}

fn loop_notification(session_id: &str, phase: &str, error: Option<Value>) -> Notification {
    let mut data = json!({
        "sessionId": session_id,
        "phase": phase,
    });
    if let (Value::Object(map), Some(error)) = (&mut data, error) {
        map.insert("error".to_string(), error);
    }
    Notification::new("agent.loop", data)
}

#[cfg(test)]
#[path = "forwarder_tests.rs"]
mod tests;

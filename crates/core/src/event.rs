// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus event type and the runtime's event-name vocabulary.
//!
//! Events are open: the type is a colon-namespaced string and the
//! payload is a JSON object, so plugins can publish their own types
//! alongside the runtime's. The names the core itself emits are listed
//! in [`names`] and every core payload carries a `sessionId` field.

use crate::id::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event names emitted by the core runtime.
pub mod names {
    // -- session lifecycle --
    pub const SESSION_CREATED: &str = "session:created";
    pub const SESSION_DESTROYED: &str = "session:destroyed";

    // -- execution loop --
    pub const LOOP_STARTED: &str = "loop:started";
    pub const LOOP_AWAITING_LLM: &str = "loop:awaiting_llm";
    pub const LOOP_FINISHED: &str = "loop:finished";
    pub const LOOP_ERROR: &str = "loop:error";

    // -- transcript --
    pub const MESSAGE_USER: &str = "message:user";
    pub const MESSAGE_ASSISTANT: &str = "message:assistant";
    pub const MESSAGE_SYSTEM: &str = "message:system";

    // -- model streaming --
    pub const STREAM_TEXT_DELTA: &str = "stream:text_delta";
    pub const STREAM_REASONING_DELTA: &str = "stream:reasoning_delta";
    pub const STREAM_TOOL_CALL_START: &str = "stream:tool_call_start";
    pub const STREAM_TOOL_CALL_DELTA: &str = "stream:tool_call_delta";
    pub const STREAM_TOOL_CALL_END: &str = "stream:tool_call_end";
    pub const STREAM_FINISH: &str = "stream:finish";
    pub const STREAM_ERROR: &str = "stream:error";

    // -- tools --
    pub const TOOL_EXECUTING: &str = "tool:executing";
    pub const TOOL_RESULT: &str = "tool:result";
    pub const TOOL_ERROR: &str = "tool:error";

    // -- plugins / sandbox --
    pub const PLUGIN_LOADED: &str = "plugin:loaded";
    pub const SANDBOX_SIGNATURE_FAILED: &str = "sandbox:signature_failed";
    pub const SANDBOX_WORKER_RESTARTED: &str = "sandbox:worker_restarted";
    pub const SANDBOX_WORKER_RESTART_EXHAUSTED: &str = "sandbox:worker_restart_exhausted";
    pub const SANDBOX_WORKER_STALLED: &str = "sandbox:worker_stalled";
    pub const SANDBOX_MODULE_BLOCKED: &str = "sandbox:module_blocked";

    // -- security --
    pub const SECURITY_VIOLATION: &str = "security:violation";
}

/// A typed event delivered through the in-process bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

impl BusEvent {
    /// Create an event stamped with the current time.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Session id carried by the payload.
    ///
    /// Checks `payload.metadata.sessionId` first, then `payload.sessionId`.
    pub fn session_id(&self) -> Option<SessionId> {
        let from_metadata = self
            .payload
            .get("metadata")
            .and_then(|meta| meta.get("sessionId"))
            .and_then(Value::as_str);
        let direct = self.payload.get("sessionId").and_then(Value::as_str);

        from_metadata.or(direct).map(SessionId::new)
    }

    /// `replyTo` correlation id, when the payload carries one.
    pub fn reply_to(&self) -> Option<&str> {
        self.payload.get("replyTo").and_then(Value::as_str)
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;

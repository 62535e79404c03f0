// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted fakes for engine and daemon tests.
//!
//! Enabled with the `test-support` feature so downstream crates can
//! drive the runtime without a real model or real tools.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::provider::{
    ChatRequest, FinishReason, ModelInfo, Provider, ProviderError, StreamEvent, TokenUsage,
};
use crate::tool::{Tool, ToolContext, ToolError};

/// What a [`ScriptedProvider`] does once its scripts run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackBehavior {
    /// Echo the last user message as a text reply
    Echo,
    /// Finish immediately with no content
    EndTurn,
}

/// Provider that replays scripted event sequences, then falls back.
pub struct ScriptedProvider {
    id: String,
    scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
    fallback: FallbackBehavior,
    /// Captured requests, in call order
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>, fallback: FallbackBehavior) -> Self {
        Self {
            id: id.into(),
            scripts: Mutex::new(VecDeque::new()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue one streaming pass worth of events.
    pub fn push_script(&self, events: Vec<StreamEvent>) {
        self.scripts.lock().push_back(events);
    }

    /// Convenience: a text reply followed by a finish event.
    pub fn push_text_reply(&self, text: &str, total_tokens: u64) {
        self.push_script(vec![
            StreamEvent::TextDelta {
                text: text.to_string(),
            },
            StreamEvent::Finish {
                reason: FinishReason::EndTurn,
                usage: TokenUsage {
                    input_tokens: 0,
                    output_tokens: total_tokens,
                    total_tokens,
                },
            },
        ]);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: "scripted-1".to_string(),
            context_window: 128_000,
            max_output: 4096,
        }]
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let script = self.scripts.lock().pop_front();
        let events = match script {
            Some(events) => events,
            None => match self.fallback {
                FallbackBehavior::Echo => {
                    let text = request
                        .messages
                        .iter()
                        .rev()
                        .find(|m| m.is_user())
                        .map(|m| m.text_content())
                        .unwrap_or_default();
                    vec![
                        StreamEvent::TextDelta { text },
                        StreamEvent::Finish {
                            reason: FinishReason::EndTurn,
                            usage: TokenUsage::default(),
                        },
                    ]
                }
                FallbackBehavior::EndTurn => vec![StreamEvent::Finish {
                    reason: FinishReason::EndTurn,
                    usage: TokenUsage::default(),
                }],
            },
        };
        self.requests.lock().push(request);

        let (tx, rx) = mpsc::channel(events.len().max(1));
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// Tool returning a fixed result.
pub struct StaticTool {
    id: String,
    result: String,
    /// Arguments seen, in call order
    pub calls: Mutex<Vec<Map<String, Value>>>,
}

impl StaticTool {
    pub fn new(id: impl Into<String>, result: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            result: result.into(),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "static test tool"
    }

    fn schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        arguments: Map<String, Value>,
        _context: ToolContext,
    ) -> Result<String, ToolError> {
        self.calls.lock().push(arguments);
        Ok(self.result.clone())
    }
}

/// Tool that always rejects.
pub struct FailingTool {
    id: String,
    message: String,
}

impl FailingTool {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            message: message.into(),
        })
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "always fails"
    }

    fn schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        _arguments: Map<String, Value>,
        _context: ToolContext,
    ) -> Result<String, ToolError> {
        Err(ToolError::Failed(self.message.clone()))
    }
}

/// Collects every bus event type (with payloads) for assertions.
pub struct EventRecorder {
    pub events: Arc<Mutex<Vec<crate::event::BusEvent>>>,
}

impl EventRecorder {
    pub fn attach(bus: &crate::bus::EventBus) -> Self {
        let events: Arc<Mutex<Vec<crate::event::BusEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.on_any(move |event| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().push((*event).clone());
                Ok(())
            })
        });
        Self { events }
    }

    pub fn types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    /// Event types seen for one session only.
    pub fn types_for(&self, session_id: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| {
                e.session_id()
                    .map(|id| id.as_str() == session_id)
                    .unwrap_or(false)
            })
            .map(|e| e.event_type.clone())
            .collect()
    }
}

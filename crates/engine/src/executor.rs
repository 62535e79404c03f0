// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The execution loop: one input event driven to completion.
//!
//! `process_event` owns its session's state store for the duration of
//! the turn. Each tool round assembles a bounded context, streams the
//! model, then executes any requested tools; the loop ends when the
//! model finishes without tool calls, a limit fires, the stream fails,
//! or the input is cancelled. Every outcome still emits
//! `loop:finished`.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use starry_core::{
    assemble_context, names, schema, ChatRequest, ContentSegment, EventBus, FinishReason, Guide,
    InputEvent, Message, PathGuard, Registries, Role, SafetyMonitor, SafetyVerdict, SessionId,
    SessionManager, StreamEvent, TokenUsage, Tool, ToolCallRequest, ToolContext, ToolSchema,
};

use crate::resolver::Resolver;

/// Loop tuning.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Tool rounds allowed per turn
    pub max_tool_rounds: u32,
    /// Sliding-window size in user turns
    pub max_turns: i64,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 10,
            max_turns: 20,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Shared handles the executor drives.
pub struct ExecutorDeps {
    pub bus: EventBus,
    pub sessions: Arc<SessionManager>,
    pub registries: Arc<Registries>,
    pub safety: Arc<Mutex<SafetyMonitor>>,
    pub guard: Arc<PathGuard>,
    pub resolver: Resolver,
    pub working_dir: PathBuf,
}

/// Why the tool-round loop stopped.
enum RoundExit {
    Done,
    Halted,
    Cancelled,
    StreamFailed,
}

/// Drives inputs through the model/tool cycle.
pub struct Executor {
    deps: ExecutorDeps,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(deps: ExecutorDeps, config: ExecutorConfig) -> Self {
        Self { deps, config }
    }

    pub fn bus(&self) -> &EventBus {
        &self.deps.bus
    }

    /// Process one input event to completion.
    pub async fn process_event(&self, input: InputEvent) {
        let session_id = self.deps.sessions.resolve_id(input.session_id.as_ref());
        let store = self.deps.sessions.state_store(input.session_id.as_ref());
        let reply_to = input.reply_to.clone();
        self.deps.safety.lock().on_loop_start();

        self.emit(names::LOOP_STARTED, &session_id, &reply_to, json!({}))
            .await;

        let user_message = Message::text(Role::User, input.data.clone());
        let user_payload = json!({
            "messageId": user_message.id.as_str(),
            "text": input.data,
        });
        store.lock().append(user_message);
        self.deps.sessions.touch(&session_id);
        self.emit(names::MESSAGE_USER, &session_id, &reply_to, user_payload)
            .await;

        let exit = self.run_rounds(&input, &session_id, &store, &reply_to).await;

        if matches!(exit, RoundExit::Cancelled) {
            self.emit(
                names::LOOP_ERROR,
                &session_id,
                &reply_to,
                json!({"reason": "cancelled"}),
            )
            .await;
        }

        self.emit(names::LOOP_FINISHED, &session_id, &reply_to, json!({}))
            .await;
    }

    async fn run_rounds(
        &self,
        input: &InputEvent,
        session_id: &SessionId,
        store: &Arc<Mutex<starry_core::StateStore>>,
        reply_to: &Option<String>,
    ) -> RoundExit {
        for _round in 0..self.config.max_tool_rounds {
            let verdict = self.deps.safety.lock().on_loop_tick();
            if let Some(exit) = self
                .handle_halt(&verdict, session_id, reply_to)
                .await
            {
                return exit;
            }
            if input.cancel.is_cancelled() {
                return RoundExit::Cancelled;
            }

            let context = {
                let store = store.lock();
                assemble_context(store.messages(), self.config.max_turns)
            };

            self.emit(names::LOOP_AWAITING_LLM, session_id, reply_to, json!({}))
                .await;
            let verdict = self.deps.safety.lock().before_llm_call();
            if let Some(exit) = self
                .handle_halt(&verdict, session_id, reply_to)
                .await
            {
                return exit;
            }

            // Per-session overrides resolve freshly before every call.
            let provider = match self.deps.resolver.provider_for(session_id) {
                Ok(provider) => provider,
                Err(e) => {
                    self.stream_failure(session_id, reply_to, &e.to_string()).await;
                    return RoundExit::StreamFailed;
                }
            };
            let model = match self.deps.resolver.model_for(session_id, &provider) {
                Ok(model) => model,
                Err(e) => {
                    self.stream_failure(session_id, reply_to, &e.to_string()).await;
                    return RoundExit::StreamFailed;
                }
            };
            let guide: Option<Arc<Guide>> = self.deps.resolver.guide_for(session_id);

            let request = ChatRequest {
                model,
                messages: context,
                system_prompt: guide.map(|g| g.system_prompt.clone()),
                tools: self.tool_schemas(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
                cancel: input.cancel.clone(),
            };

            let stream = match provider.stream_chat(request).await {
                Ok(stream) => stream,
                Err(e) => {
                    self.stream_failure(session_id, reply_to, &e.to_string()).await;
                    return RoundExit::StreamFailed;
                }
            };

            let outcome = self.consume_stream(stream, session_id, reply_to).await;

            let assistant = outcome.into_message();
            let has_tool_calls = !assistant.message.tool_calls().is_empty();

            if let Some(usage) = assistant.usage {
                self.deps
                    .safety
                    .lock()
                    .track_token_usage(usage.total_tokens);
            }

            if !assistant.message.segments.is_empty() {
                let payload = json!({
                    "messageId": assistant.message.id.as_str(),
                    "text": assistant.message.text_content(),
                });
                store.lock().append(assistant.message.clone());
                self.deps.sessions.touch(session_id);
                self.emit(names::MESSAGE_ASSISTANT, session_id, reply_to, payload)
                    .await;
            }

            if assistant.failed {
                self.emit(
                    names::LOOP_ERROR,
                    session_id,
                    reply_to,
                    json!({"reason": assistant.error.unwrap_or_else(|| "stream error".to_string())}),
                )
                .await;
                return RoundExit::StreamFailed;
            }

            if !has_tool_calls {
                return RoundExit::Done;
            }

            let calls: Vec<ToolCallRequest> = assistant
                .message
                .tool_calls()
                .into_iter()
                .cloned()
                .collect();
            for call in calls {
                if input.cancel.is_cancelled() {
                    return RoundExit::Cancelled;
                }
                if let Some(exit) = self
                    .run_tool_call(&call, input, session_id, store, reply_to)
                    .await
                {
                    return exit;
                }
            }
        }

        debug!(session_id = %session_id, "tool-round budget exhausted");
        RoundExit::Done
    }

    /// Execute one tool call and feed its outcome to the safety monitor.
    ///
    /// Returns `Some(exit)` when the loop must stop.
    async fn run_tool_call(
        &self,
        call: &ToolCallRequest,
        input: &InputEvent,
        session_id: &SessionId,
        store: &Arc<Mutex<starry_core::StateStore>>,
        reply_to: &Option<String>,
    ) -> Option<RoundExit> {
        let args_value = Value::Object(call.arguments.clone());
        self.emit(
            names::TOOL_EXECUTING,
            session_id,
            reply_to,
            json!({
                "toolCallId": call.id.as_str(),
                "tool": call.name,
                "args": args_value,
            }),
        )
        .await;

        let outcome = self.execute_tool(call, input, session_id).await;

        let (body, is_error) = match &outcome {
            Ok(result) => (result.clone(), false),
            Err(message) => (message.clone(), true),
        };

        store.lock().append(Message::tool_result(
            call.id.clone(),
            call.name.clone(),
            body.clone(),
            is_error,
        ));
        self.deps.sessions.touch(session_id);

        if is_error {
            self.emit(
                names::TOOL_ERROR,
                session_id,
                reply_to,
                json!({
                    "toolCallId": call.id.as_str(),
                    "tool": call.name,
                    "error": body,
                }),
            )
            .await;
        } else {
            self.emit(
                names::TOOL_RESULT,
                session_id,
                reply_to,
                json!({
                    "toolCallId": call.id.as_str(),
                    "tool": call.name,
                    "result": body,
                }),
            )
            .await;
        }

        let verdict = self
            .deps
            .safety
            .lock()
            .after_tool_execution(&call.name, &args_value, is_error);

        if let Some(prompt) = &verdict.inject_prompt {
            let message = Message::text(Role::System, prompt.clone());
            let payload = json!({"messageId": message.id.as_str(), "text": prompt});
            store.lock().append(message);
            self.emit(names::MESSAGE_SYSTEM, session_id, reply_to, payload)
                .await;
        }

        self.handle_halt(&verdict, session_id, reply_to).await
    }

    async fn execute_tool(
        &self,
        call: &ToolCallRequest,
        input: &InputEvent,
        session_id: &SessionId,
    ) -> Result<String, String> {
        let tool: Arc<dyn Tool> = self
            .deps
            .registries
            .tools
            .get(&call.name)
            .ok_or_else(|| format!("tool not found: {}", call.name))?;

        schema::validate_args(&tool.schema(), &call.arguments).map_err(|e| e.to_string())?;

        let context = ToolContext {
            working_dir: self.deps.working_dir.clone(),
            allowed_paths: self.deps.guard.effective_paths(Some(session_id)),
            cancel: input.cancel.clone(),
            bus: self.deps.bus.clone(),
        };

        tool.execute(call.arguments.clone(), context)
            .await
            .map_err(|e| e.to_string())
    }

    /// Consume a provider stream, re-emitting mapped events and
    /// accumulating the forming assistant message.
    async fn consume_stream(
        &self,
        mut stream: tokio::sync::mpsc::Receiver<StreamEvent>,
        session_id: &SessionId,
        reply_to: &Option<String>,
    ) -> StreamOutcome {
        let mut outcome = StreamOutcome::default();
        // Tool-call arguments accumulate across start/delta/end.
        let mut forming_args: Map<String, Value> = Map::new();

        while let Some(event) = stream.recv().await {
            match event {
                StreamEvent::TextDelta { text } => {
                    self.emit(
                        names::STREAM_TEXT_DELTA,
                        session_id,
                        reply_to,
                        json!({"text": text}),
                    )
                    .await;
                    outcome.text.push_str(&text);
                }
                StreamEvent::ReasoningDelta { text } => {
                    self.emit(
                        names::STREAM_REASONING_DELTA,
                        session_id,
                        reply_to,
                        json!({"text": text}),
                    )
                    .await;
                    outcome.reasoning.push_str(&text);
                }
                StreamEvent::ToolCallStart { id, name } => {
                    self.emit(
                        names::STREAM_TOOL_CALL_START,
                        session_id,
                        reply_to,
                        json!({"toolCallId": id.as_str(), "tool": name}),
                    )
                    .await;
                    forming_args = Map::new();
                }
                StreamEvent::ToolCallDelta {
                    id,
                    arguments_fragment,
                } => {
                    self.emit(
                        names::STREAM_TOOL_CALL_DELTA,
                        session_id,
                        reply_to,
                        json!({"toolCallId": id.as_str(), "fragment": arguments_fragment}),
                    )
                    .await;
                }
                StreamEvent::ToolCallEnd {
                    id,
                    name,
                    arguments,
                } => {
                    self.emit(
                        names::STREAM_TOOL_CALL_END,
                        session_id,
                        reply_to,
                        json!({"toolCallId": id.as_str(), "tool": name}),
                    )
                    .await;
                    let mut merged = std::mem::take(&mut forming_args);
                    for (key, value) in arguments {
                        merged.insert(key, value);
                    }
                    outcome.tool_calls.push(ToolCallRequest {
                        id,
                        name,
                        arguments: merged,
                    });
                }
                StreamEvent::Finish { reason, usage } => {
                    self.emit(
                        names::STREAM_FINISH,
                        session_id,
                        reply_to,
                        json!({
                            "reason": reason,
                            "usage": usage,
                        }),
                    )
                    .await;
                    outcome.finish = Some((reason, usage));
                    break;
                }
                StreamEvent::Error { message } => {
                    self.emit(
                        names::STREAM_ERROR,
                        session_id,
                        reply_to,
                        json!({"error": message}),
                    )
                    .await;
                    outcome.error = Some(message);
                    break;
                }
            }
        }

        if outcome.finish.is_none() && outcome.error.is_none() {
            let message = "stream ended without finish".to_string();
            self.emit(
                names::STREAM_ERROR,
                session_id,
                reply_to,
                json!({"error": message}),
            )
            .await;
            outcome.error = Some(message);
        }

        outcome
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.deps
            .registries
            .tools
            .list()
            .iter()
            .map(|tool| ToolSchema {
                name: tool.id().to_string(),
                description: tool.description().to_string(),
                parameters: tool.schema(),
            })
            .collect()
    }

    /// Emit `loop:error` and map a halting verdict to an exit.
    async fn handle_halt(
        &self,
        verdict: &SafetyVerdict,
        session_id: &SessionId,
        reply_to: &Option<String>,
    ) -> Option<RoundExit> {
        if !verdict.halt {
            return None;
        }
        let reason = verdict
            .reason
            .clone()
            .unwrap_or_else(|| "safety halt".to_string());
        warn!(session_id = %session_id, reason = %reason, "safety monitor halted the loop");
        self.emit(
            names::LOOP_ERROR,
            session_id,
            reply_to,
            json!({"reason": reason}),
        )
        .await;
        Some(RoundExit::Halted)
    }

    async fn stream_failure(&self, session_id: &SessionId, reply_to: &Option<String>, error: &str) {
        self.emit(
            names::STREAM_ERROR,
            session_id,
            reply_to,
            json!({"error": error}),
        )
        .await;
        self.emit(
            names::LOOP_ERROR,
            session_id,
            reply_to,
            json!({"reason": error}),
        )
        .await;
    }

    async fn emit(
        &self,
        event_type: &str,
        session_id: &SessionId,
        reply_to: &Option<String>,
        mut payload: Value,
    ) {
        if let Value::Object(map) = &mut payload {
            map.insert(
                "sessionId".to_string(),
                Value::String(session_id.as_str().to_string()),
            );
            if let Some(reply_to) = reply_to {
                map.insert("replyTo".to_string(), Value::String(reply_to.clone()));
            }
        }
        self.deps.bus.emit(event_type, payload).await;
    }
}

/// What one streaming pass produced.
#[derive(Default)]
struct StreamOutcome {
    text: String,
    reasoning: String,
    tool_calls: Vec<ToolCallRequest>,
    finish: Option<(FinishReason, TokenUsage)>,
    error: Option<String>,
}

struct AssistantOutcome {
    message: Message,
    usage: Option<TokenUsage>,
    failed: bool,
    error: Option<String>,
}

impl StreamOutcome {
    /// Fold the accumulated deltas into one assistant message.
    fn into_message(self) -> AssistantOutcome {
        let mut segments = Vec::new();
        if !self.reasoning.is_empty() {
            segments.push(ContentSegment::Reasoning {
                text: self.reasoning,
            });
        }
        if !self.text.is_empty() {
            segments.push(ContentSegment::Text { text: self.text });
        }
        for call in self.tool_calls {
            segments.push(ContentSegment::ToolCall { call });
        }

        AssistantOutcome {
            message: Message::new(Role::Assistant, segments),
            usage: self.finish.map(|(_, usage)| usage),
            failed: self.error.is_some(),
            error: self.error,
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Model-provider contract: streaming chat over typed events.
//!
//! Concrete vendor adapters live outside the core; the runtime only
//! needs the stream vocabulary below. Providers deliver events over an
//! mpsc receiver so the loop consumes them with plain `recv().await`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::id::ToolCallId;
use crate::message::Message;

/// Errors surfaced by providers
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum ProviderError {
    #[error("provider not found: {0}")]
    NotFound(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("request cancelled")]
    Cancelled,
}

/// A model offered by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    /// Context window in tokens
    pub context_window: u32,
    /// Maximum output tokens per response
    pub max_output: u32,
}

/// Token accounting reported at stream finish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Why the model stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Cancelled,
    Other,
}

/// Schema of one tool as shown to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One streaming chat request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolSchema>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub cancel: CancellationToken,
}

/// Events yielded by a provider stream.
///
/// Serializes with `{"type": "event_name", ...fields}` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    ToolCallStart {
        id: ToolCallId,
        name: String,
    },
    ToolCallDelta {
        id: ToolCallId,
        arguments_fragment: String,
    },
    ToolCallEnd {
        id: ToolCallId,
        name: String,
        #[serde(default)]
        arguments: Map<String, Value>,
    },
    Finish {
        reason: FinishReason,
        usage: TokenUsage,
    },
    Error {
        message: String,
    },
}

/// A language-model backend.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn models(&self) -> Vec<ModelInfo>;

    /// Start a streaming chat completion.
    ///
    /// The returned receiver yields events until `Finish` or `Error`;
    /// the provider must stop promptly when `request.cancel` fires.
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, ProviderError>;
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message and content-segment types for session transcripts.
//!
//! A transcript is an append-only sequence of [`Message`]s. Each message
//! carries one or more typed content segments: plain text, model
//! reasoning text, a tool-call request or a tool-call result. History is
//! never rewritten; corrections arrive as new messages.

use crate::id::{MessageId, ToolCallId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: ToolCallId,
    pub name: String,
    /// Argument mapping as produced by the model
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// One typed segment of a message body.
///
/// Serializes with `{"type": "segment_name", ...fields}` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentSegment {
    /// Plain assistant or user text
    Text { text: String },

    /// Model "reasoning" text, streamed separately from the reply
    Reasoning { text: String },

    /// Tool-call request emitted by the model
    ToolCall {
        #[serde(flatten)]
        call: ToolCallRequest,
    },

    /// Result of a tool call, replying to the originating call id
    ToolResult {
        call_id: ToolCallId,
        name: String,
        body: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// A single transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub segments: Vec<ContentSegment>,
}

impl Message {
    /// Create a message with a fresh UUID id and the current timestamp.
    pub fn new(role: Role, segments: Vec<ContentSegment>) -> Self {
        Self {
            id: MessageId::new(uuid::Uuid::new_v4().to_string()),
            role,
            created_at: Utc::now(),
            segments,
        }
    }

    /// Single-text-segment convenience constructor.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![ContentSegment::Text { text: text.into() }])
    }

    /// Tool-result message replying to `call_id`.
    pub fn tool_result(
        call_id: ToolCallId,
        name: impl Into<String>,
        body: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::new(
            Role::Tool,
            vec![ContentSegment::ToolResult {
                call_id,
                name: name.into(),
                body: body.into(),
                is_error,
            }],
        )
    }

    /// Concatenated text of all `Text` segments.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            if let ContentSegment::Text { text } = segment {
                out.push_str(text);
            }
        }
        out
    }

    /// Tool-call requests carried by this message, in order.
    pub fn tool_calls(&self) -> Vec<&ToolCallRequest> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                ContentSegment::ToolCall { call } => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;

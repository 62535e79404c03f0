// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending-input FIFO feeding the execution loop.
//!
//! Producers (daemon handlers, plugins) hold a cloneable [`InputSender`];
//! the single consumer is the engine task draining [`InputQueue`]. The
//! queue is unbounded in memory; rate limiting belongs to the transport.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::id::SessionId;

/// Accepted kinds of input. Anything else is rejected at the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    UserInput,
    SlashCommand,
}

impl InputType {
    /// Parse a wire name from the transport whitelist.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user_input" => Some(Self::UserInput),
            "slash_command" => Some(Self::SlashCommand),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserInput => "user_input",
            Self::SlashCommand => "slash_command",
        }
    }
}

/// One unit of work for the execution loop.
#[derive(Debug, Clone)]
pub struct InputEvent {
    pub data: String,
    pub session_id: Option<SessionId>,
    /// Correlation id echoed on every event this input produces
    pub reply_to: Option<String>,
    pub input_type: InputType,
    /// Cancelling aborts the turn at its next suspension point
    pub cancel: CancellationToken,
}

impl InputEvent {
    pub fn user(data: impl Into<String>, session_id: Option<SessionId>) -> Self {
        Self {
            data: data.into(),
            session_id,
            reply_to: None,
            input_type: InputType::UserInput,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// Producer half of the input FIFO.
#[derive(Clone)]
pub struct InputSender {
    tx: mpsc::UnboundedSender<InputEvent>,
}

impl InputSender {
    /// Enqueue an input. Returns false when the consumer is gone.
    pub fn push(&self, input: InputEvent) -> bool {
        self.tx.send(input).is_ok()
    }
}

/// Consumer half of the input FIFO.
pub struct InputQueue {
    rx: mpsc::UnboundedReceiver<InputEvent>,
}

impl InputQueue {
    /// Create a linked sender/queue pair.
    pub fn channel() -> (InputSender, InputQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (InputSender { tx }, InputQueue { rx })
    }

    /// Next pending input, or `None` when every sender has dropped.
    pub async fn pop(&mut self) -> Option<InputEvent> {
        self.rx.recv().await
    }

    /// Non-blocking variant used by drain paths.
    pub fn try_pop(&mut self) -> Option<InputEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
#[path = "input_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Context assembly: the bounded message prefix handed to the model.
//!
//! The window keeps every system message plus the tail starting at the
//! (count - max_turns)-th user message, so system prompts always survive
//! truncation while old conversation rounds fall away.

use crate::message::Message;

/// Assemble the model context from a transcript.
///
/// Returns all system messages in their original order, followed by the
/// tail window that starts at the (user_count - `max_turns`)-th user
/// message and runs to the end. When `max_turns <= 0` or the transcript
/// holds no more than `max_turns` user messages, the full non-system
/// sequence is returned unchanged (still preceded by the system
/// messages).
pub fn assemble_context(messages: &[Message], max_turns: i64) -> Vec<Message> {
    let mut out: Vec<Message> = messages.iter().filter(|m| m.is_system()).cloned().collect();

    let rest: Vec<&Message> = messages.iter().filter(|m| !m.is_system()).collect();

    if max_turns <= 0 {
        out.extend(rest.into_iter().cloned());
        return out;
    }

    let user_count = rest.iter().filter(|m| m.is_user()).count();
    if user_count <= max_turns as usize {
        out.extend(rest.into_iter().cloned());
        return out;
    }

    // Index (within the non-system sequence) of the first user message
    // inside the window.
    let skip_users = user_count - max_turns as usize;
    let mut seen_users = 0usize;
    let mut start = rest.len();
    for (i, message) in rest.iter().enumerate() {
        if message.is_user() {
            if seen_users == skip_users {
                start = i;
                break;
            }
            seen_users += 1;
        }
    }

    out.extend(rest[start..].iter().map(|m| (*m).clone()));
    out
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;

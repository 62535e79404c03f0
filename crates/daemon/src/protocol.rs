// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC protocol for daemon communication.
//!
//! Wire format: one JSON object per line, UTF-8, `\n` terminated.
//! Requests are `{id, method, params?}`; responses `{id, result}` or
//! `{id, error: {code, message, data?}}`; daemon-initiated
//! notifications `{event, data}`. Error codes follow JSON-RPC plus the
//! agent-specific extensions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum accepted line length (covers request envelope overhead).
pub const MAX_LINE_BYTES: usize = 256 * 1024;

/// Maximum accepted `agent.input` payload.
pub const MAX_INPUT_BYTES: usize = 100 * 1024;

/// JSON-RPC error codes plus agent-specific extensions.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const AGENT_NOT_FOUND: i64 = -32001;
    pub const AGENT_ALREADY_RUNNING: i64 = -32002;
}

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("line too long: {size} bytes (max {max})")]
    LineTooLong { size: usize, max: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
}

/// Request from client to daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Error half of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }
}

/// Response from daemon to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Unsolicited daemon-to-client notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event: String,
    pub data: Value,
}

impl Notification {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// The serialised wire line, newline included.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        line.push('\n');
        line
    }
}

/// What one received line parsed into.
#[derive(Debug)]
pub enum ParsedLine {
    Request(Request),
    /// Parse failure or malformed envelope, mapped to an error reply
    Invalid(Response),
}

/// Parse one wire line into a request, or the error response it earns.
///
/// Non-JSON earns `-32700`; JSON without a usable `id`/`method` earns
/// `-32600`.
pub fn parse_line(line: &str) -> ParsedLine {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            return ParsedLine::Invalid(Response::error(
                Value::Null,
                RpcError::new(codes::PARSE_ERROR, format!("parse error: {e}")),
            ));
        }
    };

    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let has_valid_id = matches!(&id, Value::String(_) | Value::Number(_));
    let method = value.get("method").and_then(Value::as_str);

    match (has_valid_id, method) {
        (true, Some(method)) => ParsedLine::Request(Request {
            id,
            method: method.to_string(),
            params: value.get("params").cloned(),
        }),
        _ => ParsedLine::Invalid(Response::error(
            id,
            RpcError::new(codes::INVALID_REQUEST, "missing id or method"),
        )),
    }
}

/// Session ids accepted on the wire: `^[A-Za-z0-9_-]{1,64}$`.
pub fn valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Serialise any wire value to its line (newline included).
pub fn encode_line<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon RPC client.
//!
//! Line-JSON over the agent's local socket. Requests have a 10 s
//! default deadline; notifications arriving while a response is
//! pending are buffered for later consumption.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::protocol::{codes, encode_line, Notification, ProtocolError, Request, RpcError};

/// Default request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DaemonClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: u64,
    timeout: Duration,
    buffered: VecDeque<Notification>,
}

impl DaemonClient {
    /// Connect to an agent endpoint.
    pub async fn connect(endpoint: &Path) -> Result<Self, ProtocolError> {
        let stream = UnixStream::connect(endpoint).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_id: 1,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            buffered: VecDeque::new(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Issue one request and await its response.
    ///
    /// Notifications received meanwhile are buffered, not lost.
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ProtocolError> {
        let id = self.next_id;
        self.next_id += 1;
        let request = Request::new(format!("c-{id}"), method, params);
        let line = encode_line(&request)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or(ProtocolError::Timeout)?;

            let mut line = String::new();
            let read = tokio::time::timeout(remaining, self.reader.read_line(&mut line))
                .await
                .map_err(|_| ProtocolError::Timeout)??;
            if read == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }

            let value: Value = match serde_json::from_str(line.trim()) {
                Ok(value) => value,
                Err(_) => continue,
            };

            if value.get("event").is_some() {
                if let Ok(notification) = serde_json::from_value::<Notification>(value) {
                    self.buffered.push_back(notification);
                }
                continue;
            }

            if value.get("id") == Some(&request.id) {
                if let Some(error) = value.get("error") {
                    let error: RpcError = serde_json::from_value(error.clone())
                        .unwrap_or_else(|_| RpcError::new(codes::INTERNAL_ERROR, "unknown error"));
                    return Err(ProtocolError::Rpc {
                        code: error.code,
                        message: error.message,
                    });
                }
                return Ok(value.get("result").cloned().unwrap_or(Value::Null));
            }
            // A response to someone else's id on our connection is
            // dropped.
        }
    }

    /// Next notification: buffered first, then read from the socket.
    pub async fn next_notification(
        &mut self,
        timeout: Duration,
    ) -> Result<Notification, ProtocolError> {
        if let Some(notification) = self.buffered.pop_front() {
            return Ok(notification);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or(ProtocolError::Timeout)?;

            let mut line = String::new();
            let read = tokio::time::timeout(remaining, self.reader.read_line(&mut line))
                .await
                .map_err(|_| ProtocolError::Timeout)??;
            if read == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }

            if let Ok(notification) = serde_json::from_str::<Notification>(line.trim()) {
                if !notification.event.is_empty() {
                    return Ok(notification);
                }
            }
        }
    }

    // -- convenience wrappers over the core methods --

    pub async fn ping(&mut self) -> Result<Value, ProtocolError> {
        self.request("agent.ping", None).await
    }

    pub async fn status(&mut self) -> Result<Value, ProtocolError> {
        self.request("agent.status", None).await
    }

    pub async fn stop(&mut self) -> Result<Value, ProtocolError> {
        self.request("agent.stop", None).await
    }

    pub async fn attach(&mut self, session_id: Option<&str>) -> Result<Value, ProtocolError> {
        let params = session_id.map(|id| json!({"sessionId": id}));
        self.request("agent.attach", params).await
    }

    pub async fn detach(&mut self, session_id: &str) -> Result<Value, ProtocolError> {
        self.request("agent.detach", Some(json!({"sessionId": session_id})))
            .await
    }

    pub async fn input(
        &mut self,
        session_id: Option<&str>,
        input_type: &str,
        data: &str,
    ) -> Result<Value, ProtocolError> {
        let mut params = json!({"type": input_type, "data": data});
        if let (Value::Object(map), Some(session_id)) = (&mut params, session_id) {
            map.insert("sessionId".to_string(), json!(session_id));
        }
        self.request("agent.input", Some(params)).await
    }
}

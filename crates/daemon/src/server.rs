// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC server: accept loop, per-connection tasks, method dispatch.
//!
//! Each connection gets a reader task (this function) and a writer task
//! draining the client's outbox. Responses and notifications share the
//! outbox so a client sees them in order. Connection teardown always
//! clears the subscription indices.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use starry_core::{InputEvent, InputType, SessionId};

use crate::protocol::{
    codes, parse_line, valid_session_id, Notification, ParsedLine, Request, Response, RpcError,
    MAX_INPUT_BYTES, MAX_LINE_BYTES,
};
use crate::service::DaemonService;
use crate::subscriptions::CLIENT_OUTBOX_DEPTH;

/// Run the accept loop until shutdown.
pub async fn serve(service: Arc<DaemonService>, listener: UnixListener) {
    info!("daemon listening");
    loop {
        tokio::select! {
            _ = service.shutdown.cancelled() => {
                info!("listener shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let service = Arc::clone(&service);
                        tokio::spawn(async move {
                            handle_connection(service, stream).await;
                        });
                    }
                    Err(e) => error!("accept error: {e}"),
                }
            }
        }
    }
}

/// Serve one client connection until it closes or is evicted.
async fn handle_connection(service: Arc<DaemonService>, stream: UnixStream) {
    let (read_half, write_half) = stream.into_split();
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<String>(CLIENT_OUTBOX_DEPTH);
    let disconnect = CancellationToken::new();
    let client_id = service
        .subscriptions
        .register(outbox_tx.clone(), disconnect.clone());
    debug!(client_id, "client connected");

    // Writer task: drains the outbox; reports drain for slow-client
    // timer cancellation.
    let writer_subs = Arc::clone(&service.subscriptions);
    let writer_disconnect = disconnect.clone();
    let writer = tokio::spawn(async move {
        let mut write_half = write_half;
        loop {
            let line = tokio::select! {
                _ = writer_disconnect.cancelled() => return,
                line = outbox_rx.recv() => match line {
                    Some(line) => line,
                    None => return,
                },
            };
            if write_half.write_all(line.as_bytes()).await.is_err() {
                writer_disconnect.cancel();
                return;
            }
            if outbox_rx.is_empty() {
                writer_subs.mark_drained(client_id);
            }
        }
    });

    let mut reader = BufReader::new(read_half);
    loop {
        let mut line = String::new();
        let read = tokio::select! {
            _ = disconnect.cancelled() => break,
            read = reader.read_line(&mut line) => read,
        };

        match read {
            Ok(0) => break,
            Ok(n) if n > MAX_LINE_BYTES => {
                let response = Response::error(
                    Value::Null,
                    RpcError::new(codes::INVALID_REQUEST, "line too long"),
                );
                send_response(&outbox_tx, &response).await;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let response = match parse_line(trimmed) {
                    ParsedLine::Invalid(response) => response,
                    ParsedLine::Request(request) => {
                        handle_request(&service, client_id, request).await
                    }
                };
                send_response(&outbox_tx, &response).await;
            }
            Err(e) => {
                debug!(client_id, error = %e, "read error");
                break;
            }
        }
    }

    // Teardown: drop the client from every index, stop the writer.
    disconnect.cancel();
    service.subscriptions.remove(client_id);
    let _ = writer.await;
    debug!(client_id, "client disconnected");
}

async fn send_response(outbox: &mpsc::Sender<String>, response: &Response) {
    match crate::protocol::encode_line(response) {
        Ok(line) => {
            let _ = outbox.send(line).await;
        }
        Err(e) => warn!(error = %e, "unserialisable response dropped"),
    }
}

/// Dispatch one request. Always returns a response.
pub async fn handle_request(
    service: &Arc<DaemonService>,
    client_id: u64,
    request: Request,
) -> Response {
    let id = request.id.clone();
    let params = request.params.unwrap_or(Value::Null);

    match request.method.as_str() {
        "agent.ping" => Response::ok(
            id,
            json!({
                "ok": true,
                "agentId": service.agent_id(),
                "agentVersion": service.agent_version(),
                "uptimeSecs": service.uptime_secs(),
            }),
        ),

        "agent.status" => Response::ok(
            id,
            json!({
                "agentId": service.agent_id(),
                "agentName": service.agent_name(),
                "agentVersion": service.agent_version(),
                "uptimeSecs": service.uptime_secs(),
                "sessions": service.sessions.len(),
                "clients": service.subscriptions.client_count(),
                "pid": std::process::id(),
            }),
        ),

        "agent.stop" => {
            info!("stop requested over rpc");
            service.shutdown.cancel();
            Response::ok(id, json!({"stopping": true}))
        }

        "agent.attach" => handle_attach(service, client_id, id, &params).await,

        "agent.detach" => {
            let Some(session_id) = params.get("sessionId").and_then(Value::as_str) else {
                return Response::error(id, RpcError::invalid_params("sessionId is required"));
            };
            service
                .subscriptions
                .unsubscribe(client_id, &SessionId::new(session_id));
            Response::ok(id, json!({"ok": true}))
        }

        "agent.input" => handle_input(service, id, &params),

        "agent.list-clients" => {
            let clients: Vec<Value> = service
                .subscriptions
                .list_clients()
                .into_iter()
                .map(|(client, sessions)| {
                    json!({
                        "clientId": client,
                        "sessions": sessions.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                    })
                })
                .collect();
            Response::ok(id, json!(clients))
        }

        "daemon.health" => Response::ok(
            id,
            json!({
                "ok": true,
                "uptimeSecs": service.uptime_secs(),
                "sessions": service.sessions.len(),
            }),
        ),

        method => Response::error(
            id,
            RpcError::new(codes::METHOD_NOT_FOUND, format!("unknown method: {method}")),
        ),
    }
}

/// Create-or-bind a session, subscribe the client, replay the tail.
async fn handle_attach(
    service: &Arc<DaemonService>,
    client_id: u64,
    id: Value,
    params: &Value,
) -> Response {
    let requested = params.get("sessionId").and_then(Value::as_str);
    if let Some(session_id) = requested {
        if !valid_session_id(session_id) {
            return Response::error(id, RpcError::invalid_params("invalid session id"));
        }
    }

    let (session, is_new) = match requested {
        Some(session_id) => {
            service
                .sessions
                .create_with_id(SessionId::new(session_id), serde_json::Map::new())
                .await
        }
        None => (
            service.sessions.create(serde_json::Map::new()).await,
            true,
        ),
    };

    service.subscriptions.subscribe(client_id, session.id.clone());

    // Replay the transcript tail before live events resume.
    let replay: Vec<starry_core::Message> = {
        let store = service.sessions.state_store(Some(&session.id));
        let store = store.lock();
        let messages = store.messages();
        let start = messages.len().saturating_sub(service.replay_limit());
        messages[start..].to_vec()
    };
    for message in replay {
        let notification = Notification::new(
            "agent.replay",
            json!({
                "sessionId": session.id.as_str(),
                "message": message,
            }),
        );
        service
            .subscriptions
            .send_to(client_id, notification.to_line());
    }

    Response::ok(
        id,
        json!({
            "sessionId": session.id.as_str(),
            "isNew": is_new,
            "agentId": service.agent_id(),
            "agentName": service.agent_name(),
            "agentVersion": service.agent_version(),
        }),
    )
}

/// Validate and enqueue one input event.
fn handle_input(service: &Arc<DaemonService>, id: Value, params: &Value) -> Response {
    let Some(input_type) = params.get("type").and_then(Value::as_str) else {
        return Response::error(id, RpcError::invalid_params("type is required"));
    };
    let Some(input_type) = InputType::parse(input_type) else {
        return Response::error(id, RpcError::invalid_params("unsupported input type"));
    };

    let Some(data) = params.get("data").and_then(Value::as_str) else {
        return Response::error(id, RpcError::invalid_params("data is required"));
    };
    if data.len() > MAX_INPUT_BYTES {
        return Response::error(id, RpcError::invalid_params("payload too large"));
    }

    let session_id = match params.get("sessionId").and_then(Value::as_str) {
        Some(session_id) if !valid_session_id(session_id) => {
            return Response::error(id, RpcError::invalid_params("invalid session id"));
        }
        Some(session_id) => Some(SessionId::new(session_id)),
        None => None,
    };

    let mut input = InputEvent {
        data: data.to_string(),
        session_id,
        reply_to: None,
        input_type,
        cancel: tokio_util::sync::CancellationToken::new(),
    };
    if let Some(reply_to) = params.get("replyTo").and_then(Value::as_str) {
        input.reply_to = Some(reply_to.to_string());
    }

    if service.input.push(input) {
        Response::ok(id, json!({"queued": true}))
    } else {
        Response::error(
            id,
            RpcError::new(codes::INTERNAL_ERROR, "input queue is closed"),
        )
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;

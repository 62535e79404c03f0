// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker-side runtime.
//!
//! Speaks the line-JSON protocol over stdio, emits heartbeats, enforces
//! the module policy, and hosts one plugin at a time. Plugin code is
//! linked in through the [`GuestPlugin`] factory table; the runtime
//! itself never loads code dynamically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use starry_core::{BusEvent, RequestId};

use crate::policy::ModulePolicy;
use crate::protocol::{
    decode_frame, encode_frame, HookCatalog, HostMessage, WireToolContext, WorkerInitContext,
    WorkerMessage, WorkerRpc,
};

/// Default heartbeat cadence.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Module-load gate handed to plugin code.
///
/// A refused load notifies the host (`MODULE_BLOCKED`) and errors in
/// the worker.
#[derive(Clone)]
pub struct ModuleGate {
    policy: Arc<ModulePolicy>,
    outbound: mpsc::Sender<WorkerMessage>,
}

impl ModuleGate {
    pub async fn require(&self, module: &str) -> Result<(), String> {
        if self.policy.permits(module) {
            return Ok(());
        }
        let _ = self
            .outbound
            .send(WorkerMessage::ModuleBlocked {
                module: module.to_string(),
            })
            .await;
        Err(format!("module blocked by sandbox policy: {module}"))
    }
}

/// Handle plugins use to call back into the host.
#[derive(Clone)]
pub struct GuestHostHandle {
    outbound: mpsc::Sender<WorkerMessage>,
    pending: Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, String>>>>>,
}

impl GuestHostHandle {
    /// Issue one RPC against the host and await its response.
    pub async fn call(&self, request: WorkerRpc) -> Result<Value, String> {
        let request_id = RequestId::new(uuid::Uuid::new_v4().to_string());
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        self.outbound
            .send(WorkerMessage::HostRequest {
                request_id: request_id.clone(),
                request,
            })
            .await
            .map_err(|_| "host connection closed".to_string())?;

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err("host connection closed".to_string()),
        }
    }

    fn resolve(&self, request_id: &RequestId, outcome: Result<Value, String>) {
        if let Some(waiter) = self.pending.lock().remove(request_id) {
            let _ = waiter.send(outcome);
        }
    }
}

/// Context a plugin receives at init.
#[derive(Clone)]
pub struct GuestContext {
    pub plugin_name: String,
    pub init: WorkerInitContext,
    pub modules: ModuleGate,
    pub host: GuestHostHandle,
}

/// A plugin as seen from inside the worker.
#[async_trait]
pub trait GuestPlugin: Send + Sync {
    async fn init(&self, context: &GuestContext) -> Result<HookCatalog, String>;

    async fn invoke_tool(
        &self,
        tool_id: &str,
        input: Value,
        context: WireToolContext,
    ) -> Result<String, String>;

    /// Bus event delivered for a subscribed type.
    async fn on_event(&self, _event: BusEvent) {}

    /// Clear state before returning to the pool.
    async fn reset(&self) {}
}

type GuestFactory = Arc<dyn Fn() -> Arc<dyn GuestPlugin> + Send + Sync>;

/// The worker's protocol loop.
pub struct WorkerRuntime {
    factories: HashMap<String, GuestFactory>,
    heartbeat_interval: Duration,
}

impl WorkerRuntime {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Register a statically linked plugin under its manifest name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn GuestPlugin> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Run the protocol loop until the host closes the pipe.
    pub async fn run<R, W>(self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<WorkerMessage>(64);

        // Writer task: frames → host.
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(frame) = outbound_rx.recv().await {
                let line = match encode_frame(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "unserialisable worker frame dropped");
                        continue;
                    }
                };
                if writer.write_all(line.as_bytes()).await.is_err() {
                    return;
                }
                if writer.flush().await.is_err() {
                    return;
                }
            }
        });

        // Heartbeat task.
        let heartbeat_tx = outbound_tx.clone();
        let heartbeat_interval = self.heartbeat_interval;
        let heartbeat_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if heartbeat_tx.send(WorkerMessage::Heartbeat).await.is_err() {
                    return;
                }
            }
        });

        let host = GuestHostHandle {
            outbound: outbound_tx.clone(),
            pending: Arc::new(Mutex::new(HashMap::new())),
        };

        let mut active: Option<(Arc<dyn GuestPlugin>, GuestContext)> = None;
        let mut lines = BufReader::new(reader).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let Some(frame) = decode_frame::<HostMessage>(&line) else {
                continue;
            };

            match frame {
                HostMessage::InitPlugin {
                    plugin_name,
                    context,
                    ..
                } => {
                    let Some(factory) = self.factories.get(&plugin_name) else {
                        let _ = outbound_tx
                            .send(WorkerMessage::InitError {
                                message: format!("no such plugin: {plugin_name}"),
                            })
                            .await;
                        continue;
                    };

                    let plugin = factory();
                    let guest_context = GuestContext {
                        plugin_name: plugin_name.clone(),
                        modules: ModuleGate {
                            policy: Arc::new(ModulePolicy::new(
                                context.module_allow.clone(),
                                context.module_deny.clone(),
                            )),
                            outbound: outbound_tx.clone(),
                        },
                        host: host.clone(),
                        init: context,
                    };

                    let reply = match plugin.init(&guest_context).await {
                        Ok(hooks) => {
                            active = Some((plugin, guest_context));
                            WorkerMessage::InitComplete { hooks }
                        }
                        Err(message) => WorkerMessage::InitError { message },
                    };
                    if outbound_tx.send(reply).await.is_err() {
                        break;
                    }
                }

                HostMessage::InvokeTool {
                    request_id,
                    tool_id,
                    input,
                    context,
                } => {
                    let Some((plugin, _)) = &active else {
                        let _ = outbound_tx
                            .send(WorkerMessage::ToolResult {
                                request_id,
                                result: None,
                                error: Some("no plugin initialised".to_string()),
                            })
                            .await;
                        continue;
                    };

                    // Tools run concurrently; the read loop keeps going.
                    let plugin = Arc::clone(plugin);
                    let reply_tx = outbound_tx.clone();
                    tokio::spawn(async move {
                        let reply = match plugin.invoke_tool(&tool_id, input, context).await {
                            Ok(result) => WorkerMessage::ToolResult {
                                request_id,
                                result: Some(result),
                                error: None,
                            },
                            Err(error) => WorkerMessage::ToolResult {
                                request_id,
                                result: None,
                                error: Some(error),
                            },
                        };
                        let _ = reply_tx.send(reply).await;
                    });
                }

                HostMessage::Reset => {
                    if let Some((plugin, _)) = active.take() {
                        plugin.reset().await;
                    }
                    if outbound_tx.send(WorkerMessage::ResetComplete).await.is_err() {
                        break;
                    }
                }

                HostMessage::HostResponse {
                    request_id,
                    result,
                    error,
                } => {
                    let outcome = match error {
                        Some(error) => Err(error),
                        None => Ok(result.unwrap_or(Value::Null)),
                    };
                    host.resolve(&request_id, outcome);
                }

                HostMessage::Event { event } => {
                    if let Some((plugin, _)) = &active {
                        let plugin = Arc::clone(plugin);
                        tokio::spawn(async move {
                            plugin.on_event(event).await;
                        });
                    }
                }
            }
        }

        debug!("host pipe closed, worker runtime exiting");
        heartbeat_task.abort();
        // Every sender clone must go or the writer never sees EOF.
        drop(active);
        drop(host);
        drop(outbound_tx);
        let _ = writer_task.await;
    }
}

impl Default for WorkerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;

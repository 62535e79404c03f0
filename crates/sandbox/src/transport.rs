// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker transport: how the host reaches a worker process.
//!
//! The host only sees channel pairs, so tests substitute an in-process
//! fake for the real child process. The production spawner runs the
//! `starry-worker` binary with piped stdio and kills it when the
//! channel's cancellation token fires.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use starry_core::SandboxSettings;

use crate::error::SandboxError;
use crate::protocol::{decode_frame, encode_frame, HostMessage, WorkerMessage};

/// Channel pair bound to one live worker.
///
/// `inbound` closing means the worker is gone (exit, crash or kill).
pub struct WorkerChannels {
    pub outbound: mpsc::Sender<HostMessage>,
    pub inbound: mpsc::UnboundedReceiver<WorkerMessage>,
    /// Cancel to terminate the worker
    pub kill: CancellationToken,
}

/// Spawns workers. One implementation per transport.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, settings: &SandboxSettings) -> Result<WorkerChannels, SandboxError>;
}

/// Production spawner: runs the worker binary as a child process.
pub struct ProcessSpawner {
    program: PathBuf,
}

impl ProcessSpawner {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// Locate `starry-worker` next to the current executable.
    pub fn sibling_worker() -> Result<Self, SandboxError> {
        let exe = std::env::current_exe().map_err(|e| SandboxError::Spawn(e.to_string()))?;
        let dir = exe
            .parent()
            .ok_or_else(|| SandboxError::Spawn("executable has no parent dir".to_string()))?;
        Ok(Self::new(dir.join("starry-worker")))
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self, settings: &SandboxSettings) -> Result<WorkerChannels, SandboxError> {
        let mut child = Command::new(&self.program)
            .arg("--memory-limit-mb")
            .arg(settings.memory_limit_mb.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Spawn("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Spawn("worker stdout unavailable".to_string()))?;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<HostMessage>(64);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<WorkerMessage>();
        let kill = CancellationToken::new();

        // Writer: host frames → child stdin.
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(frame) = outbound_rx.recv().await {
                let line = match encode_frame(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "unserialisable host frame dropped");
                        continue;
                    }
                };
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        // Reader: child stdout lines → worker frames.
        let reader_tx = inbound_tx;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(frame) = decode_frame::<WorkerMessage>(&line) {
                    if reader_tx.send(frame).is_err() {
                        break;
                    }
                }
            }
            // Dropping reader_tx closes `inbound`, signalling exit.
        });

        // Supervisor: owns the child, kills it when asked.
        let kill_watch = kill.clone();
        tokio::spawn(async move {
            let kill_requested = tokio::select! {
                _ = kill_watch.cancelled() => true,
                status = child.wait() => {
                    debug!(status = ?status, "worker process exited");
                    false
                }
            };
            if kill_requested {
                debug!("killing worker process");
                let _ = child.kill().await;
            }
        });

        Ok(WorkerChannels {
            outbound: outbound_tx,
            inbound: inbound_rx,
            kill,
        })
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    //! Scripted in-process worker for host tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::Value;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use starry_core::SandboxSettings;

    use super::{WorkerChannels, WorkerSpawner};
    use crate::error::SandboxError;
    use crate::protocol::{HookCatalog, HostMessage, WorkerMessage};

    type ToolHandler = Arc<dyn Fn(&str, &Value) -> Result<String, String> + Send + Sync>;

    /// How one scripted worker instance behaves.
    #[derive(Clone)]
    pub struct FakeWorkerBehavior {
        pub hooks: HookCatalog,
        /// Close the channel instead of answering INIT_PLUGIN
        pub crash_on_init: bool,
        /// Crash when the n-th INVOKE_TOOL arrives (1-based)
        pub crash_on_tool_call: Option<usize>,
        /// Never answer INVOKE_TOOL (exercises the RPC timeout)
        pub ignore_tool_calls: bool,
        /// Never answer RESET (exercises the reset deadline)
        pub ignore_reset: bool,
        /// Frames pushed right after INIT_COMPLETE
        pub emit_after_init: Vec<WorkerMessage>,
        pub tool_handler: ToolHandler,
    }

    impl Default for FakeWorkerBehavior {
        fn default() -> Self {
            Self {
                hooks: HookCatalog::default(),
                crash_on_init: false,
                crash_on_tool_call: None,
                ignore_tool_calls: false,
                ignore_reset: false,
                emit_after_init: Vec::new(),
                tool_handler: Arc::new(|tool, input| {
                    Ok(format!("{tool}:{input}"))
                }),
            }
        }
    }

    /// Spawner producing scripted workers; records everything the host
    /// sends for later assertions.
    pub struct FakeSpawner {
        script: Mutex<Vec<FakeWorkerBehavior>>,
        fallback: FakeWorkerBehavior,
        spawned: AtomicUsize,
        received: Arc<Mutex<Vec<HostMessage>>>,
    }

    impl FakeSpawner {
        /// Every spawn uses `behavior`.
        pub fn uniform(behavior: FakeWorkerBehavior) -> Self {
            Self {
                script: Mutex::new(Vec::new()),
                fallback: behavior,
                spawned: AtomicUsize::new(0),
                received: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Consume `script` per spawn in order, then fall back.
        pub fn scripted(script: Vec<FakeWorkerBehavior>, fallback: FakeWorkerBehavior) -> Self {
            Self {
                script: Mutex::new(script),
                fallback,
                spawned: AtomicUsize::new(0),
                received: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn spawn_count(&self) -> usize {
            self.spawned.load(Ordering::SeqCst)
        }

        /// All frames workers received from the host, across spawns.
        pub fn received(&self) -> Vec<HostMessage> {
            self.received.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl WorkerSpawner for FakeSpawner {
        async fn spawn(&self, _settings: &SandboxSettings) -> Result<WorkerChannels, SandboxError> {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            let behavior = {
                let mut script = self.script.lock();
                if script.is_empty() {
                    self.fallback.clone()
                } else {
                    script.remove(0)
                }
            };

            let (outbound_tx, mut outbound_rx) = mpsc::channel::<HostMessage>(64);
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<WorkerMessage>();
            let kill = CancellationToken::new();

            let received = Arc::clone(&self.received);
            let kill_watch = kill.clone();
            tokio::spawn(async move {
                let mut tool_calls = 0usize;
                loop {
                    let frame = tokio::select! {
                        _ = kill_watch.cancelled() => break,
                        frame = outbound_rx.recv() => match frame {
                            Some(frame) => frame,
                            None => break,
                        },
                    };
                    received.lock().push(frame.clone());

                    match frame {
                        HostMessage::InitPlugin { .. } => {
                            if behavior.crash_on_init {
                                break;
                            }
                            if inbound_tx
                                .send(WorkerMessage::InitComplete {
                                    hooks: behavior.hooks.clone(),
                                })
                                .is_err()
                            {
                                break;
                            }
                            for extra in &behavior.emit_after_init {
                                let _ = inbound_tx.send(extra.clone());
                            }
                        }
                        HostMessage::InvokeTool {
                            request_id,
                            tool_id,
                            input,
                            ..
                        } => {
                            tool_calls += 1;
                            if behavior.crash_on_tool_call == Some(tool_calls) {
                                break;
                            }
                            if behavior.ignore_tool_calls {
                                continue;
                            }
                            let reply = match (behavior.tool_handler)(&tool_id, &input) {
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
                            if inbound_tx.send(reply).is_err() {
                                break;
                            }
                        }
                        HostMessage::Reset => {
                            if behavior.ignore_reset {
                                continue;
                            }
                            if inbound_tx.send(WorkerMessage::ResetComplete).is_err() {
                                break;
                            }
                        }
                        HostMessage::HostResponse { .. } | HostMessage::Event { .. } => {}
                    }
                }
                // Dropping inbound_tx signals worker exit.
            });

            Ok(WorkerChannels {
                outbound: outbound_tx,
                inbound: inbound_rx,
                kill,
            })
        }
    }
}

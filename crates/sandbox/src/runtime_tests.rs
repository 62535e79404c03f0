// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::protocol::ToolDescriptor;
use serde_json::json;
use starry_core::CapabilityDeclarations;
use std::path::PathBuf;
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

struct TestPlugin;

#[async_trait]
impl GuestPlugin for TestPlugin {
    async fn init(&self, context: &GuestContext) -> Result<HookCatalog, String> {
        // A denied module fails init.
        context.modules.require("allowed-module").await?;
        Ok(HookCatalog {
            tools: vec![ToolDescriptor {
                id: "upper".to_string(),
                description: "uppercases".to_string(),
                schema: json!({"type": "object"}),
            }],
            ..HookCatalog::default()
        })
    }

    async fn invoke_tool(
        &self,
        tool_id: &str,
        input: Value,
        _context: WireToolContext,
    ) -> Result<String, String> {
        match tool_id {
            "upper" => Ok(input["text"].as_str().unwrap_or_default().to_uppercase()),
            other => Err(format!("unknown tool: {other}")),
        }
    }
}

struct BlockedPlugin;

#[async_trait]
impl GuestPlugin for BlockedPlugin {
    async fn init(&self, context: &GuestContext) -> Result<HookCatalog, String> {
        context.modules.require("native/ffi").await?;
        Ok(HookCatalog::default())
    }

    async fn invoke_tool(
        &self,
        _tool_id: &str,
        _input: Value,
        _context: WireToolContext,
    ) -> Result<String, String> {
        Err("unused".to_string())
    }
}

struct Harness {
    to_worker: DuplexStream,
    from_worker: BufReader<DuplexStream>,
}

impl Harness {
    fn start(runtime: WorkerRuntime) -> Self {
        let (host_write, worker_read) = duplex(64 * 1024);
        let (worker_write, host_read) = duplex(64 * 1024);
        tokio::spawn(async move {
            runtime.run(worker_read, worker_write).await;
        });
        Self {
            to_worker: host_write,
            from_worker: BufReader::new(host_read),
        }
    }

    async fn send(&mut self, frame: &HostMessage) {
        let line = encode_frame(frame).unwrap();
        self.to_worker.write_all(line.as_bytes()).await.unwrap();
        self.to_worker.flush().await.unwrap();
    }

    async fn send_raw(&mut self, line: &str) {
        self.to_worker.write_all(line.as_bytes()).await.unwrap();
        self.to_worker.write_all(b"\n").await.unwrap();
        self.to_worker.flush().await.unwrap();
    }

    /// Next non-heartbeat frame.
    async fn recv(&mut self) -> WorkerMessage {
        loop {
            let mut line = String::new();
            let n = self.from_worker.read_line(&mut line).await.unwrap();
            assert!(n > 0, "worker pipe closed unexpectedly");
            if let Some(frame) = decode_frame::<WorkerMessage>(&line) {
                if !matches!(frame, WorkerMessage::Heartbeat) {
                    return frame;
                }
            }
        }
    }
}

fn init_frame(plugin_name: &str, deny: Vec<String>) -> HostMessage {
    HostMessage::InitPlugin {
        plugin_path: PathBuf::from("/plugins/test"),
        plugin_name: plugin_name.to_string(),
        context: WorkerInitContext {
            working_dir: PathBuf::from("/work"),
            agent_id: "agent".to_string(),
            plugin_config: Value::Null,
            capabilities: CapabilityDeclarations::default(),
            module_allow: vec![],
            module_deny: deny,
        },
    }
}

fn runtime_with_test_plugin() -> WorkerRuntime {
    let mut runtime = WorkerRuntime::new().with_heartbeat_interval(Duration::from_secs(3600));
    runtime.register("test", || Arc::new(TestPlugin));
    runtime.register("blocked", || Arc::new(BlockedPlugin));
    runtime
}

#[tokio::test]
async fn init_unknown_plugin_errors() {
    let mut harness = Harness::start(runtime_with_test_plugin());
    harness.send(&init_frame("ghost", vec![])).await;

    match harness.recv().await {
        WorkerMessage::InitError { message } => assert!(message.contains("ghost")),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn init_and_invoke_round_trip() {
    let mut harness = Harness::start(runtime_with_test_plugin());
    harness.send(&init_frame("test", vec![])).await;

    match harness.recv().await {
        WorkerMessage::InitComplete { hooks } => {
            assert_eq!(hooks.tools[0].id, "upper");
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    harness
        .send(&HostMessage::InvokeTool {
            request_id: RequestId::new("r-1"),
            tool_id: "upper".to_string(),
            input: json!({"text": "hi"}),
            context: WireToolContext {
                working_dir: PathBuf::from("/work"),
                allowed_paths: vec![],
            },
        })
        .await;

    match harness.recv().await {
        WorkerMessage::ToolResult {
            request_id,
            result,
            error,
        } => {
            assert_eq!(request_id, RequestId::new("r-1"));
            assert_eq!(result.as_deref(), Some("HI"));
            assert!(error.is_none());
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn unknown_tool_returns_error_result() {
    let mut harness = Harness::start(runtime_with_test_plugin());
    harness.send(&init_frame("test", vec![])).await;
    harness.recv().await; // INIT_COMPLETE

    harness
        .send(&HostMessage::InvokeTool {
            request_id: RequestId::new("r-2"),
            tool_id: "nope".to_string(),
            input: Value::Null,
            context: WireToolContext {
                working_dir: PathBuf::from("/"),
                allowed_paths: vec![],
            },
        })
        .await;

    match harness.recv().await {
        WorkerMessage::ToolResult { error, .. } => {
            assert!(error.unwrap().contains("unknown tool"));
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn invoke_before_init_errors() {
    let mut harness = Harness::start(runtime_with_test_plugin());
    harness
        .send(&HostMessage::InvokeTool {
            request_id: RequestId::new("r-0"),
            tool_id: "upper".to_string(),
            input: Value::Null,
            context: WireToolContext {
                working_dir: PathBuf::from("/"),
                allowed_paths: vec![],
            },
        })
        .await;

    match harness.recv().await {
        WorkerMessage::ToolResult { error, .. } => {
            assert!(error.unwrap().contains("no plugin initialised"));
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn blocked_module_notifies_host_and_fails_init() {
    let mut harness = Harness::start(runtime_with_test_plugin());
    harness
        .send(&init_frame("blocked", vec!["native/*".to_string()]))
        .await;

    match harness.recv().await {
        WorkerMessage::ModuleBlocked { module } => assert_eq!(module, "native/ffi"),
        other => panic!("unexpected frame: {other:?}"),
    }
    match harness.recv().await {
        WorkerMessage::InitError { message } => assert!(message.contains("blocked")),
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn reset_clears_plugin_and_confirms() {
    let mut harness = Harness::start(runtime_with_test_plugin());
    harness.send(&init_frame("test", vec![])).await;
    harness.recv().await; // INIT_COMPLETE

    harness.send(&HostMessage::Reset).await;
    match harness.recv().await {
        WorkerMessage::ResetComplete => {}
        other => panic!("unexpected frame: {other:?}"),
    }

    // After reset the plugin is gone.
    harness
        .send(&HostMessage::InvokeTool {
            request_id: RequestId::new("r-3"),
            tool_id: "upper".to_string(),
            input: Value::Null,
            context: WireToolContext {
                working_dir: PathBuf::from("/"),
                allowed_paths: vec![],
            },
        })
        .await;
    match harness.recv().await {
        WorkerMessage::ToolResult { error, .. } => {
            assert!(error.unwrap().contains("no plugin initialised"));
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn junk_lines_are_ignored() {
    let mut harness = Harness::start(runtime_with_test_plugin());
    harness.send_raw("not json at all").await;
    harness.send_raw("{\"no\": \"type\"}").await;
    harness.send(&init_frame("test", vec![])).await;

    // Still responds to the valid frame.
    match harness.recv().await {
        WorkerMessage::InitComplete { .. } => {}
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn heartbeats_flow() {
    let runtime = WorkerRuntime::new().with_heartbeat_interval(Duration::from_millis(10));
    let mut harness = Harness::start(runtime);

    let mut line = String::new();
    harness.from_worker.read_line(&mut line).await.unwrap();
    assert_eq!(
        decode_frame::<WorkerMessage>(&line),
        Some(WorkerMessage::Heartbeat)
    );
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: sandbox worker crash, restart with backoff, exhaustion.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use starry_core::test_support::EventRecorder;
use starry_core::{
    names, CapabilityDeclarations, EventBus, InputQueue, PluginManifest, Registries,
    RestartPolicyConfig, SandboxSettings, SessionManager,
};
use starry_sandbox::{
    FakeSpawner, FakeWorkerBehavior, HostContext, SandboxError, SandboxHost, SandboxHostConfig,
    WireToolContext, WorkerInitContext,
};

use crate::prelude::wait_until;

fn host_context(bus: &EventBus) -> HostContext {
    let (input, queue) = InputQueue::channel();
    std::mem::forget(queue);
    HostContext {
        bus: bus.clone(),
        input,
        sessions: Arc::new(SessionManager::new(bus.clone())),
        registries: Arc::new(Registries::new()),
    }
}

fn manifest(max_restarts: u32) -> PluginManifest {
    let mut manifest = PluginManifest::new("X", "1.0.0");
    manifest.sandbox = Some(SandboxSettings {
        enabled: true,
        restart: RestartPolicyConfig {
            max_restarts,
            backoff_ms: 10,
            max_backoff_ms: 100,
            reset_window_ms: 60_000,
        },
        ..SandboxSettings::default()
    });
    manifest
}

fn init_context() -> WorkerInitContext {
    WorkerInitContext {
        working_dir: PathBuf::from("/work"),
        agent_id: "spec-agent".to_string(),
        plugin_config: Value::Null,
        capabilities: CapabilityDeclarations::default(),
        module_allow: vec![],
        module_deny: vec![],
    }
}

fn tool_context() -> WireToolContext {
    WireToolContext {
        working_dir: PathBuf::from("/work"),
        allowed_paths: vec![],
    }
}

#[tokio::test]
async fn crashes_restart_then_exhaust_and_fail_fast() {
    let bus = EventBus::new();
    let recorder = EventRecorder::attach(&bus);
    // Every worker instance crashes on its first tool call.
    let spawner = Arc::new(FakeSpawner::uniform(FakeWorkerBehavior {
        crash_on_tool_call: Some(1),
        ..FakeWorkerBehavior::default()
    }));
    let host = SandboxHost::new(
        SandboxHostConfig {
            pool_size: 1,
            rpc_timeout: Duration::from_millis(500),
            ..SandboxHostConfig::default()
        },
        spawner.clone(),
        host_context(&bus),
    );

    host.load_plugin(PathBuf::from("/plugins/X"), &manifest(2), init_context())
        .await
        .unwrap();

    // Crash 1 and 2: the policy restarts the worker each time.
    let restart_count = |recorder: &EventRecorder| {
        recorder
            .types()
            .iter()
            .filter(|t| t.as_str() == names::SANDBOX_WORKER_RESTARTED)
            .count()
    };
    for crash in 0..2usize {
        let result = host.invoke_tool("X", "t", json!({}), tool_context()).await;
        assert!(matches!(result, Err(SandboxError::WorkerGone)));
        wait_until(|| restart_count(&recorder) > crash, "worker restart").await;
    }

    // Crash 3 within the window: the budget is spent.
    let result = host.invoke_tool("X", "t", json!({}), tool_context()).await;
    assert!(matches!(result, Err(SandboxError::WorkerGone)));
    wait_until(
        || {
            recorder
                .types()
                .contains(&names::SANDBOX_WORKER_RESTART_EXHAUSTED.to_string())
        },
        "restart exhaustion",
    )
    .await;

    // Subsequent invocations reject without touching a worker.
    let spawns_before = spawner.spawn_count();
    let result = host.invoke_tool("X", "t", json!({}), tool_context()).await;
    assert!(matches!(result, Err(SandboxError::RestartsExhausted(_))));
    assert_eq!(spawner.spawn_count(), spawns_before);
}

#[tokio::test]
async fn integrity_failure_blocks_load() {
    let bus = EventBus::new();
    let recorder = EventRecorder::attach(&bus);
    let spawner = Arc::new(FakeSpawner::uniform(FakeWorkerBehavior::default()));
    let host = SandboxHost::new(
        SandboxHostConfig::default(),
        spawner.clone(),
        host_context(&bus),
    );

    let dir = tempfile::tempdir().unwrap();
    let plugin_path = dir.path().join("plugin.bin");
    std::fs::write(&plugin_path, b"actual contents").unwrap();

    let mut bad = manifest(2);
    bad.integrity = Some(starry_core::IntegrityDescriptor::LegacyHash(
        "ff".repeat(64),
    ));

    let result = host.load_plugin(plugin_path, &bad, init_context()).await;
    assert!(matches!(result, Err(SandboxError::Integrity { .. })));

    wait_until(
        || {
            recorder
                .types()
                .contains(&names::SANDBOX_SIGNATURE_FAILED.to_string())
        },
        "signature failure event",
    )
    .await;

    // The failed load never consumed the pool beyond pre-spawn.
    assert!(!host.is_loaded("X"));
}

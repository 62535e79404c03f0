// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for the behavioural specs.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use starry_core::test_support::{
    EventRecorder, FailingTool, FallbackBehavior, ScriptedProvider, StaticTool,
};
use starry_core::{AgentConfig, Provider, Tool};
use starry_daemon::service::{DaemonService, ServiceOptions};
use starry_engine::{FactoryFuture, PluginDescriptor, PluginFactory, PluginHooks};

pub struct SpecRig {
    pub service: Arc<DaemonService>,
    pub provider: Arc<ScriptedProvider>,
    pub recorder: EventRecorder,
    // Kept alive for the test duration
    pub dir: tempfile::TempDir,
}

pub fn spec_config() -> AgentConfig {
    AgentConfig::parse(
        r#"
        [agent]
        id = "spec-agent"
        name = "Spec Agent"

        [model]
        provider = "mock"
        model = "m-1"

        [daemon]
        replay_limit = 10
        "#,
    )
    .unwrap()
}

/// Plugin descriptor wiring the scripted provider plus the standard
/// test tools (`echo` succeeds, `bad` always rejects).
pub fn builtin_plugin(provider: Arc<ScriptedProvider>) -> PluginDescriptor {
    let factory: PluginFactory = Arc::new(move |_ctx| {
        let provider = Arc::clone(&provider);
        Box::pin(async move {
            Ok(PluginHooks {
                providers: vec![provider as Arc<dyn Provider>],
                tools: vec![
                    StaticTool::new("echo", "hi") as Arc<dyn Tool>,
                    FailingTool::new("bad", "always broken") as Arc<dyn Tool>,
                ],
                ..PluginHooks::default()
            })
        }) as FactoryFuture
    });
    PluginDescriptor {
        manifest: starry_core::PluginManifest::new("builtin", "1.0.0"),
        path: std::path::PathBuf::from("/builtin"),
        config: Value::Null,
        factory: Some(factory),
    }
}

/// Build the assembled service with an echoing scripted provider.
pub async fn rig() -> SpecRig {
    rig_with(FallbackBehavior::Echo).await
}

pub async fn rig_with(fallback: FallbackBehavior) -> SpecRig {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new("mock", fallback));
    let mut options = ServiceOptions::new(spec_config(), dir.path().to_path_buf());
    options.plugins = vec![builtin_plugin(Arc::clone(&provider))];
    let service = DaemonService::build(options).await.unwrap();
    let recorder = EventRecorder::attach(&service.bus);
    SpecRig {
        service,
        provider,
        recorder,
        dir,
    }
}

/// Poll until `predicate` holds or the deadline passes.
pub async fn wait_until<F: Fn() -> bool>(predicate: F, what: &str) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

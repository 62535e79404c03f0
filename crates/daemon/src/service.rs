// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon assembly: config → core → engine → storage → server wiring.
//!
//! `DaemonService::build` constructs the whole runtime: event bus,
//! session manager, registries, safety monitor, path guard, sandbox
//! host, plugin loader, executor and its input pump, the persistence
//! hooks, the event forwarder and the subscription indices. The caller
//! then binds a listener and hands it to [`crate::server::serve`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use starry_core::{
    names, AgentConfig, CoreError, EventBus, InputQueue, InputSender, PathGuard, Registries,
    SafetyMonitor, SessionId, SessionManager,
};
use starry_engine::{
    Executor, ExecutorConfig, ExecutorDeps, PluginDescriptor, PluginLoader, Resolver, RuntimeError,
};
use starry_sandbox::{HostContext, SandboxHost, SandboxHostConfig, WorkerSpawner};
use starry_storage::SessionStore;

use crate::forwarder::attach_forwarder;
use crate::lifecycle::AgentPaths;
use crate::subscriptions::Subscriptions;

/// Errors during daemon assembly
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("config error: {0}")]
    Config(#[from] CoreError),

    #[error("plugin error: {0}")]
    Plugin(#[from] RuntimeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest error for {plugin}: {message}")]
    Manifest { plugin: String, message: String },
}

/// Inputs to [`DaemonService::build`].
pub struct ServiceOptions {
    pub config: AgentConfig,
    pub state_path: PathBuf,
    /// Spawner for sandboxed plugin workers; `None` disables sandboxing
    pub worker_spawner: Option<Arc<dyn WorkerSpawner>>,
    /// Programmatic plugins (built-ins, tests) loaded alongside the
    /// config-declared ones
    pub plugins: Vec<PluginDescriptor>,
}

impl ServiceOptions {
    pub fn new(config: AgentConfig, state_path: PathBuf) -> Self {
        Self {
            config,
            state_path,
            worker_spawner: None,
            plugins: Vec::new(),
        }
    }
}

/// The assembled daemon runtime.
pub struct DaemonService {
    pub config: AgentConfig,
    pub bus: EventBus,
    pub sessions: Arc<SessionManager>,
    pub registries: Arc<Registries>,
    pub executor: Arc<Executor>,
    pub input: InputSender,
    pub subscriptions: Arc<Subscriptions>,
    pub store: Arc<SessionStore>,
    pub shutdown: CancellationToken,
    sandbox: Option<Arc<SandboxHost>>,
    start_time: Instant,
}

impl DaemonService {
    /// Assemble the runtime and start its background tasks.
    pub async fn build(options: ServiceOptions) -> Result<Arc<Self>, ServiceError> {
        let config = options.config;
        let working_dir = config.working_dir();
        let agent_id = config.agent.id.clone();

        let bus = EventBus::new();
        let sessions = Arc::new(SessionManager::new(bus.clone()));
        let registries = Arc::new(Registries::new());
        let (input, queue) = InputQueue::channel();
        let shutdown = CancellationToken::new();

        let guard = Arc::new(
            PathGuard::new(&working_dir, &config.agent.allowed_paths).with_overrides(
                Arc::clone(&sessions) as Arc<dyn starry_core::SessionPathOverrides>,
            ),
        );

        let sandbox = options.worker_spawner.map(|spawner| {
            SandboxHost::new(
                SandboxHostConfig::default(),
                spawner,
                HostContext {
                    bus: bus.clone(),
                    input: input.clone(),
                    sessions: Arc::clone(&sessions),
                    registries: Arc::clone(&registries),
                },
            )
        });

        // Plugins: programmatic descriptors first, then config order.
        let loader = PluginLoader::new(
            bus.clone(),
            working_dir.clone(),
            agent_id.clone(),
            input.clone(),
            Arc::clone(&sessions),
            Arc::clone(&registries),
            sandbox.clone(),
        );
        let mut descriptors = options.plugins;
        for entry in &config.plugins {
            descriptors.push(descriptor_from_config(entry)?);
        }
        loader.load_all(descriptors).await?;

        let resolver = Resolver::new(
            Arc::clone(&registries),
            Arc::clone(&sessions),
            config.model.clone(),
        );
        let executor = Arc::new(Executor::new(
            ExecutorDeps {
                bus: bus.clone(),
                sessions: Arc::clone(&sessions),
                registries: Arc::clone(&registries),
                safety: Arc::new(Mutex::new(SafetyMonitor::new(config.safety.to_config()))),
                guard,
                resolver,
                working_dir,
            },
            ExecutorConfig {
                max_tool_rounds: config.engine.max_tool_rounds,
                max_turns: config.engine.max_turns,
                temperature: config.model.temperature,
                max_tokens: config.model.max_tokens,
            },
        ));

        let paths = AgentPaths::new(&options.state_path);
        let store = SessionStore::new(paths.sessions_dir(), config.daemon.max_history_size);
        let subscriptions = Subscriptions::new();
        attach_forwarder(&bus, Arc::clone(&subscriptions));

        let service = Arc::new(Self {
            config,
            bus,
            sessions,
            registries,
            executor,
            input,
            subscriptions,
            store,
            shutdown,
            sandbox,
            start_time: Instant::now(),
        });

        service.spawn_input_pump(queue);
        service.attach_persistence_hook(&agent_id);
        service.spawn_ttl_sweeper(&agent_id);

        Ok(service)
    }

    /// The single consumer of the input FIFO.
    fn spawn_input_pump(self: &Arc<Self>, mut queue: InputQueue) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let input = tokio::select! {
                    _ = service.shutdown.cancelled() => return,
                    input = queue.pop() => match input {
                        Some(input) => input,
                        None => return,
                    },
                };
                service.executor.process_event(input).await;
            }
        });
    }

    /// Persist a session's transcript when its turn finishes.
    fn attach_persistence_hook(self: &Arc<Self>, agent_id: &str) {
        let service = Arc::clone(self);
        let agent_id = agent_id.to_string();
        self.bus.on(names::LOOP_FINISHED, move |event| {
            let service = Arc::clone(&service);
            let agent_id = agent_id.clone();
            Box::pin(async move {
                let Some(session_id) = event.session_id() else {
                    return Ok(());
                };
                service.persist_session(&agent_id, &session_id);
                Ok(())
            })
        });
    }

    fn persist_session(&self, agent_id: &str, session_id: &SessionId) {
        let Some(session) = self.sessions.get(session_id) else {
            return;
        };
        let messages = self
            .sessions
            .state_store(Some(session_id))
            .lock()
            .snapshot();
        self.store.save(agent_id, &session, &messages);
    }

    /// Hourly sweep of idle sessions, when a TTL is configured.
    fn spawn_ttl_sweeper(self: &Arc<Self>, agent_id: &str) {
        let Some(ttl_secs) = self.config.daemon.session_ttl_secs else {
            return;
        };
        let service = Arc::clone(self);
        let agent_id = agent_id.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = service.shutdown.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                match service.store.cleanup_expired(
                    &agent_id,
                    Duration::from_secs(ttl_secs),
                    chrono::Utc::now(),
                ) {
                    Ok(removed) if !removed.is_empty() => {
                        info!(count = removed.len(), "expired sessions removed");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "session ttl sweep failed"),
                }
            }
        });
    }

    /// Flush persistence and stop sandbox workers. Part of shutdown.
    pub async fn drain(&self) {
        // Write every loaded session, then flush the debouncer: saves
        // queued mid-shutdown must not be lost.
        for session in self.sessions.list() {
            self.persist_session(&self.config.agent.id, &session.id);
        }
        self.store.flush_all();
        if let Some(sandbox) = &self.sandbox {
            sandbox.shutdown().await;
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent.id
    }

    pub fn agent_name(&self) -> &str {
        &self.config.agent.name
    }

    pub fn agent_version(&self) -> &str {
        &self.config.agent.version
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn replay_limit(&self) -> usize {
        self.config.daemon.replay_limit
    }

    /// Restore persisted sessions into the session manager at startup.
    pub async fn restore_sessions(&self) -> usize {
        let agent_id = self.config.agent.id.clone();
        let entries = match self.store.list_sessions(&agent_id) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "session restore listing failed");
                return 0;
            }
        };

        let mut restored = 0;
        for entry in entries {
            let loaded = match self.store.load(&agent_id, &entry.id) {
                Ok(Some(loaded)) => loaded,
                Ok(None) => continue,
                Err(e) => {
                    warn!(session = %entry.id, error = %e, "session restore failed");
                    continue;
                }
            };
            let (persisted, messages) = loaded;
            let (session, _) = self
                .sessions
                .create_with_id(SessionId::new(persisted.id.clone()), persisted.metadata)
                .await;
            let store = self.sessions.state_store(Some(&session.id));
            store.lock().restore(&messages);
            restored += 1;
        }
        restored
    }
}

/// Build a loader descriptor from a config plugin entry.
fn descriptor_from_config(
    entry: &starry_core::PluginEntry,
) -> Result<PluginDescriptor, ServiceError> {
    let manifest_path = entry.manifest_path();
    let raw = std::fs::read_to_string(&manifest_path).map_err(|e| ServiceError::Manifest {
        plugin: entry.name.clone(),
        message: format!("{}: {e}", manifest_path.display()),
    })?;
    let manifest = serde_json::from_str(&raw).map_err(|e| ServiceError::Manifest {
        plugin: entry.name.clone(),
        message: e.to_string(),
    })?;

    let config = entry
        .config
        .as_ref()
        .map(toml_to_json)
        .unwrap_or(Value::Null);

    Ok(PluginDescriptor {
        manifest,
        path: entry.path.clone(),
        config,
        factory: None,
    })
}

/// Convert opaque TOML settings to the JSON plugins receive.
fn toml_to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::from(*i),
        toml::Value::Float(f) => Value::from(*f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .iter()
                .map(|(key, value)| (key.clone(), toml_to_json(value)))
                .collect(),
        ),
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;

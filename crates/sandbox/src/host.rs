// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox host: worker pool, plugin binding, restart policy, RPC.
//!
//! Workers are pre-spawned into an idle pool on first use. Loading a
//! plugin verifies its integrity, binds a worker, and initialises the
//! plugin inside it. Each worker has a pump task draining its frames;
//! when the channel closes the worker is gone and the restart policy
//! decides whether a replacement is spawned. A periodic sweep
//! terminates workers whose heartbeat has gone quiet.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use starry_core::{
    names, CapabilityDeclarations, PluginManifest, RequestId, SandboxSettings, WorkerId,
};

use crate::audit::{AuditEntry, AuditLog};
use crate::error::SandboxError;
use crate::integrity::verify_integrity;
use crate::policy::{RestartDecision, RestartTracker};
use crate::protocol::{HookCatalog, HostMessage, WireToolContext, WorkerInitContext, WorkerMessage};
use crate::rpc::{self, HostContext};
use crate::transport::{WorkerChannels, WorkerSpawner};

/// Host tuning knobs.
#[derive(Debug, Clone)]
pub struct SandboxHostConfig {
    /// Workers pre-spawned on first use
    pub pool_size: usize,
    /// Deadline for INVOKE_TOOL round-trips
    pub rpc_timeout: Duration,
    /// Deadline for INIT_PLUGIN → INIT_COMPLETE
    pub init_timeout: Duration,
    /// Deadline for RESET → RESET_COMPLETE
    pub reset_timeout: Duration,
    /// Heartbeat sweep cadence
    pub sweep_interval: Duration,
}

impl Default for SandboxHostConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            rpc_timeout: Duration::from_secs(30),
            init_timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(45),
        }
    }
}

/// One live worker process as the host sees it.
struct WorkerActor {
    id: WorkerId,
    outbound: mpsc::Sender<HostMessage>,
    kill: CancellationToken,
    last_heartbeat: Mutex<Instant>,
    bound: Mutex<Option<Arc<PluginSlot>>>,
}

/// Everything the plugin binds to init-time state.
struct InitSpec {
    plugin_path: PathBuf,
    context: WorkerInitContext,
}

/// Per-plugin record: worker, restart bookkeeping, pending RPC.
struct PluginSlot {
    plugin: String,
    settings: SandboxSettings,
    capabilities: CapabilityDeclarations,
    init: InitSpec,
    audit: Option<Arc<AuditLog>>,
    tracker: Mutex<RestartTracker>,
    actor: Mutex<Option<Arc<WorkerActor>>>,
    pending_tools: Mutex<HashMap<RequestId, oneshot::Sender<Result<String, SandboxError>>>>,
    init_wait: Mutex<Option<oneshot::Sender<Result<HookCatalog, String>>>>,
    reset_wait: Mutex<Option<oneshot::Sender<()>>>,
    subscriptions: Mutex<HashSet<String>>,
    failed: AtomicBool,
    disposing: AtomicBool,
    /// Guards against overlapping restart loops for one slot
    restarting: AtomicBool,
}

impl PluginSlot {
    /// Fail every in-flight tool call; the worker is gone.
    fn fail_pending(&self) {
        for (_, waiter) in self.pending_tools.lock().drain() {
            let _ = waiter.send(Err(SandboxError::WorkerGone));
        }
        if let Some(waiter) = self.init_wait.lock().take() {
            let _ = waiter.send(Err("worker exited during init".to_string()));
        }
        // Dropping a pending reset waiter makes the disposer treat the
        // reset as missed; the worker is already dead.
        drop(self.reset_wait.lock().take());
    }
}

/// Pooled plugin sandbox host.
pub struct SandboxHost {
    config: SandboxHostConfig,
    spawner: Arc<dyn WorkerSpawner>,
    ctx: HostContext,
    idle: Mutex<Vec<Arc<WorkerActor>>>,
    plugins: Mutex<HashMap<String, Arc<PluginSlot>>>,
    started: AtomicBool,
    shutdown: CancellationToken,
}

impl SandboxHost {
    pub fn new(
        config: SandboxHostConfig,
        spawner: Arc<dyn WorkerSpawner>,
        ctx: HostContext,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            spawner,
            ctx,
            idle: Mutex::new(Vec::new()),
            plugins: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    /// Pre-spawn the pool and start background tasks. Runs once.
    async fn ensure_started(self: &Arc<Self>) -> Result<(), SandboxError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let defaults = SandboxSettings::default();
        for _ in 0..self.config.pool_size {
            let actor = self.spawn_actor(&defaults).await?;
            self.idle.lock().push(actor);
        }

        self.start_sweep();
        self.start_event_forwarding();
        Ok(())
    }

    /// Spawn a worker and its pump task.
    fn spawn_actor<'a>(
        self: &'a Arc<Self>,
        settings: &'a SandboxSettings,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<WorkerActor>, SandboxError>> + Send + 'a>> {
        Box::pin(async move {
            let WorkerChannels {
                outbound,
                inbound,
                kill,
            } = self.spawner.spawn(settings).await?;

            let actor = Arc::new(WorkerActor {
                id: WorkerId::new(uuid::Uuid::new_v4().to_string()),
                outbound,
                kill,
                last_heartbeat: Mutex::new(Instant::now()),
                bound: Mutex::new(None),
            });

            let host = Arc::clone(self);
            let pump_actor = Arc::clone(&actor);
            tokio::spawn(async move {
                host.pump(pump_actor, inbound).await;
            });

            Ok(actor)
        })
    }

    /// Drain one worker's frames until the channel closes.
    async fn pump(
        self: Arc<Self>,
        actor: Arc<WorkerActor>,
        mut inbound: mpsc::UnboundedReceiver<WorkerMessage>,
    ) {
        while let Some(message) = inbound.recv().await {
            *actor.last_heartbeat.lock() = Instant::now();
            let slot = actor.bound.lock().clone();

            match (message, slot) {
                (WorkerMessage::Heartbeat, _) => {}

                (WorkerMessage::InitComplete { hooks }, Some(slot)) => {
                    if let Some(waiter) = slot.init_wait.lock().take() {
                        let _ = waiter.send(Ok(hooks));
                    }
                }

                (WorkerMessage::InitError { message }, Some(slot)) => {
                    if let Some(waiter) = slot.init_wait.lock().take() {
                        let _ = waiter.send(Err(message));
                    }
                }

                (
                    WorkerMessage::ToolResult {
                        request_id,
                        result,
                        error,
                    },
                    Some(slot),
                ) => {
                    let waiter = slot.pending_tools.lock().remove(&request_id);
                    match waiter {
                        Some(waiter) => {
                            let outcome = match (result, error) {
                                (_, Some(error)) => Err(SandboxError::ToolFailed(error)),
                                (Some(result), None) => Ok(result),
                                (None, None) => Ok(String::new()),
                            };
                            let _ = waiter.send(outcome);
                        }
                        // Late reply after timeout: discard.
                        None => debug!(request_id = %request_id, "discarding late TOOL_RESULT"),
                    }
                }

                (WorkerMessage::ResetComplete, Some(slot)) => {
                    if let Some(waiter) = slot.reset_wait.lock().take() {
                        let _ = waiter.send(());
                    }
                }

                (WorkerMessage::ModuleBlocked { module }, slot) => {
                    let plugin = slot.map(|s| s.plugin.clone()).unwrap_or_default();
                    self.ctx
                        .bus
                        .emit(
                            names::SANDBOX_MODULE_BLOCKED,
                            json!({"plugin": plugin, "module": module}),
                        )
                        .await;
                }

                (
                    WorkerMessage::HostRequest {
                        request_id,
                        request,
                    },
                    Some(slot),
                ) => {
                    let started = Instant::now();
                    let method = rpc::method_name(&request);
                    let category = rpc::category(&request);
                    let args = serde_json::to_value(&request).unwrap_or(Value::Null);

                    let outcome = rpc::handle(
                        &self.ctx,
                        &slot.capabilities,
                        &slot.subscriptions,
                        request,
                    )
                    .await;

                    if let Some(audit) = &slot.audit {
                        let duration = started.elapsed().as_millis() as u64;
                        let rendered = outcome.as_ref().map(|value| value.to_string());
                        let entry = AuditEntry::new(
                            &slot.plugin,
                            category,
                            method,
                            &args,
                            match &rendered {
                                Ok(result) => Ok(result.as_str()),
                                Err(error) => Err(error.as_str()),
                            },
                            duration,
                        );
                        audit.record(&entry);
                    }

                    let reply = match outcome {
                        Ok(result) => HostMessage::HostResponse {
                            request_id,
                            result: Some(result),
                            error: None,
                        },
                        Err(error) => HostMessage::HostResponse {
                            request_id,
                            result: None,
                            error: Some(error),
                        },
                    };
                    let _ = actor.outbound.send(reply).await;
                }

                // Frames that need a bound plugin but arrived unbound.
                (message, None) => {
                    debug!(worker_id = %actor.id, message = ?message, "frame from unbound worker dropped");
                }
            }
        }

        // Channel closed: the worker process is gone.
        self.on_worker_exit(actor).await;
    }

    /// Handle a worker exit: fail pending work, then restart or give up.
    async fn on_worker_exit(self: &Arc<Self>, actor: Arc<WorkerActor>) {
        actor.kill.cancel();
        self.idle.lock().retain(|a| a.id != actor.id);

        let slot = actor.bound.lock().take();
        let Some(slot) = slot else {
            return;
        };

        {
            let mut current = slot.actor.lock();
            if current.as_ref().map(|a| a.id.clone()) == Some(actor.id.clone()) {
                *current = None;
            }
        }
        slot.fail_pending();

        if slot.disposing.load(Ordering::SeqCst) || self.shutdown.is_cancelled() {
            return;
        }
        // A crash before the plugin finished loading fails the load;
        // only registered plugins get the restart policy.
        if !self.plugins.lock().contains_key(&slot.plugin) {
            return;
        }
        // Crashes during a re-init are handled by the running loop.
        if slot.restarting.swap(true, Ordering::SeqCst) {
            return;
        }

        self.restart_loop(Arc::clone(&slot)).await;
        slot.restarting.store(false, Ordering::SeqCst);
    }

    /// Apply the restart policy until the worker is back or exhausted.
    async fn restart_loop(self: &Arc<Self>, slot: Arc<PluginSlot>) {
        loop {
            let now_ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            let decision = slot.tracker.lock().on_crash(now_ms, &slot.settings.restart);

            match decision {
                RestartDecision::GiveUp => {
                    slot.failed.store(true, Ordering::SeqCst);
                    warn!(plugin = %slot.plugin, "worker restarts exhausted");
                    self.ctx
                        .bus
                        .emit(
                            names::SANDBOX_WORKER_RESTART_EXHAUSTED,
                            json!({"plugin": slot.plugin}),
                        )
                        .await;
                    return;
                }
                RestartDecision::Restart { backoff_ms } => {
                    debug!(plugin = %slot.plugin, backoff_ms, "restarting worker");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;

                    match self.bind_and_init(&slot).await {
                        Ok(_) => {
                            let restarts = slot.tracker.lock().crash_count();
                            info!(plugin = %slot.plugin, restarts, "worker restarted");
                            self.ctx
                                .bus
                                .emit(
                                    names::SANDBOX_WORKER_RESTARTED,
                                    json!({"plugin": slot.plugin, "restarts": restarts}),
                                )
                                .await;
                            return;
                        }
                        Err(e) => {
                            warn!(plugin = %slot.plugin, error = %e, "worker re-init failed");
                            // Counts as another crash on the next loop turn.
                        }
                    }
                }
            }
        }
    }

    /// Spawn (or reuse) a worker, bind it to the slot, run INIT_PLUGIN.
    async fn bind_and_init(
        self: &Arc<Self>,
        slot: &Arc<PluginSlot>,
    ) -> Result<HookCatalog, SandboxError> {
        let popped = self.idle.lock().pop();
        let actor = match popped {
            Some(actor) => actor,
            None => self.spawn_actor(&slot.settings).await?,
        };

        *actor.bound.lock() = Some(Arc::clone(slot));
        *slot.actor.lock() = Some(Arc::clone(&actor));

        let (tx, rx) = oneshot::channel();
        *slot.init_wait.lock() = Some(tx);

        let init = HostMessage::InitPlugin {
            plugin_path: slot.init.plugin_path.clone(),
            plugin_name: slot.plugin.clone(),
            context: slot.init.context.clone(),
        };
        actor
            .outbound
            .send(init)
            .await
            .map_err(|_| SandboxError::WorkerGone)?;

        let outcome = tokio::time::timeout(self.config.init_timeout, rx)
            .await
            .map_err(|_| SandboxError::RpcTimeout(self.config.init_timeout))
            .and_then(|received| received.map_err(|_| SandboxError::WorkerGone))
            .and_then(|result| {
                result.map_err(|message| SandboxError::InitFailed {
                    plugin: slot.plugin.clone(),
                    message,
                })
            });

        match outcome {
            Ok(hooks) => Ok(hooks),
            Err(e) => {
                // Unbind and terminate; a worker stuck in init is not
                // returned to the pool.
                *actor.bound.lock() = None;
                *slot.actor.lock() = None;
                actor.kill.cancel();
                Err(e)
            }
        }
    }

    /// Load a plugin into a sandboxed worker.
    ///
    /// Verifies integrity first, then binds a pooled worker and awaits
    /// the plugin's hook catalog.
    pub async fn load_plugin(
        self: &Arc<Self>,
        plugin_path: PathBuf,
        manifest: &PluginManifest,
        context: WorkerInitContext,
    ) -> Result<HookCatalog, SandboxError> {
        self.ensure_started().await?;

        if let Some(integrity) = &manifest.integrity {
            if let Err(source) = verify_integrity(&plugin_path, integrity) {
                warn!(plugin = %manifest.name, error = %source, "plugin integrity check failed");
                self.ctx
                    .bus
                    .emit(
                        names::SANDBOX_SIGNATURE_FAILED,
                        json!({"plugin": manifest.name, "reason": source.to_string()}),
                    )
                    .await;
                return Err(SandboxError::Integrity {
                    plugin: manifest.name.clone(),
                    source,
                });
            }
        }

        let settings = manifest.sandbox_settings();
        let audit = settings.audit.as_ref().filter(|a| a.enabled).map(|a| {
            let path = a
                .log_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("{}.audit.jsonl", manifest.name)));
            Arc::new(AuditLog::new(path, a.max_size_bytes))
        });

        let mut context = context;
        context.module_allow = settings.module_allow.clone();
        context.module_deny = settings.module_deny.clone();
        context.capabilities = manifest.capabilities.clone().unwrap_or_default();

        let slot = Arc::new(PluginSlot {
            plugin: manifest.name.clone(),
            capabilities: manifest.capabilities.clone().unwrap_or_default(),
            init: InitSpec {
                plugin_path,
                context,
            },
            audit,
            settings,
            tracker: Mutex::new(RestartTracker::new()),
            actor: Mutex::new(None),
            pending_tools: Mutex::new(HashMap::new()),
            init_wait: Mutex::new(None),
            reset_wait: Mutex::new(None),
            subscriptions: Mutex::new(HashSet::new()),
            failed: AtomicBool::new(false),
            disposing: AtomicBool::new(false),
            restarting: AtomicBool::new(false),
        });

        let hooks = self.bind_and_init(&slot).await?;
        self.plugins
            .lock()
            .insert(manifest.name.clone(), Arc::clone(&slot));
        Ok(hooks)
    }

    /// Invoke a tool inside the plugin's worker.
    pub async fn invoke_tool(
        &self,
        plugin: &str,
        tool_id: &str,
        input: Value,
        context: WireToolContext,
    ) -> Result<String, SandboxError> {
        let slot = self
            .plugins
            .lock()
            .get(plugin)
            .cloned()
            .ok_or_else(|| SandboxError::PluginNotLoaded(plugin.to_string()))?;

        if slot.failed.load(Ordering::SeqCst) {
            return Err(SandboxError::RestartsExhausted(plugin.to_string()));
        }

        let outbound = {
            let actor = slot.actor.lock();
            match actor.as_ref() {
                Some(actor) => actor.outbound.clone(),
                None => return Err(SandboxError::WorkerGone),
            }
        };

        let request_id = RequestId::new(uuid::Uuid::new_v4().to_string());
        let (tx, rx) = oneshot::channel();
        slot.pending_tools.lock().insert(request_id.clone(), tx);

        let frame = HostMessage::InvokeTool {
            request_id: request_id.clone(),
            tool_id: tool_id.to_string(),
            input,
            context,
        };
        if outbound.send(frame).await.is_err() {
            slot.pending_tools.lock().remove(&request_id);
            return Err(SandboxError::WorkerGone);
        }

        match tokio::time::timeout(self.config.rpc_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SandboxError::WorkerGone),
            Err(_) => {
                slot.pending_tools.lock().remove(&request_id);
                Err(SandboxError::RpcTimeout(self.config.rpc_timeout))
            }
        }
    }

    /// Dispose a plugin: RESET the worker and return it to the pool.
    ///
    /// A worker that misses the reset deadline is terminated instead.
    pub async fn dispose_plugin(&self, plugin: &str) -> Result<(), SandboxError> {
        let slot = self
            .plugins
            .lock()
            .remove(plugin)
            .ok_or_else(|| SandboxError::PluginNotLoaded(plugin.to_string()))?;
        slot.disposing.store(true, Ordering::SeqCst);

        let actor = slot.actor.lock().take();
        let Some(actor) = actor else {
            return Ok(());
        };

        let (tx, rx) = oneshot::channel();
        *slot.reset_wait.lock() = Some(tx);

        let reset_ok = actor.outbound.send(HostMessage::Reset).await.is_ok()
            && matches!(
                tokio::time::timeout(self.config.reset_timeout, rx).await,
                Ok(Ok(()))
            );

        if reset_ok {
            *actor.bound.lock() = None;
            self.idle.lock().push(actor);
            Ok(())
        } else {
            warn!(plugin = %plugin, "worker missed reset deadline, terminating");
            *actor.bound.lock() = None;
            actor.kill.cancel();
            Ok(())
        }
    }

    /// True when the plugin is loaded and its worker budget is spent.
    pub fn is_failed(&self, plugin: &str) -> bool {
        self.plugins
            .lock()
            .get(plugin)
            .map(|slot| slot.failed.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn is_loaded(&self, plugin: &str) -> bool {
        self.plugins.lock().contains_key(plugin)
    }

    /// Terminate every worker and stop background tasks.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for actor in self.idle.lock().drain(..) {
            actor.kill.cancel();
        }
        let slots: Vec<_> = self.plugins.lock().drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            slot.disposing.store(true, Ordering::SeqCst);
            if let Some(actor) = slot.actor.lock().take() {
                actor.kill.cancel();
            }
        }
    }

    /// Kill workers whose heartbeat is older than the CPU-stall timeout.
    fn start_sweep(self: &Arc<Self>) {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(host.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = host.shutdown.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                let stalled: Vec<(Arc<WorkerActor>, Option<String>)> = {
                    let plugins = host.plugins.lock();
                    let mut found = Vec::new();
                    for slot in plugins.values() {
                        let timeout = Duration::from_millis(slot.settings.cpu_timeout_ms);
                        if let Some(actor) = slot.actor.lock().clone() {
                            if actor.last_heartbeat.lock().elapsed() > timeout {
                                found.push((actor, Some(slot.plugin.clone())));
                            }
                        }
                    }
                    found
                };

                for (actor, plugin) in stalled {
                    warn!(worker_id = %actor.id, plugin = ?plugin, "worker stalled, terminating");
                    host.ctx
                        .bus
                        .emit(
                            names::SANDBOX_WORKER_STALLED,
                            json!({"plugin": plugin, "workerId": actor.id.as_str()}),
                        )
                        .await;
                    actor.kill.cancel();
                }
            }
        });
    }

    /// Forward subscribed bus events into workers.
    fn start_event_forwarding(self: &Arc<Self>) {
        let host = Arc::clone(self);
        self.ctx.bus.on_any(move |event| {
            let host = Arc::clone(&host);
            Box::pin(async move {
                let targets: Vec<mpsc::Sender<HostMessage>> = {
                    let plugins = host.plugins.lock();
                    plugins
                        .values()
                        .filter(|slot| slot.subscriptions.lock().contains(&event.event_type))
                        .filter_map(|slot| {
                            slot.actor.lock().as_ref().map(|a| a.outbound.clone())
                        })
                        .collect()
                };
                for outbound in targets {
                    let _ = outbound
                        .send(HostMessage::Event {
                            event: (*event).clone(),
                        })
                        .await;
                }
                Ok(())
            })
        });
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;

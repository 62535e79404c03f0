// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plugin loader: dependency ordering, context construction, hook
//! registration.
//!
//! Plugins load in topological order of their service dependencies
//! (config order where no edges exist). Each gets a typed context; a
//! manifest with sandboxing enabled is delegated to the sandbox host
//! and its returned catalog is registered through proxies, while
//! in-process factories hand back live trait objects.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use starry_core::{
    names, CommandDef, EventBus, Guide, InputSender, ListenerDef, PluginManifest, Registries,
    ServiceDef, SessionManager, Tool, ToolContext, ToolError, UiDef,
};
use starry_sandbox::{HookCatalog, SandboxHost, WireToolContext, WorkerInitContext};

use crate::error::RuntimeError;

/// Typed context handed to in-process plugin factories.
#[derive(Clone)]
pub struct PluginContext {
    pub plugin_name: String,
    pub bus: EventBus,
    pub working_dir: PathBuf,
    pub agent_id: String,
    /// Opaque per-plugin settings from the agent config
    pub config: Value,
    pub input: InputSender,
    pub sessions: Arc<SessionManager>,
    pub registries: Arc<Registries>,
}

/// Hooks an in-process plugin returns from its factory.
#[derive(Default)]
pub struct PluginHooks {
    pub tools: Vec<Arc<dyn Tool>>,
    pub providers: Vec<Arc<dyn starry_core::Provider>>,
    pub guides: Vec<Guide>,
    pub commands: Vec<CommandDef>,
    pub uis: Vec<UiDef>,
    /// Event types the plugin listens to (bus subscriptions are made
    /// by the factory itself; these are the declared interests)
    pub listeners: Vec<String>,
}

pub type FactoryFuture = Pin<Box<dyn Future<Output = Result<PluginHooks, String>> + Send>>;

/// In-process plugin entry point.
pub type PluginFactory = Arc<dyn Fn(PluginContext) -> FactoryFuture + Send + Sync>;

/// One plugin to load.
pub struct PluginDescriptor {
    pub manifest: PluginManifest,
    pub path: PathBuf,
    pub config: Value,
    /// Present for in-process plugins; sandboxed ones load by path
    pub factory: Option<PluginFactory>,
}

/// Loads plugins and registers their hooks.
pub struct PluginLoader {
    bus: EventBus,
    working_dir: PathBuf,
    agent_id: String,
    input: InputSender,
    sessions: Arc<SessionManager>,
    registries: Arc<Registries>,
    sandbox: Option<Arc<SandboxHost>>,
}

impl PluginLoader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: EventBus,
        working_dir: PathBuf,
        agent_id: String,
        input: InputSender,
        sessions: Arc<SessionManager>,
        registries: Arc<Registries>,
        sandbox: Option<Arc<SandboxHost>>,
    ) -> Self {
        Self {
            bus,
            working_dir,
            agent_id,
            input,
            sessions,
            registries,
            sandbox,
        }
    }

    /// Load every descriptor in dependency order.
    ///
    /// Returns the names in load order. The first failure aborts the
    /// remainder; already-loaded plugins stay loaded.
    pub async fn load_all(
        &self,
        descriptors: Vec<PluginDescriptor>,
    ) -> Result<Vec<String>, RuntimeError> {
        let ordered = sort_by_service_dependencies(descriptors)?;
        let mut loaded = Vec::with_capacity(ordered.len());

        for descriptor in ordered {
            let name = descriptor.manifest.name.clone();
            self.load_one(descriptor).await?;
            loaded.push(name);
        }
        Ok(loaded)
    }

    async fn load_one(&self, descriptor: PluginDescriptor) -> Result<(), RuntimeError> {
        let manifest = &descriptor.manifest;
        let name = manifest.name.clone();

        if manifest.sandboxed() {
            let Some(sandbox) = &self.sandbox else {
                return Err(RuntimeError::PluginLoad {
                    plugin: name,
                    message: "sandbox requested but no sandbox host is configured".to_string(),
                });
            };
            let context = WorkerInitContext {
                working_dir: self.working_dir.clone(),
                agent_id: self.agent_id.clone(),
                plugin_config: descriptor.config.clone(),
                capabilities: manifest.capabilities.clone().unwrap_or_default(),
                module_allow: Vec::new(),
                module_deny: Vec::new(),
            };
            let catalog = sandbox
                .load_plugin(descriptor.path.clone(), manifest, context)
                .await
                .map_err(|e| RuntimeError::PluginLoad {
                    plugin: name.clone(),
                    message: e.to_string(),
                })?;
            self.register_catalog(&name, catalog, Arc::clone(sandbox));
        } else {
            let Some(factory) = &descriptor.factory else {
                return Err(RuntimeError::PluginLoad {
                    plugin: name,
                    message: "no factory for in-process plugin".to_string(),
                });
            };
            let context = PluginContext {
                plugin_name: name.clone(),
                bus: self.bus.clone(),
                working_dir: self.working_dir.clone(),
                agent_id: self.agent_id.clone(),
                config: descriptor.config.clone(),
                input: self.input.clone(),
                sessions: Arc::clone(&self.sessions),
                registries: Arc::clone(&self.registries),
            };
            let hooks = factory(context)
                .await
                .map_err(|message| RuntimeError::PluginLoad {
                    plugin: name.clone(),
                    message,
                })?;
            self.register_hooks(&name, hooks);
        }

        for service in &manifest.services {
            self.registries.services.register(
                service.clone(),
                Arc::new(ServiceDef {
                    name: service.clone(),
                    plugin: name.clone(),
                    descriptor: Value::Null,
                }),
            );
        }

        info!(plugin = %name, version = %manifest.version, sandboxed = manifest.sandboxed(), "plugin loaded");
        self.bus
            .emit(
                names::PLUGIN_LOADED,
                json!({
                    "plugin": name,
                    "version": manifest.version,
                    "sandboxed": manifest.sandboxed(),
                }),
            )
            .await;
        Ok(())
    }

    fn register_hooks(&self, plugin: &str, hooks: PluginHooks) {
        for tool in hooks.tools {
            self.registries.tools.register(tool.id().to_string(), tool);
        }
        for provider in hooks.providers {
            self.registries
                .providers
                .register(provider.id().to_string(), provider);
        }
        for guide in hooks.guides {
            self.registries.guides.register(guide.id.clone(), Arc::new(guide));
        }
        for command in hooks.commands {
            self.registries
                .commands
                .register(command.name.clone(), Arc::new(command));
        }
        for ui in hooks.uis {
            self.registries.uis.register(ui.id.clone(), Arc::new(ui));
        }
        for event_type in hooks.listeners {
            self.registries.listeners.register(
                format!("{plugin}:{event_type}"),
                Arc::new(ListenerDef {
                    event_type,
                    plugin: plugin.to_string(),
                }),
            );
        }
    }

    /// Register a sandboxed plugin's catalog: tools become RPC proxies.
    fn register_catalog(&self, plugin: &str, catalog: HookCatalog, sandbox: Arc<SandboxHost>) {
        for descriptor in catalog.tools {
            let tool = SandboxedTool {
                plugin: plugin.to_string(),
                id: descriptor.id.clone(),
                description: descriptor.description,
                schema: descriptor.schema,
                host: Arc::clone(&sandbox),
            };
            self.registries
                .tools
                .register(descriptor.id, Arc::new(tool));
        }
        // Provider hooks cross the boundary as descriptors only; the
        // protocol has no streaming channel, so they are not routable.
        for provider in catalog.providers {
            warn!(
                plugin = %plugin,
                provider = %provider.id,
                "sandboxed provider hooks are descriptor-only and were not registered",
            );
        }
        for guide in catalog.guides {
            self.registries.guides.register(guide.id.clone(), Arc::new(guide));
        }
        for command in catalog.commands {
            self.registries
                .commands
                .register(command.name.clone(), Arc::new(command));
        }
        for event_type in catalog.listeners {
            self.registries.listeners.register(
                format!("{plugin}:{event_type}"),
                Arc::new(ListenerDef {
                    event_type,
                    plugin: plugin.to_string(),
                }),
            );
        }
    }
}

/// Tool proxy that forwards execution into the plugin's worker.
struct SandboxedTool {
    plugin: String,
    id: String,
    description: String,
    schema: Value,
    host: Arc<SandboxHost>,
}

#[async_trait]
impl Tool for SandboxedTool {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(
        &self,
        arguments: Map<String, Value>,
        context: ToolContext,
    ) -> Result<String, ToolError> {
        let wire_context = WireToolContext {
            working_dir: context.working_dir.clone(),
            allowed_paths: context.allowed_paths.clone(),
        };
        self.host
            .invoke_tool(&self.plugin, &self.id, Value::Object(arguments), wire_context)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))
    }
}

/// Topologically sort descriptors by service dependencies.
///
/// Edge P → Q when Q's `serviceDependencies` name a service P
/// provides. Kahn's algorithm, preserving config order among ready
/// nodes. A cycle is an error naming its members.
fn sort_by_service_dependencies(
    descriptors: Vec<PluginDescriptor>,
) -> Result<Vec<PluginDescriptor>, RuntimeError> {
    use std::collections::HashMap;

    // service name -> provider index
    let mut providers: HashMap<&str, usize> = HashMap::new();
    for (index, descriptor) in descriptors.iter().enumerate() {
        for service in &descriptor.manifest.services {
            providers.insert(service.as_str(), index);
        }
    }

    let n = descriptors.len();
    let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (index, descriptor) in descriptors.iter().enumerate() {
        for needed in &descriptor.manifest.service_dependencies {
            // Unsatisfied dependencies impose no ordering; the plugin
            // may obtain the service at runtime or fail on its own.
            if let Some(&provider) = providers.get(needed.as_str()) {
                if provider != index {
                    dependencies[index].push(provider);
                }
            }
        }
    }

    let mut in_degree: Vec<usize> = vec![0; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (index, deps) in dependencies.iter().enumerate() {
        in_degree[index] = deps.len();
        for &dep in deps {
            dependents[dep].push(index);
        }
    }

    let mut order: Vec<usize> = Vec::with_capacity(n);
    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();

    while let Some(&next) = ready.first() {
        ready.remove(0);
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                // Keep config order: insert sorted by original index.
                let pos = ready
                    .iter()
                    .position(|&r| r > dependent)
                    .unwrap_or(ready.len());
                ready.insert(pos, dependent);
            }
        }
    }

    if order.len() != n {
        let cycle: Vec<&str> = (0..n)
            .filter(|i| !order.contains(i))
            .map(|i| descriptors[i].manifest.name.as_str())
            .collect();
        return Err(RuntimeError::DependencyCycle(cycle.join(" -> ")));
    }

    // Reorder the owned descriptors without cloning factories.
    let mut slots: Vec<Option<PluginDescriptor>> = descriptors.into_iter().map(Some).collect();
    let mut result = Vec::with_capacity(n);
    for index in order {
        if let Some(descriptor) = slots[index].take() {
            result.push(descriptor);
        }
    }
    Ok(result)
}

#[cfg(test)]
#[path = "loader_tests.rs"]
mod tests;

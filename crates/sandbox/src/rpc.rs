// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routing for worker-originated RPC against the core.
//!
//! Workers reach the bus, the input queue, sessions and the registries
//! only through these handlers. Capability checks happen here: a plugin
//! with an allowed-providers whitelist sees nothing outside it.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use starry_core::{
    CapabilityDeclarations, EventBus, InputEvent, InputSender, Registries, SessionManager,
};

use crate::protocol::{ProviderDescriptor, ToolDescriptor, WorkerRpc};

/// Core handles the sandbox host serves RPC against.
#[derive(Clone)]
pub struct HostContext {
    pub bus: EventBus,
    pub input: InputSender,
    pub sessions: Arc<SessionManager>,
    pub registries: Arc<Registries>,
}

/// Audit category for a request.
pub fn category(rpc: &WorkerRpc) -> &'static str {
    match rpc {
        WorkerRpc::EmitEvent { .. } | WorkerRpc::BusSubscribe { .. } | WorkerRpc::BusUnsubscribe { .. } => "bus",
        WorkerRpc::PushInput { .. } => "input",
        WorkerRpc::SessionCreate { .. }
        | WorkerRpc::SessionGet { .. }
        | WorkerRpc::SessionDestroy { .. }
        | WorkerRpc::SessionList => "sessions",
        WorkerRpc::ToolsList
        | WorkerRpc::ToolGet { .. }
        | WorkerRpc::GuidesList
        | WorkerRpc::GuideGet { .. }
        | WorkerRpc::ProvidersList
        | WorkerRpc::ProviderGet { .. } => "registry",
    }
}

/// Wire method name for a request, for audit entries.
pub fn method_name(rpc: &WorkerRpc) -> &'static str {
    match rpc {
        WorkerRpc::EmitEvent { .. } => "emit_event",
        WorkerRpc::PushInput { .. } => "push_input",
        WorkerRpc::SessionCreate { .. } => "session_create",
        WorkerRpc::SessionGet { .. } => "session_get",
        WorkerRpc::SessionDestroy { .. } => "session_destroy",
        WorkerRpc::SessionList => "session_list",
        WorkerRpc::ToolsList => "tools_list",
        WorkerRpc::ToolGet { .. } => "tool_get",
        WorkerRpc::GuidesList => "guides_list",
        WorkerRpc::GuideGet { .. } => "guide_get",
        WorkerRpc::ProvidersList => "providers_list",
        WorkerRpc::ProviderGet { .. } => "provider_get",
        WorkerRpc::BusSubscribe { .. } => "bus_subscribe",
        WorkerRpc::BusUnsubscribe { .. } => "bus_unsubscribe",
    }
}

/// Handle one worker RPC.
///
/// `subscriptions` is the calling worker's bus-interest set; subscribe
/// and unsubscribe mutate it and the host's event pump consults it.
pub async fn handle(
    ctx: &HostContext,
    capabilities: &CapabilityDeclarations,
    subscriptions: &Mutex<HashSet<String>>,
    rpc: WorkerRpc,
) -> Result<Value, String> {
    match rpc {
        WorkerRpc::EmitEvent {
            event_type,
            payload,
        } => {
            ctx.bus.emit(event_type, payload).await;
            Ok(json!({"ok": true}))
        }

        WorkerRpc::PushInput { data, session_id } => {
            let accepted = ctx.input.push(InputEvent::user(data, session_id));
            if accepted {
                Ok(json!({"ok": true}))
            } else {
                Err("input queue is closed".to_string())
            }
        }

        WorkerRpc::SessionCreate { metadata } => {
            let session = ctx.sessions.create(metadata).await;
            serde_json::to_value(session).map_err(|e| e.to_string())
        }

        WorkerRpc::SessionGet { session_id } => match ctx.sessions.get(&session_id) {
            Some(session) => serde_json::to_value(session).map_err(|e| e.to_string()),
            None => Ok(Value::Null),
        },

        WorkerRpc::SessionDestroy { session_id } => {
            let destroyed = ctx.sessions.destroy(&session_id).await;
            Ok(json!({"destroyed": destroyed}))
        }

        WorkerRpc::SessionList => {
            serde_json::to_value(ctx.sessions.list()).map_err(|e| e.to_string())
        }

        WorkerRpc::ToolsList => {
            let tools: Vec<ToolDescriptor> = ctx
                .registries
                .tools
                .list()
                .iter()
                .map(|tool| ToolDescriptor {
                    id: tool.id().to_string(),
                    description: tool.description().to_string(),
                    schema: tool.schema(),
                })
                .collect();
            serde_json::to_value(tools).map_err(|e| e.to_string())
        }

        WorkerRpc::ToolGet { id } => match ctx.registries.tools.get(&id) {
            Some(tool) => serde_json::to_value(ToolDescriptor {
                id: tool.id().to_string(),
                description: tool.description().to_string(),
                schema: tool.schema(),
            })
            .map_err(|e| e.to_string()),
            None => Ok(Value::Null),
        },

        WorkerRpc::GuidesList => {
            let guides: Vec<_> = ctx
                .registries
                .guides
                .list()
                .iter()
                .map(|g| (**g).clone())
                .collect();
            serde_json::to_value(guides).map_err(|e| e.to_string())
        }

        WorkerRpc::GuideGet { id } => match ctx.registries.guides.get(&id) {
            Some(guide) => serde_json::to_value((*guide).clone()).map_err(|e| e.to_string()),
            None => Ok(Value::Null),
        },

        WorkerRpc::ProvidersList => {
            let providers: Vec<ProviderDescriptor> = ctx
                .registries
                .providers
                .list()
                .iter()
                .filter(|p| provider_allowed(capabilities, p.id()))
                .map(|p| ProviderDescriptor {
                    id: p.id().to_string(),
                    name: p.name().to_string(),
                    models: p.models(),
                })
                .collect();
            serde_json::to_value(providers).map_err(|e| e.to_string())
        }

        WorkerRpc::ProviderGet { id } => {
            if !provider_allowed(capabilities, &id) {
                return Ok(Value::Null);
            }
            match ctx.registries.providers.get(&id) {
                Some(provider) => serde_json::to_value(ProviderDescriptor {
                    id: provider.id().to_string(),
                    name: provider.name().to_string(),
                    models: provider.models(),
                })
                .map_err(|e| e.to_string()),
                None => Ok(Value::Null),
            }
        }

        WorkerRpc::BusSubscribe { event_type } => {
            subscriptions.lock().insert(event_type);
            Ok(json!({"ok": true}))
        }

        WorkerRpc::BusUnsubscribe { event_type } => {
            let removed = subscriptions.lock().remove(&event_type);
            Ok(json!({"ok": removed}))
        }
    }
}

fn provider_allowed(capabilities: &CapabilityDeclarations, id: &str) -> bool {
    match &capabilities.allowed_providers {
        None => true,
        Some(allowed) => allowed.iter().any(|a| a == id),
    }
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;

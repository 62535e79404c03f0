// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host↔worker wire protocol.
//!
//! One JSON object per line, UTF-8, `\n` terminated. Both directions use
//! a closed tagged union keyed by a string `type` field; frames lacking
//! one, or carrying an unknown tag, are silently dropped. Nothing on
//! this wire is ever a function reference: hook catalogs carry names and
//! schemas only.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::trace;

use starry_core::{
    BusEvent, CapabilityDeclarations, CommandDef, Guide, ModelInfo, RequestId, SessionId,
};

/// Maximum frame size (8 MB). Oversized frames are dropped.
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Tool descriptor shared across the boundary: schema, never code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub id: String,
    pub description: String,
    pub schema: Value,
}

/// Provider descriptor shared across the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub name: String,
    pub models: Vec<ModelInfo>,
}

/// The hooks a plugin returned from its factory, as serialisable
/// descriptors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookCatalog {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,
    #[serde(default)]
    pub guides: Vec<Guide>,
    #[serde(default)]
    pub commands: Vec<CommandDef>,
    /// Event types the plugin wants delivered
    #[serde(default)]
    pub listeners: Vec<String>,
}

/// Serialised context a worker receives at plugin init.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInitContext {
    pub working_dir: PathBuf,
    pub agent_id: String,
    #[serde(default)]
    pub plugin_config: Value,
    #[serde(default)]
    pub capabilities: CapabilityDeclarations,
    /// Module ids the plugin may load; empty means unrestricted
    #[serde(default)]
    pub module_allow: Vec<String>,
    /// Module ids always refused
    #[serde(default)]
    pub module_deny: Vec<String>,
}

/// Serialised tool context passed with each invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireToolContext {
    pub working_dir: PathBuf,
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
}

/// Requests a worker may make of the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum WorkerRpc {
    /// Publish an event on the host bus
    EmitEvent { event_type: String, payload: Value },
    /// Enqueue an input event into the execution loop
    PushInput {
        data: String,
        #[serde(default)]
        session_id: Option<SessionId>,
    },
    SessionCreate {
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    SessionGet { session_id: SessionId },
    SessionDestroy { session_id: SessionId },
    SessionList,
    ToolsList,
    ToolGet { id: String },
    GuidesList,
    GuideGet { id: String },
    ProvidersList,
    ProviderGet { id: String },
    BusSubscribe { event_type: String },
    BusUnsubscribe { event_type: String },
}

/// Frames sent host → worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostMessage {
    #[serde(rename = "INIT_PLUGIN")]
    InitPlugin {
        plugin_path: PathBuf,
        plugin_name: String,
        context: WorkerInitContext,
    },

    #[serde(rename = "INVOKE_TOOL")]
    InvokeTool {
        request_id: RequestId,
        tool_id: String,
        input: Value,
        context: WireToolContext,
    },

    /// Reply to a worker-originated RPC
    #[serde(rename = "HOST_RESPONSE")]
    HostResponse {
        request_id: RequestId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Bus event delivered to a subscribed worker
    #[serde(rename = "EVENT")]
    Event { event: BusEvent },

    /// Clear plugin state and return to the pool
    #[serde(rename = "RESET")]
    Reset,
}

/// Frames sent worker → host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    #[serde(rename = "INIT_COMPLETE")]
    InitComplete { hooks: HookCatalog },

    #[serde(rename = "INIT_ERROR")]
    InitError { message: String },

    #[serde(rename = "TOOL_RESULT")]
    ToolResult {
        request_id: RequestId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "HEARTBEAT")]
    Heartbeat,

    #[serde(rename = "RESET_COMPLETE")]
    ResetComplete,

    /// Worker-originated RPC against the host
    #[serde(rename = "HOST_REQUEST")]
    HostRequest {
        request_id: RequestId,
        #[serde(flatten)]
        request: WorkerRpc,
    },

    /// A module load was refused by policy
    #[serde(rename = "MODULE_BLOCKED")]
    ModuleBlocked { module: String },
}

/// Serialise a frame to its wire line (newline included).
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

/// Parse one wire line into a frame.
///
/// Returns `None` (never an error) for anything that must be silently
/// dropped: non-JSON, non-objects, frames without a string `type`,
/// unknown tags, and oversized lines.
pub fn decode_frame<T: DeserializeOwned>(line: &str) -> Option<T> {
    let line = line.trim();
    if line.is_empty() || line.len() > MAX_FRAME_SIZE {
        return None;
    }

    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => {
            trace!("dropping non-JSON frame");
            return None;
        }
    };

    match value.get("type").and_then(Value::as_str) {
        Some(_) => {}
        None => {
            trace!("dropping frame without string type");
            return None;
        }
    }

    match serde_json::from_value(value) {
        Ok(frame) => Some(frame),
        Err(_) => {
            trace!("dropping frame with unknown or malformed type");
            None
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the sandbox host

use thiserror::Error;

use crate::integrity::IntegrityError;

/// Errors that can occur in the sandbox host
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("integrity check failed for {plugin}: {source}")]
    Integrity {
        plugin: String,
        #[source]
        source: IntegrityError,
    },

    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    #[error("plugin {0} is not loaded")]
    PluginNotLoaded(String),

    #[error("plugin {0} is unavailable: worker restarts exhausted")]
    RestartsExhausted(String),

    #[error("plugin init failed for {plugin}: {message}")]
    InitFailed { plugin: String, message: String },

    #[error("rpc timeout after {0:?}")]
    RpcTimeout(std::time::Duration),

    #[error("worker exited while request was pending")]
    WorkerGone,

    #[error("tool failed: {0}")]
    ToolFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

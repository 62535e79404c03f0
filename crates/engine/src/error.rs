// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine runtime

use thiserror::Error;

/// Errors that can occur in the engine
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to load plugin {plugin}: {message}")]
    PluginLoad { plugin: String, message: String },

    #[error("service dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("no provider available{0}")]
    NoProvider(String),

    #[error("no model available for provider {0}")]
    NoModel(String),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] starry_sandbox::SandboxError),
}

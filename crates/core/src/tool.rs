// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool contract and the execution context handed to tools.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;

/// Errors from tool lookup, validation and execution
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("path not allowed: {0}")]
    PathDenied(String),

    #[error("tool cancelled")]
    Cancelled,

    #[error("tool failed: {0}")]
    Failed(String),
}

/// Context record passed to every tool execution.
#[derive(Clone)]
pub struct ToolContext {
    /// Working directory of the hosting agent
    pub working_dir: PathBuf,
    /// Effective allow-listed paths for the current session
    pub allowed_paths: Vec<PathBuf>,
    /// Cancelled when the driving input is cancelled
    pub cancel: CancellationToken,
    /// Bus handle so tools can publish progress events
    pub bus: EventBus,
}

/// A tool callable by the model.
///
/// `execute` receives arguments already validated against [`schema`]
/// (see [`crate::schema::validate_args`]) and must respect the
/// context's cancellation token across long operations.
///
/// [`schema`]: Tool::schema
#[async_trait]
pub trait Tool: Send + Sync {
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// Declarative parameter schema (JSON-schema subset: `type`,
    /// `properties`, `required`).
    fn schema(&self) -> Value;

    async fn execute(
        &self,
        arguments: Map<String, Value>,
        context: ToolContext,
    ) -> Result<String, ToolError>;
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types shared across the core crate

use thiserror::Error;

use crate::provider::ProviderError;
use crate::schema::SchemaError;
use crate::security::SecurityError;
use crate::tool::ToolError;

/// Errors that can occur in the core runtime
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

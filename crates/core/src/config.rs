// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration file (`config.toml`).
//!
//! One file per agent, loaded once at daemon start. Typed sections use
//! `deny_unknown_fields` so typos fail loudly instead of silently
//! changing behaviour; per-plugin settings stay opaque TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::safety::SafetyConfig;

/// Identity and filesystem scope of the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSection {
    pub id: String,
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default = "default_agent_version")]
    pub version: String,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Paths tools may touch; relative entries resolve against the
    /// working directory
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
}

fn default_agent_name() -> String {
    "openstarry".to_string()
}

fn default_agent_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Default model routing for sessions without overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSection {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub guide: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Execution-loop tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    /// Tool rounds allowed per turn
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Sliding-window size in user turns; 0 disables truncation
    #[serde(default = "default_max_turns")]
    pub max_turns: i64,
}

fn default_max_tool_rounds() -> u32 {
    10
}
fn default_max_turns() -> i64 {
    20
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            max_turns: default_max_turns(),
        }
    }
}

/// Optional overrides of the safety-monitor defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SafetyLimits {
    #[serde(default)]
    pub max_loop_ticks: Option<u32>,
    #[serde(default)]
    pub max_token_usage: Option<u64>,
    #[serde(default)]
    pub repetitive_fail_threshold: Option<usize>,
    #[serde(default)]
    pub frustration_threshold: Option<u32>,
    #[serde(default)]
    pub error_window_size: Option<usize>,
    #[serde(default)]
    pub error_rate_threshold: Option<f64>,
}

impl SafetyLimits {
    /// Apply the overrides on top of the stock defaults.
    pub fn to_config(&self) -> SafetyConfig {
        let defaults = SafetyConfig::default();
        SafetyConfig {
            max_loop_ticks: self.max_loop_ticks.unwrap_or(defaults.max_loop_ticks),
            max_token_usage: self.max_token_usage.unwrap_or(defaults.max_token_usage),
            repetitive_fail_threshold: self
                .repetitive_fail_threshold
                .unwrap_or(defaults.repetitive_fail_threshold),
            frustration_threshold: self
                .frustration_threshold
                .unwrap_or(defaults.frustration_threshold),
            error_window_size: self.error_window_size.unwrap_or(defaults.error_window_size),
            error_rate_threshold: self
                .error_rate_threshold
                .unwrap_or(defaults.error_rate_threshold),
        }
    }
}

/// Daemon-side tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonSettings {
    /// Messages replayed to a newly attaching client
    #[serde(default = "default_replay_limit")]
    pub replay_limit: usize,
    /// Messages kept on disk per session
    #[serde(default = "default_max_history_size")]
    pub max_history_size: usize,
    /// Idle sessions older than this are swept; absent disables the sweep
    #[serde(default)]
    pub session_ttl_secs: Option<u64>,
}

fn default_replay_limit() -> usize {
    50
}
fn default_max_history_size() -> usize {
    1000
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            replay_limit: default_replay_limit(),
            max_history_size: default_max_history_size(),
            session_ttl_secs: None,
        }
    }
}

/// One plugin to load, in config order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginEntry {
    pub name: String,
    /// Path to the plugin binary
    pub path: PathBuf,
    /// Manifest JSON path; defaults to `{path}.manifest.json`
    #[serde(default)]
    pub manifest: Option<PathBuf>,
    /// Opaque per-plugin settings handed to the factory
    #[serde(default)]
    pub config: Option<toml::Value>,
}

impl PluginEntry {
    pub fn manifest_path(&self) -> PathBuf {
        match &self.manifest {
            Some(path) => path.clone(),
            None => {
                let mut os = self.path.clone().into_os_string();
                os.push(".manifest.json");
                PathBuf::from(os)
            }
        }
    }
}

/// Full agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent: AgentSection,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub safety: SafetyLimits,
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

impl AgentConfig {
    /// Load and parse a `config.toml`.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(raw)?;
        if config.agent.id.is_empty() {
            return Err(CoreError::Config("agent.id must not be empty".to_string()));
        }
        Ok(config)
    }

    /// Working directory, defaulting to the process cwd.
    pub fn working_dir(&self) -> PathBuf {
        self.agent
            .working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

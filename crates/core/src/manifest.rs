// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plugin manifest: identity, integrity, sandboxing and capabilities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Signature algorithms accepted for plugin integrity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "ed25519-sha256")]
    Ed25519Sha256,
    #[serde(rename = "rsa-sha256")]
    RsaSha256,
}

/// PKI signature over the plugin binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SignatureDescriptor {
    pub algorithm: SignatureAlgorithm,
    /// Base64-encoded signature bytes
    pub signature: String,
    /// PEM public key
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Integrity declaration: either the legacy SHA-512 hex digest or a
/// typed signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntegrityDescriptor {
    Signature(SignatureDescriptor),
    /// Legacy SHA-512 of the plugin binary, lowercase hex
    LegacyHash(String),
}

/// Worker restart policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartPolicyConfig {
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_reset_window_ms")]
    pub reset_window_ms: u64,
}

fn default_max_restarts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    10_000
}
fn default_reset_window_ms() -> u64 {
    60_000
}

impl Default for RestartPolicyConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            reset_window_ms: default_reset_window_ms(),
        }
    }
}

/// Audit-log configuration for sandboxed RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<std::path::PathBuf>,
    #[serde(default = "default_audit_max_bytes")]
    pub max_size_bytes: u64,
}

fn default_audit_max_bytes() -> u64 {
    10 * 1024 * 1024
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            log_path: None,
            max_size_bytes: default_audit_max_bytes(),
        }
    }
}

/// Sandbox configuration carried by a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Worker memory cap in MB
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    /// CPU-stall timeout: a worker silent this long is terminated
    #[serde(default = "default_cpu_timeout_ms")]
    pub cpu_timeout_ms: u64,
    #[serde(default)]
    pub restart: RestartPolicyConfig,
    /// Module ids the plugin may load; empty means no restriction
    #[serde(default)]
    pub module_allow: Vec<String>,
    /// Module ids always refused, checked before the allow list
    #[serde(default)]
    pub module_deny: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditSettings>,
}

fn default_memory_limit_mb() -> u64 {
    512
}
fn default_cpu_timeout_ms() -> u64 {
    60_000
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            memory_limit_mb: default_memory_limit_mb(),
            cpu_timeout_ms: default_cpu_timeout_ms(),
            restart: RestartPolicyConfig::default(),
            module_allow: Vec::new(),
            module_deny: Vec::new(),
            audit: None,
        }
    }
}

/// Capability declarations gating what a plugin may reach over RPC.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDeclarations {
    /// Provider ids the plugin may query; `None` means all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_providers: Option<Vec<String>>,
}

/// A plugin's manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<IntegrityDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilityDeclarations>,
    /// Service names this plugin provides to others
    #[serde(default)]
    pub services: Vec<String>,
    /// Service names this plugin requires before loading
    #[serde(default)]
    pub service_dependencies: Vec<String>,
}

impl PluginManifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            integrity: None,
            sandbox: None,
            capabilities: None,
            services: Vec::new(),
            service_dependencies: Vec::new(),
        }
    }

    pub fn sandboxed(&self) -> bool {
        self.sandbox.as_ref().map(|s| s.enabled).unwrap_or(false)
    }

    /// Sandbox settings with defaults filled in when absent.
    pub fn sandbox_settings(&self) -> SandboxSettings {
        self.sandbox.clone().unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Audit logging for sandboxed RPC.
//!
//! When a manifest enables auditing, each RPC crossing the sandbox
//! boundary is appended to a JSONL file: category, method, sanitised
//! arguments, result or error, and duration. The file rotates once it
//! exceeds the configured size.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Longest string retained in sanitised args and results.
const MAX_VALUE_LEN: usize = 256;

/// Key fragments whose values are redacted.
const SECRET_MARKERS: &[&str] = &["secret", "token", "password", "key", "credential"];

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub plugin: String,
    pub category: String,
    pub method: String,
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl AuditEntry {
    pub fn new(
        plugin: impl Into<String>,
        category: impl Into<String>,
        method: impl Into<String>,
        args: &Value,
        outcome: Result<&str, &str>,
        duration_ms: u64,
    ) -> Self {
        let (result, error) = match outcome {
            Ok(result) => (Some(truncate(result)), None),
            Err(error) => (None, Some(truncate(error))),
        };
        Self {
            timestamp: Utc::now(),
            plugin: plugin.into(),
            category: category.into(),
            method: method.into(),
            args: sanitize(args),
            result,
            error,
            duration_ms,
        }
    }
}

/// Size-rotated JSONL audit sink.
pub struct AuditLog {
    path: PathBuf,
    max_size_bytes: u64,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: PathBuf, max_size_bytes: u64) -> Self {
        Self {
            path,
            max_size_bytes,
            write_lock: Mutex::new(()),
        }
    }

    /// Append one entry. Failures are logged, never propagated: audit
    /// trouble must not break plugin calls.
    pub fn record(&self, entry: &AuditEntry) {
        let _guard = self.write_lock.lock();

        if let Err(e) = self.rotate_if_needed() {
            warn!(path = %self.path.display(), error = %e, "audit rotation failed");
        }
        if let Err(e) = self.append(entry) {
            warn!(path = %self.path.display(), error = %e, "audit append failed");
        }
    }

    fn append(&self, entry: &AuditEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(entry).unwrap_or_else(|_| "{}".to_string());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if size < self.max_size_bytes {
            return Ok(());
        }

        let mut rotated = self.path.clone().into_os_string();
        rotated.push(".1");
        fs::rename(&self.path, PathBuf::from(rotated))?;
        Ok(())
    }
}

/// Redact secret-looking keys and truncate oversized strings.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, inner) in map {
                let lowered = key.to_lowercase();
                if SECRET_MARKERS.iter().any(|m| lowered.contains(m)) {
                    out.insert(key.clone(), Value::String("[redacted]".to_string()));
                } else {
                    out.insert(key.clone(), sanitize(inner));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        Value::String(s) => Value::String(truncate(s)),
        other => other.clone(),
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_VALUE_LEN {
        return s.to_string();
    }
    let mut end = MAX_VALUE_LEN;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…[truncated {} bytes]", &s[..end], s.len() - end)
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;

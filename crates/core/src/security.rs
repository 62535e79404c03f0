// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem path validation against agent and session allow-lists.
//!
//! The agent config declares the paths tools may touch. A session may
//! narrow that list via its `allowedPaths` config override; it can never
//! widen it. Matching is lexical and component-wise, so `/allowedfoo`
//! does not slip under `/allowed`.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::id::SessionId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecurityError {
    #[error("path not allowed: {0}")]
    Denied(String),

    #[error("no allowed paths configured")]
    NoAllowedPaths,
}

/// Source of per-session allow-list overrides.
pub trait SessionPathOverrides: Send + Sync {
    fn allowed_paths(&self, session: &SessionId) -> Option<Vec<PathBuf>>;
}

/// Validates target paths against the effective allow-list.
pub struct PathGuard {
    base_dir: PathBuf,
    agent_paths: Vec<PathBuf>,
    overrides: Option<Arc<dyn SessionPathOverrides>>,
}

impl PathGuard {
    /// Build a guard from agent-level allowed paths.
    ///
    /// Relative entries are resolved against `base_dir`; every entry is
    /// normalised once here.
    pub fn new(base_dir: impl Into<PathBuf>, agent_paths: &[PathBuf]) -> Self {
        let base_dir = base_dir.into();
        let agent_paths = agent_paths
            .iter()
            .map(|p| normalize(&base_dir, p))
            .collect();
        Self {
            base_dir,
            agent_paths,
            overrides: None,
        }
    }

    /// Attach a session-override accessor (usually the session manager).
    pub fn with_overrides(mut self, overrides: Arc<dyn SessionPathOverrides>) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// The agent-level allow-list after normalisation.
    pub fn agent_paths(&self) -> &[PathBuf] {
        &self.agent_paths
    }

    /// Compute the allow-list in effect for `session`.
    ///
    /// A session override is honoured only where it is a subset of the
    /// agent list; entries outside it are logged and dropped. When
    /// nothing valid remains (or no override exists), the agent list
    /// applies.
    pub fn effective_paths(&self, session: Option<&SessionId>) -> Vec<PathBuf> {
        let Some(session) = session else {
            return self.agent_paths.clone();
        };
        let Some(overrides) = &self.overrides else {
            return self.agent_paths.clone();
        };
        let Some(session_paths) = overrides.allowed_paths(session) else {
            return self.agent_paths.clone();
        };

        let mut effective = Vec::new();
        for path in &session_paths {
            let normalized = normalize(&self.base_dir, path);
            if contained_in_any(&normalized, &self.agent_paths) {
                effective.push(normalized);
            } else {
                warn!(
                    session_id = %session,
                    path = %normalized.display(),
                    "session allowed path outside agent allow-list, dropped",
                );
            }
        }

        if effective.is_empty() {
            self.agent_paths.clone()
        } else {
            effective
        }
    }

    /// Validate `target` for `session`; returns the normalised path.
    pub fn validate_path(
        &self,
        target: &Path,
        session: Option<&SessionId>,
    ) -> Result<PathBuf, SecurityError> {
        let effective = self.effective_paths(session);
        if effective.is_empty() {
            return Err(SecurityError::NoAllowedPaths);
        }

        let normalized = normalize(&self.base_dir, target);
        if contained_in_any(&normalized, &effective) {
            Ok(normalized)
        } else {
            Err(SecurityError::Denied(normalized.display().to_string()))
        }
    }
}

/// True when `path` equals an allowed prefix or sits under one.
///
/// `Path::starts_with` matches whole components only, which supplies
/// the separator-boundary rule.
fn contained_in_any(path: &Path, allowed: &[PathBuf]) -> bool {
    allowed.iter().any(|prefix| path.starts_with(prefix))
}

/// Lexically absolutise and fold `.` / `..` components.
///
/// No filesystem access: symlinks are not resolved, and `..` at the
/// root stays at the root.
fn normalize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[cfg(test)]
#[path = "security_tests.rs"]
mod tests;

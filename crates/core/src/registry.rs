// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Name-keyed hook catalogs populated by plugins.
//!
//! One generic [`Registry`] backs every catalog; registration order is
//! preserved so listings reflect plugin load order.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::Provider;
use crate::tool::Tool;

/// A guide supplies the system prompt for a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guide {
    pub id: String,
    pub system_prompt: String,
}

/// Declarative slash-command description registered by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Declarative event-listener interest registered by a plugin.
///
/// Sandboxed plugins cannot pass function references across the process
/// boundary; their listeners are interest declarations the host uses to
/// route events back over RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerDef {
    pub event_type: String,
    pub plugin: String,
}

/// Declarative UI-renderer description registered by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiDef {
    pub id: String,
    #[serde(default)]
    pub description: String,
}

/// A named service a plugin offers to other plugins.
///
/// The descriptor is opaque JSON; service payloads stay declarative so
/// the same type serves in-process and sandboxed plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDef {
    pub name: String,
    pub plugin: String,
    #[serde(default)]
    pub descriptor: Value,
}

/// Generic name-keyed catalog with preserved insertion order.
pub struct Registry<T: ?Sized + Send + Sync> {
    entries: RwLock<IndexMap<String, Arc<T>>>,
}

impl<T: ?Sized + Send + Sync> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
        }
    }

    /// Register under `name`, replacing any previous entry.
    ///
    /// Returns true when an existing entry was replaced.
    pub fn register(&self, name: impl Into<String>, value: Arc<T>) -> bool {
        self.entries.write().insert(name.into(), value).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<T>> {
        self.entries.write().shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Entries in registration order.
    pub fn list(&self) -> Vec<Arc<T>> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<T: ?Sized + Send + Sync> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The full set of catalogs a runtime exposes to plugins and the loop.
#[derive(Default)]
pub struct Registries {
    pub tools: Registry<dyn Tool>,
    pub providers: Registry<dyn Provider>,
    pub guides: Registry<Guide>,
    pub commands: Registry<CommandDef>,
    pub listeners: Registry<ListenerDef>,
    pub uis: Registry<UiDef>,
    pub services: Registry<ServiceDef>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

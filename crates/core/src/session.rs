// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session manager: isolated conversation contexts and their stores.
//!
//! Every runtime owns one manager. The default session (the literal
//! `__default__` id) exists from construction, is the fallback for
//! inputs that carry no session id, and can never be destroyed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::bus::EventBus;
use crate::event::names;
use crate::id::SessionId;
use crate::state::StateStore;

/// The undestroyable default session id.
pub const DEFAULT_SESSION_ID: &str = "__default__";

/// Typed view of the `config` sub-mapping in session metadata.
///
/// Open-ended keys beyond the known ones are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_paths: Option<Vec<PathBuf>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A conversation session's identity and metadata.
///
/// The message transcript lives in the session's [`StateStore`], owned
/// by the manager and shared out as `Arc<Mutex<_>>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Session {
    fn new(id: SessionId, metadata: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            metadata,
        }
    }

    /// Parse the typed `config` sub-mapping, if present and well formed.
    pub fn config(&self) -> Option<SessionConfig> {
        let raw = self.metadata.get("config")?;
        match serde_json::from_value(raw.clone()) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "malformed session config ignored");
                None
            }
        }
    }
}

struct Entry {
    session: Session,
    state: Arc<Mutex<StateStore>>,
}

/// Owns all sessions and their state stores.
pub struct SessionManager {
    bus: EventBus,
    sessions: RwLock<HashMap<SessionId, Entry>>,
}

impl SessionManager {
    /// Construct the manager with its permanent default session.
    pub fn new(bus: EventBus) -> Self {
        let mut sessions = HashMap::new();
        let default_id = SessionId::new(DEFAULT_SESSION_ID);
        sessions.insert(
            default_id.clone(),
            Entry {
                session: Session::new(default_id, Map::new()),
                state: Arc::new(Mutex::new(StateStore::new())),
            },
        );
        Self {
            bus,
            sessions: RwLock::new(sessions),
        }
    }

    /// Allocate a new session with a UUID id.
    pub async fn create(&self, metadata: Map<String, Value>) -> Session {
        let id = SessionId::new(uuid::Uuid::new_v4().to_string());
        self.insert(id, metadata).await
    }

    /// Create a session under a caller-chosen id, or return the existing
    /// one. Used by the daemon's attach path.
    pub async fn create_with_id(
        &self,
        id: SessionId,
        metadata: Map<String, Value>,
    ) -> (Session, bool) {
        if let Some(existing) = self.get(&id) {
            return (existing, false);
        }
        (self.insert(id, metadata).await, true)
    }

    async fn insert(&self, id: SessionId, metadata: Map<String, Value>) -> Session {
        let session = Session::new(id.clone(), metadata);
        self.sessions.write().insert(
            id.clone(),
            Entry {
                session: session.clone(),
                state: Arc::new(Mutex::new(StateStore::new())),
            },
        );
        self.bus
            .emit(names::SESSION_CREATED, json!({"sessionId": id.as_str()}))
            .await;
        session
    }

    /// Session by id, if known.
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().get(id).map(|e| e.session.clone())
    }

    /// Destroy a session: clears its store and removes it.
    ///
    /// Refuses the default session and unknown ids.
    pub async fn destroy(&self, id: &SessionId) -> bool {
        if id.as_str() == DEFAULT_SESSION_ID {
            return false;
        }
        let removed = {
            let mut sessions = self.sessions.write();
            match sessions.remove(id) {
                Some(entry) => {
                    entry.state.lock().clear();
                    true
                }
                None => false,
            }
        };
        if removed {
            self.bus
                .emit(names::SESSION_DESTROYED, json!({"sessionId": id.as_str()}))
                .await;
        }
        removed
    }

    /// State store for `id`, falling back to the default store.
    ///
    /// An unknown id is logged, not an error: clients that predate
    /// session support send none and land on the default session.
    pub fn state_store(&self, id: Option<&SessionId>) -> Arc<Mutex<StateStore>> {
        let sessions = self.sessions.read();
        if let Some(id) = id {
            if let Some(entry) = sessions.get(id) {
                return Arc::clone(&entry.state);
            }
            warn!(session_id = %id, "unknown session id, using default session");
        }
        // The default entry is created in new() and never removed.
        sessions
            .get(DEFAULT_SESSION_ID)
            .map(|e| Arc::clone(&e.state))
            .unwrap_or_default()
    }

    /// The permanent default session.
    pub fn default_session(&self) -> Session {
        self.get(&SessionId::new(DEFAULT_SESSION_ID))
            .unwrap_or_else(|| Session::new(SessionId::new(DEFAULT_SESSION_ID), Map::new()))
    }

    /// Resolve an optional id to the session that will own an input.
    pub fn resolve_id(&self, id: Option<&SessionId>) -> SessionId {
        match id {
            Some(id) if self.sessions.read().contains_key(id) => id.clone(),
            _ => SessionId::new(DEFAULT_SESSION_ID),
        }
    }

    /// Typed config for a session, when present.
    pub fn session_config(&self, id: &SessionId) -> Option<SessionConfig> {
        self.get(id).and_then(|s| s.config())
    }

    /// Bump a session's `updated_at` to now.
    pub fn touch(&self, id: &SessionId) {
        if let Some(entry) = self.sessions.write().get_mut(id) {
            entry.session.updated_at = Utc::now();
        }
    }

    /// All sessions, default included, in no particular order.
    pub fn list(&self) -> Vec<Session> {
        self.sessions
            .read()
            .values()
            .map(|e| e.session.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        false // the default session always exists
    }
}

impl crate::security::SessionPathOverrides for SessionManager {
    fn allowed_paths(&self, session: &SessionId) -> Option<Vec<PathBuf>> {
        self.session_config(session).and_then(|c| c.allowed_paths)
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

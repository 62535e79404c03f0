// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debounced session persistence with an atomic on-disk layout.
//!
//! Layout per agent id under the store root:
//!
//! ```text
//! {root}/{agent}/index.json
//! {root}/{agent}/{session}.json
//! {root}/{agent}/{session}.messages.json
//! ```
//!
//! Every write goes through a sibling `.tmp` file and an atomic rename,
//! at mode 0o600. Saves debounce: a 10 s timer restarted per save, with
//! a forced flush once five saves are pending for a session.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use starry_core::{Message, Session, SessionId};

/// Errors surfaced by explicit load/delete calls. Saves never throw.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
}

/// Session metadata as written to `{session}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, serde_json::Value>,
}

impl From<&Session> for PersistedSession {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.as_str().to_string(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            metadata: session.metadata.clone(),
        }
    }
}

impl PersistedSession {
    pub fn into_session(self) -> Session {
        Session {
            id: SessionId::new(self.id),
            created_at: self.created_at,
            updated_at: self.updated_at,
            metadata: self.metadata,
        }
    }
}

/// One row of `index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIndexEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, serde_json::Value>,
    pub message_count: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionIndex {
    sessions: Vec<SessionIndexEntry>,
}

struct DebounceEntry {
    pending: u32,
    timer: Option<CancellationToken>,
    session: PersistedSession,
    messages: Vec<Message>,
}

/// Debounced writer over the per-agent session layout.
pub struct SessionStore {
    root: PathBuf,
    max_history: usize,
    debounce: Duration,
    flush_after: u32,
    entries: Mutex<HashMap<(String, String), DebounceEntry>>,
}

impl SessionStore {
    /// Store rooted at `{root}` (usually `{statePath}/sessions`).
    pub fn new(root: PathBuf, max_history: usize) -> Arc<Self> {
        Arc::new(Self {
            root,
            max_history,
            debounce: Duration::from_secs(10),
            flush_after: 5,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Test hook: shorten the debounce window.
    pub fn with_debounce(root: PathBuf, max_history: usize, debounce: Duration) -> Arc<Self> {
        Arc::new(Self {
            root,
            max_history,
            debounce,
            flush_after: 5,
            entries: Mutex::new(HashMap::new()),
        })
    }

    fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.root.join(agent_id)
    }

    fn session_path(&self, agent_id: &str, session_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join(format!("{session_id}.json"))
    }

    fn messages_path(&self, agent_id: &str, session_id: &str) -> PathBuf {
        self.agent_dir(agent_id)
            .join(format!("{session_id}.messages.json"))
    }

    fn index_path(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("index.json")
    }

    /// Queue a save for `(agent, session)`.
    ///
    /// The newest payload always wins; the write happens when the
    /// debounce timer fires or five saves have accumulated. Never
    /// returns an error: persistence trouble is logged and the dirty
    /// data stays queued for the next attempt.
    pub fn save(self: &Arc<Self>, agent_id: &str, session: &Session, messages: &[Message]) {
        if let Err(e) = validate_id(agent_id).and_then(|_| validate_id(session.id.as_str())) {
            warn!(error = %e, "refusing to persist session with invalid id");
            return;
        }

        let key = (agent_id.to_string(), session.id.as_str().to_string());
        let flush_now = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(|| DebounceEntry {
                pending: 0,
                timer: None,
                session: PersistedSession::from(session),
                messages: Vec::new(),
            });
            entry.session = PersistedSession::from(session);
            entry.messages = messages.to_vec();
            entry.pending += 1;

            if let Some(timer) = entry.timer.take() {
                timer.cancel();
            }

            if entry.pending >= self.flush_after {
                true
            } else {
                let token = CancellationToken::new();
                entry.timer = Some(token.clone());
                let store = Arc::clone(self);
                let key = key.clone();
                let debounce = self.debounce;
                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(debounce) => store.flush_key(&key),
                    }
                });
                false
            }
        };

        if flush_now {
            self.flush_key(&key);
        }
    }

    /// Write one key's queued payload immediately.
    fn flush_key(&self, key: &(String, String)) {
        let payload = {
            let mut entries = self.entries.lock();
            match entries.remove(key) {
                Some(entry) => {
                    if let Some(timer) = &entry.timer {
                        timer.cancel();
                    }
                    Some((entry.session, entry.messages))
                }
                None => None,
            }
        };

        let Some((session, messages)) = payload else {
            return;
        };
        if let Err(e) = self.write_now(&key.0, &session, &messages) {
            warn!(agent = %key.0, session = %key.1, error = %e, "session save failed");
            // Requeue the payload so the next save retries it.
            let mut entries = self.entries.lock();
            entries.entry(key.clone()).or_insert(DebounceEntry {
                pending: 0,
                timer: None,
                session,
                messages,
            });
        }
    }

    /// Flush every queued payload. Called on shutdown.
    pub fn flush_all(&self) {
        let keys: Vec<(String, String)> = self.entries.lock().keys().cloned().collect();
        for key in keys {
            self.flush_key(&key);
        }
    }

    /// Synchronous write of one session and its messages.
    pub fn write_now(
        &self,
        agent_id: &str,
        session: &PersistedSession,
        messages: &[Message],
    ) -> Result<(), PersistenceError> {
        validate_id(agent_id)?;
        validate_id(&session.id)?;

        let dir = self.agent_dir(agent_id);
        fs::create_dir_all(&dir)?;

        let tail_start = messages.len().saturating_sub(self.max_history);
        let tail = &messages[tail_start..];

        write_atomic(&self.session_path(agent_id, &session.id), session)?;
        write_atomic(&self.messages_path(agent_id, &session.id), &tail)?;

        let mut index = self.read_index(agent_id).unwrap_or_default();
        index.sessions.retain(|entry| entry.id != session.id);
        index.sessions.push(SessionIndexEntry {
            id: session.id.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            metadata: session.metadata.clone(),
            message_count: tail.len(),
        });
        write_atomic(&self.index_path(agent_id), &index)?;
        debug!(agent = %agent_id, session = %session.id, messages = tail.len(), "session persisted");
        Ok(())
    }

    /// Load a session and its messages.
    ///
    /// Missing files and corrupt JSON both come back as `None`; only
    /// invalid ids and unexpected I/O failures are errors.
    pub fn load(
        &self,
        agent_id: &str,
        session_id: &str,
    ) -> Result<Option<(PersistedSession, Vec<Message>)>, PersistenceError> {
        validate_id(agent_id)?;
        validate_id(session_id)?;

        let session_path = self.session_path(agent_id, session_id);
        let messages_path = self.messages_path(agent_id, session_id);
        if !session_path.exists() || !messages_path.exists() {
            return Ok(None);
        }

        let session: PersistedSession = match read_json(&session_path) {
            Ok(session) => session,
            Err(e) => {
                warn!(path = %session_path.display(), error = %e, "corrupt session file");
                return Ok(None);
            }
        };
        let messages: Vec<Message> = match read_json(&messages_path) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(path = %messages_path.display(), error = %e, "corrupt messages file");
                return Ok(None);
            }
        };
        Ok(Some((session, messages)))
    }

    /// All persisted sessions for an agent.
    ///
    /// Uses `index.json` when valid, else rebuilds it by scanning for
    /// paired metadata + messages files.
    pub fn list_sessions(&self, agent_id: &str) -> Result<Vec<SessionIndexEntry>, PersistenceError> {
        validate_id(agent_id)?;

        if let Ok(index) = self.read_index(agent_id) {
            return Ok(index.sessions);
        }

        let rebuilt = self.rebuild_index(agent_id)?;
        Ok(rebuilt.sessions)
    }

    fn read_index(&self, agent_id: &str) -> Result<SessionIndex, PersistenceError> {
        read_json(&self.index_path(agent_id))
    }

    /// Scan the agent directory for session pairs and rewrite the index.
    fn rebuild_index(&self, agent_id: &str) -> Result<SessionIndex, PersistenceError> {
        let dir = self.agent_dir(agent_id);
        let mut index = SessionIndex::default();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(index),
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(session_id) = name.strip_suffix(".json") else {
                continue;
            };
            if session_id == "index" || session_id.ends_with(".messages") {
                continue;
            }
            if !self.messages_path(agent_id, session_id).exists() {
                continue;
            }
            let Ok(session) = read_json::<PersistedSession>(&entry.path()) else {
                continue;
            };
            let message_count = read_json::<Vec<Message>>(&self.messages_path(agent_id, session_id))
                .map(|m| m.len())
                .unwrap_or(0);
            index.sessions.push(SessionIndexEntry {
                id: session.id,
                created_at: session.created_at,
                updated_at: session.updated_at,
                metadata: session.metadata,
                message_count,
            });
        }

        index.sessions.sort_by(|a, b| a.id.cmp(&b.id));
        if let Err(e) = write_atomic(&self.index_path(agent_id), &index) {
            warn!(agent = %agent_id, error = %e, "index rebuild write failed");
        }
        Ok(index)
    }

    /// Remove a session's files and its index entry.
    pub fn delete(&self, agent_id: &str, session_id: &str) -> Result<bool, PersistenceError> {
        validate_id(agent_id)?;
        validate_id(session_id)?;

        self.entries
            .lock()
            .remove(&(agent_id.to_string(), session_id.to_string()));

        let session_path = self.session_path(agent_id, session_id);
        let messages_path = self.messages_path(agent_id, session_id);
        let existed = session_path.exists() || messages_path.exists();

        if session_path.exists() {
            fs::remove_file(&session_path)?;
        }
        if messages_path.exists() {
            fs::remove_file(&messages_path)?;
        }

        if let Ok(mut index) = self.read_index(agent_id) {
            index.sessions.retain(|entry| entry.id != session_id);
            if let Err(e) = write_atomic(&self.index_path(agent_id), &index) {
                warn!(agent = %agent_id, error = %e, "index update after delete failed");
            }
        }
        Ok(existed)
    }

    /// Delete sessions idle longer than `ttl`. Returns removed ids.
    pub fn cleanup_expired(
        &self,
        agent_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, PersistenceError> {
        let cutoff = now - chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let mut removed = Vec::new();
        for entry in self.list_sessions(agent_id)? {
            if entry.updated_at < cutoff {
                self.delete(agent_id, &entry.id)?;
                removed.push(entry.id);
            }
        }
        Ok(removed)
    }
}

/// Reject ids that could escape the agent directory.
fn validate_id(id: &str) -> Result<(), PersistenceError> {
    if id.is_empty() || id.contains('/') || id.contains("..") || id.contains('\\') {
        return Err(PersistenceError::InvalidSessionId(id.to_string()));
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

/// Write JSON through a sibling `.tmp` and an atomic rename, 0o600.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let tmp_path = match path.file_name() {
        Some(name) => {
            let mut tmp = name.to_os_string();
            tmp.push(".tmp");
            path.with_file_name(tmp)
        }
        None => path.with_extension("tmp"),
    };

    {
        let file = File::create(&tmp_path)?;
        set_owner_only(&file)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_only(file: &File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
#[path = "session_store_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PID and endpoint lifecycle: file layout, liveness probes, stale
//! cleanup, and the detached daemon-start flow.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::DaemonClient;

/// Errors from lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("agent {agent} is already running (pid {pid})")]
    AlreadyRunning { agent: String, pid: i32 },

    #[error("daemon did not become ready within {0:?}")]
    NotReady(Duration),

    #[error("ping failed: {0}")]
    PingFailed(String),

    #[error("local sockets are unsupported on this platform")]
    Unsupported,
}

/// Filesystem layout under one agent state directory.
#[derive(Debug, Clone)]
pub struct AgentPaths {
    state_path: PathBuf,
}

impl AgentPaths {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
        }
    }

    /// Default state path: `~/.openstarry`.
    pub fn default_state_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".openstarry")
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn pids_dir(&self) -> PathBuf {
        self.state_path.join("pids")
    }

    pub fn pid_file(&self, agent_id: &str) -> PathBuf {
        self.pids_dir().join(format!("{agent_id}.pid"))
    }

    pub fn log_file(&self, agent_id: &str) -> PathBuf {
        self.state_path.join("logs").join(format!("{agent_id}.log"))
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.state_path.join("sessions")
    }

    pub fn endpoint(&self, agent_id: &str) -> PathBuf {
        endpoint_path(&self.state_path, agent_id)
    }
}

/// Local endpoint for an agent: a socket path on POSIX, a named-pipe
/// name elsewhere.
pub fn endpoint_path(state_path: &Path, agent_id: &str) -> PathBuf {
    if cfg!(unix) {
        state_path.join("sockets").join(format!("{agent_id}.sock"))
    } else {
        let digest = Sha256::digest(state_path.to_string_lossy().as_bytes());
        let hash8 = hex_prefix(&digest, 8);
        PathBuf::from(format!("\\\\.\\pipe\\openstarry-{agent_id}-{hash8}"))
    }
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::new();
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}

/// Write `pid` to a pid file, creating the parent directory.
pub fn write_pid_file(path: &Path, pid: u32) -> Result<(), LifecycleError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{pid}\n"))?;
    Ok(())
}

/// Read a pid file. Absence, parse failure and non-positive values all
/// come back as `None`.
pub fn read_pid_file(path: &Path) -> Option<i32> {
    let contents = std::fs::read_to_string(path).ok()?;
    let pid: i32 = contents.trim().parse().ok()?;
    if pid > 0 {
        Some(pid)
    } else {
        None
    }
}

pub fn delete_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove pid file");
        }
    }
}

/// Probe whether a pid is alive (signal 0 on POSIX).
#[cfg(unix)]
pub fn pid_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: i32) -> bool {
    false
}

/// Remove stale pid/endpoint files.
///
/// No pid file: drop any leftover endpoint. Pid file naming a dead
/// process: drop both. A live pid leaves everything alone.
pub fn clean_stale(pid_path: &Path, endpoint: &Path) {
    match read_pid_file(pid_path) {
        None => {
            if endpoint.exists() {
                debug!(endpoint = %endpoint.display(), "removing orphaned endpoint");
                let _ = std::fs::remove_file(endpoint);
            }
            if pid_path.exists() {
                // Unreadable pid file counts as stale.
                delete_pid_file(pid_path);
            }
        }
        Some(pid) if !pid_alive(pid) => {
            debug!(pid, "removing stale pid and endpoint files");
            delete_pid_file(pid_path);
            let _ = std::fs::remove_file(endpoint);
        }
        Some(_) => {}
    }
}

/// Enumerate agents with a live pid under the pids directory.
pub fn list_running_agents(pids_dir: &Path) -> Vec<(String, i32)> {
    let mut running = Vec::new();
    let Ok(entries) = std::fs::read_dir(pids_dir) else {
        return running;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(agent_id) = name.strip_suffix(".pid") else {
            continue;
        };
        if let Some(pid) = read_pid_file(&entry.path()) {
            if pid_alive(pid) {
                running.push((agent_id.to_string(), pid));
            }
        }
    }
    running.sort();
    running
}

/// How to launch the daemon binary.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Path to the `starryd` binary
    pub daemon_bin: PathBuf,
    pub agent_id: String,
    pub config_path: PathBuf,
    pub state_path: PathBuf,
    /// How long to poll the endpoint for readiness
    pub ready_timeout: Duration,
}

impl SpawnOptions {
    pub fn new(daemon_bin: PathBuf, agent_id: impl Into<String>, config_path: PathBuf) -> Self {
        Self {
            daemon_bin,
            agent_id: agent_id.into(),
            config_path,
            state_path: AgentPaths::default_state_path(),
            ready_timeout: Duration::from_secs(5),
        }
    }
}

/// Start the daemon detached and wait for it to answer a ping.
///
/// Refuses when a live pid exists; cleans stale files otherwise. The
/// child owns its own pid file; stdio goes to the agent log and the
/// parent does not wait on the child.
pub async fn spawn_daemon(options: &SpawnOptions) -> Result<(), LifecycleError> {
    let paths = AgentPaths::new(&options.state_path);
    let pid_path = paths.pid_file(&options.agent_id);
    let endpoint = paths.endpoint(&options.agent_id);
    let log_path = paths.log_file(&options.agent_id);

    if let Some(pid) = read_pid_file(&pid_path) {
        if pid_alive(pid) {
            return Err(LifecycleError::AlreadyRunning {
                agent: options.agent_id.clone(),
                pid,
            });
        }
    }
    clean_stale(&pid_path, &endpoint);

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_out = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let log_err = log_out.try_clone()?;

    let mut command = std::process::Command::new(&options.daemon_bin);
    command
        .arg("--agent-id")
        .arg(&options.agent_id)
        .arg("--config")
        .arg(&options.config_path)
        .arg("--pid-file")
        .arg(&pid_path)
        .arg("--socket")
        .arg(&endpoint)
        .arg("--log-file")
        .arg(&log_path)
        .env("OPENSTARRY_DAEMON", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_out))
        .stderr(Stdio::from(log_err));

    // Detach: the child is not waited on; it re-parents to init.
    let child = command.spawn()?;
    info!(agent = %options.agent_id, pid = child.id(), "daemon spawned");
    drop(child);

    wait_ready(&endpoint, options.ready_timeout).await?;

    // Confirm responsiveness end to end.
    let mut client = DaemonClient::connect(&endpoint)
        .await
        .map_err(|e| LifecycleError::PingFailed(e.to_string()))?;
    client
        .ping()
        .await
        .map_err(|e| LifecycleError::PingFailed(e.to_string()))?;
    Ok(())
}

/// Poll the endpoint until it accepts a connection.
#[cfg(unix)]
async fn wait_ready(endpoint: &Path, timeout: Duration) -> Result<(), LifecycleError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if endpoint.exists() && tokio::net::UnixStream::connect(endpoint).await.is_ok() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(LifecycleError::NotReady(timeout));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(not(unix))]
async fn wait_ready(_endpoint: &Path, _timeout: Duration) -> Result<(), LifecycleError> {
    Err(LifecycleError::Unsupported)
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;

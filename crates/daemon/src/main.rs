// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OpenStarry Daemon (starryd)
//!
//! Background process that hosts the agent runtime and serves RPC on a
//! local Unix socket. Normally spawned by a front-end via the
//! lifecycle helpers; it writes its own pid file and removes its
//! pid/socket files on shutdown.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use fs2::FileExt;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use starry_core::AgentConfig;
use starry_daemon::lifecycle::{delete_pid_file, AgentPaths};
use starry_daemon::service::{DaemonService, ServiceOptions};
use starry_sandbox::{ProcessSpawner, WorkerSpawner};

/// Rotate the previous log aside once it outgrows this.
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

struct Args {
    agent_id: String,
    config: PathBuf,
    pid_file: Option<PathBuf>,
    socket: Option<PathBuf>,
    log_file: Option<PathBuf>,
    state_path: PathBuf,
}

fn parse_args() -> Result<Args, String> {
    let mut agent_id = None;
    let mut config = None;
    let mut pid_file = None;
    let mut socket = None;
    let mut log_file = None;
    let mut state_path = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--agent-id" => agent_id = args.next(),
            "--config" => config = args.next().map(PathBuf::from),
            "--pid-file" => pid_file = args.next().map(PathBuf::from),
            "--socket" => socket = args.next().map(PathBuf::from),
            "--log-file" => log_file = args.next().map(PathBuf::from),
            "--state-path" => state_path = args.next().map(PathBuf::from),
            "--help" | "-h" => {
                println!("starryd {}", env!("CARGO_PKG_VERSION"));
                println!("OpenStarry daemon - hosts the agent runtime and serves RPC");
                println!();
                println!("USAGE:");
                println!("    starryd --agent-id <id> --config <path> [--pid-file <p>]");
                println!("            [--socket <s>] [--log-file <l>] [--state-path <dir>]");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("starryd {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => return Err(format!("unexpected argument '{other}'")),
        }
    }

    Ok(Args {
        agent_id: agent_id.ok_or("--agent-id is required")?,
        config: config.ok_or("--config is required")?,
        pid_file,
        socket,
        log_file,
        state_path: state_path.unwrap_or_else(AgentPaths::default_state_path),
    })
}

#[tokio::main]
async fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("Usage: starryd --agent-id <id> --config <path>");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args).await {
        eprintln!("starryd: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let paths = AgentPaths::new(&args.state_path);
    let pid_path = args
        .pid_file
        .clone()
        .unwrap_or_else(|| paths.pid_file(&args.agent_id));
    let socket_path = args
        .socket
        .clone()
        .unwrap_or_else(|| paths.endpoint(&args.agent_id));
    let log_path = args
        .log_file
        .clone()
        .unwrap_or_else(|| paths.log_file(&args.agent_id));

    rotate_log_if_needed(&log_path);
    let _log_guard = setup_logging(&log_path)?;

    info!(agent = %args.agent_id, "starting daemon");

    // Exclusive pid-file lock first: one daemon per agent. Opened
    // without truncation so a losing race never wipes the winner's pid.
    if let Some(parent) = pid_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&pid_path)?;
    if lock_file.try_lock_exclusive().is_err() {
        eprintln!("starryd is already running for agent {}", args.agent_id);
        std::process::exit(1);
    }
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let _lock_file = lock_file; // held for the daemon's lifetime

    let config = AgentConfig::load(&args.config)?;
    if config.agent.id != args.agent_id {
        warn!(
            config_agent = %config.agent.id,
            arg_agent = %args.agent_id,
            "agent id mismatch between config and arguments",
        );
    }

    let worker_spawner: Option<Arc<dyn WorkerSpawner>> = match ProcessSpawner::sibling_worker() {
        Ok(spawner) => Some(Arc::new(spawner)),
        Err(e) => {
            warn!(error = %e, "worker binary not found, sandboxed plugins disabled");
            None
        }
    };

    let mut options = ServiceOptions::new(config, args.state_path.clone());
    options.worker_spawner = worker_spawner;
    let service = DaemonService::build(options).await?;

    let restored = service.restore_sessions().await;
    if restored > 0 {
        info!(count = restored, "sessions restored from disk");
    }

    // Bind the endpoint at mode 0o600.
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = tokio::net::UnixListener::bind(&socket_path)?;
    restrict_socket_mode(&socket_path);

    info!(socket = %socket_path.display(), "daemon ready");
    println!("READY");

    // Serve until a signal or an `agent.stop` request.
    let server = tokio::spawn(starry_daemon::server::serve(
        Arc::clone(&service),
        listener,
    ));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = sigint.recv() => info!("SIGINT received"),
        _ = service.shutdown.cancelled() => info!("stop requested"),
    }

    service.shutdown.cancel();
    service.drain().await;
    let _ = server.await;

    if let Err(e) = std::fs::remove_file(&socket_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            error!(error = %e, "failed to remove socket file");
        }
    }
    delete_pid_file(&pid_path);

    info!("daemon stopped");
    Ok(())
}

/// Move an oversized previous log aside (best effort).
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let Ok(metadata) = std::fs::metadata(log_path) else {
        return;
    };
    if metadata.len() <= MAX_LOG_BYTES {
        return;
    }
    let mut rotated = log_path.to_path_buf().into_os_string();
    rotated.push(".1");
    let _ = std::fs::rename(log_path, PathBuf::from(rotated));
}

fn setup_logging(
    log_path: &std::path::Path,
) -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error>> {
    use tracing_subscriber::EnvFilter;

    let dir = log_path.parent().unwrap_or_else(|| std::path::Path::new("."));
    std::fs::create_dir_all(dir)?;
    let file_name = log_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "starryd.log".to_string());

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

#[cfg(unix)]
fn restrict_socket_mode(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!(error = %e, "failed to restrict socket permissions");
    }
}

#[cfg(not(unix))]
fn restrict_socket_mode(_path: &std::path::Path) {}

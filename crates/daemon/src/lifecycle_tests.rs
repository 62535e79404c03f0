// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn pid_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pids/agent.pid");

    write_pid_file(&path, 4321).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "4321\n");
    assert_eq!(read_pid_file(&path), Some(4321));

    delete_pid_file(&path);
    assert_eq!(read_pid_file(&path), None);
}

#[test]
fn unreadable_pid_values_are_none() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agent.pid");

    assert_eq!(read_pid_file(&path), None);

    std::fs::write(&path, "not a pid\n").unwrap();
    assert_eq!(read_pid_file(&path), None);

    std::fs::write(&path, "-5\n").unwrap();
    assert_eq!(read_pid_file(&path), None);

    std::fs::write(&path, "0\n").unwrap();
    assert_eq!(read_pid_file(&path), None);
}

#[cfg(unix)]
#[test]
fn own_pid_is_alive() {
    assert!(pid_alive(std::process::id() as i32));
}

#[cfg(unix)]
#[test]
fn clean_stale_removes_dead_pid_and_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("agent.pid");
    let endpoint = dir.path().join("agent.sock");

    // A reaped child gives us a dead pid.
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id() as i32;
    child.wait().unwrap();

    std::fs::write(&pid_path, format!("{dead_pid}\n")).unwrap();
    std::fs::write(&endpoint, b"").unwrap();

    clean_stale(&pid_path, &endpoint);
    assert!(!pid_path.exists());
    assert!(!endpoint.exists());
}

#[test]
fn clean_stale_drops_orphan_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("agent.pid");
    let endpoint = dir.path().join("agent.sock");
    std::fs::write(&endpoint, b"").unwrap();

    clean_stale(&pid_path, &endpoint);
    assert!(!endpoint.exists());
}

#[cfg(unix)]
#[test]
fn clean_stale_leaves_live_daemon_alone() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("agent.pid");
    let endpoint = dir.path().join("agent.sock");

    write_pid_file(&pid_path, std::process::id()).unwrap();
    std::fs::write(&endpoint, b"").unwrap();

    clean_stale(&pid_path, &endpoint);
    assert!(pid_path.exists());
    assert!(endpoint.exists());
}

#[cfg(unix)]
#[test]
fn list_running_filters_dead_pids() {
    let dir = tempfile::tempdir().unwrap();

    write_pid_file(&dir.path().join("alive.pid"), std::process::id()).unwrap();
    std::fs::write(dir.path().join("dead.pid"), "999999999\n").unwrap();
    std::fs::write(dir.path().join("junk.txt"), "ignored\n").unwrap();

    let running = list_running_agents(dir.path());
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].0, "alive");
}

#[test]
fn agent_paths_layout() {
    let paths = AgentPaths::new("/state");
    assert_eq!(paths.pid_file("a1"), PathBuf::from("/state/pids/a1.pid"));
    assert_eq!(paths.log_file("a1"), PathBuf::from("/state/logs/a1.log"));
    assert_eq!(paths.sessions_dir(), PathBuf::from("/state/sessions"));
    #[cfg(unix)]
    assert_eq!(
        paths.endpoint("a1"),
        PathBuf::from("/state/sockets/a1.sock")
    );
}

#[tokio::test]
async fn spawn_refuses_live_agent() {
    let dir = tempfile::tempdir().unwrap();
    let options = SpawnOptions {
        daemon_bin: PathBuf::from("/bin/true"),
        agent_id: "busy".to_string(),
        config_path: dir.path().join("config.toml"),
        state_path: dir.path().to_path_buf(),
        ready_timeout: Duration::from_millis(100),
    };

    let paths = AgentPaths::new(dir.path());
    write_pid_file(&paths.pid_file("busy"), std::process::id()).unwrap();

    match spawn_daemon(&options).await {
        Err(LifecycleError::AlreadyRunning { agent, .. }) => assert_eq!(agent, "busy"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn spawn_times_out_when_daemon_never_listens() {
    let dir = tempfile::tempdir().unwrap();
    let options = SpawnOptions {
        daemon_bin: PathBuf::from("/bin/true"),
        agent_id: "ghost".to_string(),
        config_path: dir.path().join("config.toml"),
        state_path: dir.path().to_path_buf(),
        ready_timeout: Duration::from_millis(200),
    };

    match spawn_daemon(&options).await {
        Err(LifecycleError::NotReady(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}

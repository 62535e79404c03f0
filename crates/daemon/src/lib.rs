// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! starry-daemon: the OpenStarry background service (starryd).
//!
//! Serves newline-delimited JSON-RPC over a local Unix socket, fans
//! session events out to attached clients, owns the PID/endpoint
//! lifecycle, and assembles the core runtime (sessions, engine,
//! sandbox, persistence) around the agent config.
//!
//! The library surface exposes the protocol types, the client and the
//! lifecycle helpers for CLI front-ends.

pub mod client;
pub mod forwarder;
pub mod lifecycle;
pub mod protocol;
pub mod server;
pub mod service;
pub mod subscriptions;

pub use client::DaemonClient;
pub use lifecycle::{
    clean_stale, endpoint_path, list_running_agents, pid_alive, read_pid_file, spawn_daemon,
    AgentPaths, LifecycleError, SpawnOptions,
};
pub use protocol::{
    codes, valid_session_id, Notification, Request, Response, RpcError, MAX_INPUT_BYTES,
    MAX_LINE_BYTES,
};
pub use service::{DaemonService, ServiceOptions};
pub use subscriptions::Subscriptions;

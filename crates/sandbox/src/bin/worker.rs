// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! starry-worker: sandbox worker process.
//!
//! Spawned by the sandbox host with piped stdio. Applies its own
//! memory cap, then speaks the worker protocol until the host closes
//! the pipe. Plugin code is statically registered; a deployment that
//! ships plugins links them against `starry_sandbox::runtime` and
//! registers their factories here.

use starry_sandbox::WorkerRuntime;

fn parse_memory_limit_mb(args: &[String]) -> Option<u64> {
    let pos = args.iter().position(|a| a == "--memory-limit-mb")?;
    args.get(pos + 1)?.parse().ok()
}

#[cfg(unix)]
fn apply_memory_limit(limit_mb: u64) {
    use nix::sys::resource::{setrlimit, Resource};

    let bytes = limit_mb.saturating_mul(1024 * 1024);
    if let Err(e) = setrlimit(Resource::RLIMIT_AS, bytes, bytes) {
        eprintln!("starry-worker: failed to apply memory limit: {e}");
    }
}

#[cfg(not(unix))]
fn apply_memory_limit(_limit_mb: u64) {}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("starry-worker");
        println!("Sandbox worker for the OpenStarry daemon. Spawned by the");
        println!("sandbox host with piped stdio; not meant to be run directly.");
        println!();
        println!("OPTIONS:");
        println!("    --memory-limit-mb <MB>    Address-space cap for this process");
        return;
    }

    if let Some(limit_mb) = parse_memory_limit_mb(&args) {
        apply_memory_limit(limit_mb);
    }

    let runtime = WorkerRuntime::new();
    runtime
        .run(tokio::io::stdin(), tokio::io::stdout())
        .await;
}

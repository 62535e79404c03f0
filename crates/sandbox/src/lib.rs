// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! starry-sandbox: OS-process isolation for third-party plugin code.
//!
//! The host side pools worker processes, verifies plugin integrity
//! before handing code to a worker, enforces restart and CPU-stall
//! policies, and serves the workers' RPC requests against the core.
//! The worker side is a small runtime speaking the same line-JSON
//! protocol, shipped as the `starry-worker` binary.

pub mod audit;
pub mod error;
pub mod host;
pub mod integrity;
pub mod policy;
pub mod protocol;
pub mod rpc;
pub mod runtime;
pub mod transport;

pub use audit::{AuditEntry, AuditLog};
pub use error::SandboxError;
pub use host::{SandboxHost, SandboxHostConfig};
pub use integrity::{verify_integrity, IntegrityError};
pub use rpc::HostContext;
pub use policy::{ModulePolicy, RestartDecision, RestartTracker};
pub use protocol::{
    decode_frame, encode_frame, HookCatalog, HostMessage, ProviderDescriptor, ToolDescriptor,
    WireToolContext, WorkerInitContext, WorkerMessage, WorkerRpc,
};
pub use runtime::{GuestContext, GuestPlugin, ModuleGate, WorkerRuntime};
pub use transport::{ProcessSpawner, WorkerChannels, WorkerSpawner};

#[cfg(any(test, feature = "test-support"))]
pub use transport::fake::{FakeSpawner, FakeWorkerBehavior};

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! starry-engine: the execution loop and the plugin loader.
//!
//! The executor drives one user input to completion: assemble context,
//! stream the model, run requested tools, repeat until no tool calls
//! are pending. The loader brings plugins up in service-dependency
//! order, in-process or delegated to the sandbox host.

pub mod error;
pub mod executor;
pub mod loader;
pub mod resolver;

pub use error::RuntimeError;
pub use executor::{Executor, ExecutorConfig, ExecutorDeps};
pub use loader::{
    FactoryFuture, PluginContext, PluginDescriptor, PluginFactory, PluginHooks, PluginLoader,
};
pub use resolver::Resolver;

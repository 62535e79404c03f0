// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Safety monitor: resource caps and behavioural heuristics.
//!
//! A multi-level circuit breaker consulted by the execution loop. Hard
//! limits (loop ticks, token budget, error cascade) halt the turn;
//! behavioural signals (repeated identical failures, mounting
//! consecutive failures) inject corrective system prompts instead.

use std::collections::VecDeque;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Prompt injected after `repetitive_fail_threshold` identical failures.
pub const REPETITIVE_FAILURE_PROMPT: &str =
    "stop and analyse: the same tool call keeps failing with identical arguments. \
     Re-read the error output and change your approach before retrying.";

/// Prompt injected after `frustration_threshold` consecutive failures.
pub const FRUSTRATION_PROMPT: &str =
    "ask the user for help: repeated tool failures suggest this approach is not \
     working. Summarise what was tried and what failed.";

/// Tuning knobs, all with safe defaults.
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub max_loop_ticks: u32,
    /// Zero means unlimited.
    pub max_token_usage: u64,
    pub repetitive_fail_threshold: usize,
    pub frustration_threshold: u32,
    pub error_window_size: usize,
    pub error_rate_threshold: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_loop_ticks: 50,
            max_token_usage: 100_000,
            repetitive_fail_threshold: 3,
            frustration_threshold: 5,
            error_window_size: 10,
            error_rate_threshold: 0.8,
        }
    }
}

/// Outcome of a monitor check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SafetyVerdict {
    pub halt: bool,
    pub reason: Option<String>,
    pub inject_prompt: Option<String>,
}

impl SafetyVerdict {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn halt(reason: impl Into<String>) -> Self {
        Self {
            halt: true,
            reason: Some(reason.into()),
            inject_prompt: None,
        }
    }

    pub fn inject(prompt: impl Into<String>) -> Self {
        Self {
            halt: false,
            reason: None,
            inject_prompt: Some(prompt.into()),
        }
    }
}

/// Per-runtime circuit breaker state.
#[derive(Debug)]
pub struct SafetyMonitor {
    config: SafetyConfig,
    tick_count: u32,
    token_usage: u64,
    recent_fingerprints: VecDeque<String>,
    error_window: VecDeque<bool>,
    consecutive_failures: u32,
}

impl SafetyMonitor {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config,
            tick_count: 0,
            token_usage: 0,
            recent_fingerprints: VecDeque::new(),
            error_window: VecDeque::new(),
            consecutive_failures: 0,
        }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    /// Reset per-task counters at the start of a turn.
    pub fn on_loop_start(&mut self) {
        self.tick_count = 0;
    }

    /// Count one tool round; halts when the tick cap is exceeded.
    pub fn on_loop_tick(&mut self) -> SafetyVerdict {
        self.tick_count += 1;
        if self.tick_count > self.config.max_loop_ticks {
            return SafetyVerdict::halt("Loop tick limit exceeded");
        }
        SafetyVerdict::ok()
    }

    /// Check the token budget before each model call.
    pub fn before_llm_call(&self) -> SafetyVerdict {
        if self.config.max_token_usage > 0 && self.token_usage >= self.config.max_token_usage {
            return SafetyVerdict::halt("Token budget exhausted");
        }
        SafetyVerdict::ok()
    }

    /// Add a finished response's tokens to the running total.
    pub fn track_token_usage(&mut self, tokens: u64) {
        self.token_usage += tokens;
    }

    pub fn token_usage(&self) -> u64 {
        self.token_usage
    }

    /// Feed one tool outcome through the behavioural heuristics.
    pub fn after_tool_execution(
        &mut self,
        tool_name: &str,
        arguments: &Value,
        is_error: bool,
    ) -> SafetyVerdict {
        self.error_window.push_back(is_error);
        while self.error_window.len() > self.config.error_window_size {
            self.error_window.pop_front();
        }

        if !is_error {
            self.recent_fingerprints.clear();
            self.consecutive_failures = 0;
            return SafetyVerdict::ok();
        }

        let fingerprint = fingerprint(tool_name, arguments);
        self.recent_fingerprints.push_back(fingerprint);
        while self.recent_fingerprints.len() > self.config.repetitive_fail_threshold {
            self.recent_fingerprints.pop_front();
        }
        self.consecutive_failures += 1;

        if self.recent_fingerprints.len() == self.config.repetitive_fail_threshold
            && self
                .recent_fingerprints
                .iter()
                .all(|f| Some(f) == self.recent_fingerprints.front())
        {
            self.recent_fingerprints.clear();
            return SafetyVerdict::inject(REPETITIVE_FAILURE_PROMPT);
        }

        if self.consecutive_failures == self.config.frustration_threshold {
            return SafetyVerdict::inject(FRUSTRATION_PROMPT);
        }

        if self.error_window.len() == self.config.error_window_size {
            let failures = self.error_window.iter().filter(|e| **e).count();
            let rate = failures as f64 / self.error_window.len() as f64;
            if rate >= self.config.error_rate_threshold {
                return SafetyVerdict::halt("Error cascade");
            }
        }

        SafetyVerdict::ok()
    }

    /// Zero all state.
    pub fn reset(&mut self) {
        self.tick_count = 0;
        self.token_usage = 0;
        self.recent_fingerprints.clear();
        self.error_window.clear();
        self.consecutive_failures = 0;
    }
}

impl Default for SafetyMonitor {
    fn default() -> Self {
        Self::new(SafetyConfig::default())
    }
}

/// Short stable fingerprint over a tool name and its arguments.
pub fn fingerprint(tool_name: &str, arguments: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(arguments.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
#[path = "safety_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn minimal_manifest_parses() {
    let manifest: PluginManifest =
        serde_json::from_value(json!({"name": "echo", "version": "1.0.0"})).unwrap();
    assert_eq!(manifest.name, "echo");
    assert!(manifest.integrity.is_none());
    assert!(!manifest.sandboxed());
    assert!(manifest.services.is_empty());
}

#[test]
fn legacy_hash_integrity() {
    let manifest: PluginManifest = serde_json::from_value(json!({
        "name": "p",
        "version": "0.1.0",
        "integrity": "ab12cd34",
    }))
    .unwrap();
    assert_eq!(
        manifest.integrity,
        Some(IntegrityDescriptor::LegacyHash("ab12cd34".to_string()))
    );
}

#[test]
fn signature_integrity_parses_typed() {
    let manifest: PluginManifest = serde_json::from_value(json!({
        "name": "p",
        "version": "0.1.0",
        "integrity": {
            "algorithm": "ed25519-sha256",
            "signature": "c2ln",
            "publicKey": "-----BEGIN PUBLIC KEY-----\n...",
            "author": "dev@example.com",
        },
    }))
    .unwrap();

    match manifest.integrity {
        Some(IntegrityDescriptor::Signature(sig)) => {
            assert_eq!(sig.algorithm, SignatureAlgorithm::Ed25519Sha256);
            assert_eq!(sig.signature, "c2ln");
            assert_eq!(sig.author.as_deref(), Some("dev@example.com"));
        }
        other => panic!("expected signature integrity, got {other:?}"),
    }
}

#[test]
fn rsa_algorithm_name() {
    let alg: SignatureAlgorithm = serde_json::from_value(json!("rsa-sha256")).unwrap();
    assert_eq!(alg, SignatureAlgorithm::RsaSha256);
    assert_eq!(
        serde_json::to_value(SignatureAlgorithm::Ed25519Sha256).unwrap(),
        json!("ed25519-sha256")
    );
}

#[test]
fn sandbox_defaults() {
    let settings = SandboxSettings::default();
    assert!(!settings.enabled);
    assert_eq!(settings.memory_limit_mb, 512);
    assert_eq!(settings.cpu_timeout_ms, 60_000);
    assert_eq!(settings.restart.max_restarts, 3);
    assert_eq!(settings.restart.backoff_ms, 500);
    assert_eq!(settings.restart.max_backoff_ms, 10_000);
    assert_eq!(settings.restart.reset_window_ms, 60_000);
}

#[test]
fn sandbox_partial_config_fills_defaults() {
    let manifest: PluginManifest = serde_json::from_value(json!({
        "name": "p",
        "version": "0.1.0",
        "sandbox": {"enabled": true, "memoryLimitMb": 128},
    }))
    .unwrap();

    assert!(manifest.sandboxed());
    let settings = manifest.sandbox_settings();
    assert_eq!(settings.memory_limit_mb, 128);
    assert_eq!(settings.cpu_timeout_ms, 60_000);
}

#[test]
fn capability_whitelist() {
    let manifest: PluginManifest = serde_json::from_value(json!({
        "name": "p",
        "version": "0.1.0",
        "capabilities": {"allowedProviders": ["openai"]},
    }))
    .unwrap();

    let caps = manifest.capabilities.unwrap_or_default();
    assert_eq!(caps.allowed_providers, Some(vec!["openai".to_string()]));
}

#[test]
fn service_dependencies_parse() {
    let manifest: PluginManifest = serde_json::from_value(json!({
        "name": "p",
        "version": "0.1.0",
        "services": ["store"],
        "serviceDependencies": ["auth"],
    }))
    .unwrap();

    assert_eq!(manifest.services, vec!["store"]);
    assert_eq!(manifest.service_dependencies, vec!["auth"]);
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plugin integrity verification.
//!
//! Runs before `INIT_PLUGIN` hands code to a worker. Two schemes:
//! the legacy SHA-512 hex digest of the plugin binary, and PKI
//! signatures (ed25519 over the binary's SHA-256 digest, or RSA
//! PKCS#1 v1.5 with SHA-256 over the binary itself).

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

use starry_core::{IntegrityDescriptor, SignatureAlgorithm, SignatureDescriptor};

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("invalid public key: {0}")]
    BadPublicKey(String),

    #[error("invalid signature encoding: {0}")]
    BadSignature(String),

    #[error("signature verification failed")]
    VerifyFailed,
}

/// Verify a plugin binary on disk against its integrity descriptor.
pub fn verify_integrity(
    plugin_path: &Path,
    integrity: &IntegrityDescriptor,
) -> Result<(), IntegrityError> {
    let data = std::fs::read(plugin_path)?;
    match integrity {
        IntegrityDescriptor::LegacyHash(expected) => verify_legacy_hash(&data, expected),
        IntegrityDescriptor::Signature(descriptor) => verify_signature(&data, descriptor),
    }
}

fn verify_legacy_hash(data: &[u8], expected: &str) -> Result<(), IntegrityError> {
    let digest = Sha512::digest(data);
    let actual = hex::encode(digest);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(IntegrityError::HashMismatch {
            expected: expected.to_lowercase(),
            actual,
        })
    }
}

fn verify_signature(data: &[u8], descriptor: &SignatureDescriptor) -> Result<(), IntegrityError> {
    let signature_bytes = BASE64
        .decode(descriptor.signature.as_bytes())
        .map_err(|e| IntegrityError::BadSignature(e.to_string()))?;

    match descriptor.algorithm {
        SignatureAlgorithm::Ed25519Sha256 => {
            verify_ed25519(data, &signature_bytes, &descriptor.public_key)
        }
        SignatureAlgorithm::RsaSha256 => verify_rsa(data, &signature_bytes, &descriptor.public_key),
    }
}

/// Ed25519 over the SHA-256 digest of the plugin binary.
fn verify_ed25519(data: &[u8], signature: &[u8], pem: &str) -> Result<(), IntegrityError> {
    use ed25519_dalek::pkcs8::DecodePublicKey;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    let key = VerifyingKey::from_public_key_pem(pem)
        .map_err(|e| IntegrityError::BadPublicKey(e.to_string()))?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| IntegrityError::BadSignature(e.to_string()))?;

    let digest = Sha256::digest(data);
    key.verify(&digest, &signature)
        .map_err(|_| IntegrityError::VerifyFailed)
}

/// RSA PKCS#1 v1.5 with SHA-256 over the plugin binary.
fn verify_rsa(data: &[u8], signature: &[u8], pem: &str) -> Result<(), IntegrityError> {
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::pkcs8::DecodePublicKey;
    use rsa::sha2::Sha256 as RsaSha256;
    use rsa::signature::Verifier;
    use rsa::RsaPublicKey;

    let key = RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| IntegrityError::BadPublicKey(e.to_string()))?;
    let verifying_key = VerifyingKey::<RsaSha256>::new(key);
    let signature = Signature::try_from(signature)
        .map_err(|e| IntegrityError::BadSignature(e.to_string()))?;

    verifying_key
        .verify(data, &signature)
        .map_err(|_| IntegrityError::VerifyFailed)
}

#[cfg(test)]
#[path = "integrity_tests.rs"]
mod tests;

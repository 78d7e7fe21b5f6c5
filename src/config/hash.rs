//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of the stack configuration,
//! used to pin saved plans to the configuration they were computed from, and
//! salted fingerprints that stand in for sensitive values in state.

use sha2::{Digest, Sha256};

use super::spec::StackConfig;

/// Prefix of every recorded secret fingerprint.
pub const SENSITIVE_PREFIX: &str = "sensitive:sha256:";

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire stack configuration.
    ///
    /// Variable values are not part of the hash, only their declarations.
    #[must_use]
    pub fn hash_config(&self, config: &StackConfig) -> String {
        let mut hasher = Sha256::new();

        // Project identity
        hasher.update(config.project.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(config.project.environment.as_bytes());
        hasher.update([0u8]);

        // Variable declarations (BTreeMap, already sorted)
        for (name, decl) in &config.variables {
            hasher.update(name.as_bytes());
            hasher.update(if decl.sensitive { [1u8] } else { [0u8] });
            if let Some(env) = &decl.env {
                hasher.update(env.as_bytes());
            }
            if let Some(default) = &decl.default {
                hasher.update(default.as_bytes());
            }
            hasher.update([0u8]);
        }

        // Resources in declaration order
        for resource in &config.resources {
            hasher.update(resource.kind.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(resource.name.as_bytes());
            hasher.update([0u8]);

            for dep in &resource.depends_on {
                hasher.update(dep.as_bytes());
                hasher.update([0u8]);
            }

            // serde_json maps are ordered, so this rendering is canonical
            for (key, value) in &resource.attributes {
                hasher.update(key.as_bytes());
                hasher.update([0u8]);
                hasher.update(value.to_string().as_bytes());
                hasher.update([0u8]);
            }
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a fingerprint of a JSON value.
    #[must_use]
    pub fn hash_value(&self, value: &serde_json::Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes the salted fingerprint recorded in place of a secret.
    #[must_use]
    pub fn fingerprint_secret(salt: &str, secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update([0u8]);
        hasher.update(secret.as_bytes());
        format!("{SENSITIVE_PREFIX}{}", hex::encode(hasher.finalize()))
    }

    /// Returns true if a recorded value is a secret fingerprint.
    #[must_use]
    pub fn is_fingerprint(value: &serde_json::Value) -> bool {
        value.as_str().is_some_and(|s| s.starts_with(SENSITIVE_PREFIX))
    }

    /// Returns true if a recorded value contains a secret fingerprint anywhere.
    #[must_use]
    pub fn contains_fingerprint(value: &serde_json::Value) -> bool {
        match value {
            serde_json::Value::String(_) => Self::is_fingerprint(value),
            serde_json::Value::Array(items) => items.iter().any(Self::contains_fingerprint),
            serde_json::Value::Object(map) => map.values().any(Self::contains_fingerprint),
            _ => false,
        }
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        // Constant-time: these may be secret fingerprints
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

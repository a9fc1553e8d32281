//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of configuration structures.
//! The project hash is stored in the state snapshot; unit fingerprints are
//! computed over diff views and shown in JSON plans.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::spec::ProjectConfig;

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire project configuration.
    ///
    /// This hash changes when any part of the configuration changes.
    #[must_use]
    pub fn hash_config(&self, config: &ProjectConfig) -> String {
        self.hash_serializable(config)
    }

    /// Computes a fingerprint of a unit's diff view.
    #[must_use]
    pub fn hash_value(&self, value: &Value) -> String {
        self.hash_serializable(value)
    }

    /// Object keys serialize sorted, so equal values hash equally.
    fn hash_serializable<T: Serialize + ?Sized>(&self, value: &T) -> String {
        let mut hasher = Sha256::new();
        match serde_json::to_vec(value) {
            Ok(bytes) => hasher.update(&bytes),
            Err(e) => hasher.update(e.to_string().as_bytes()),
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use serde_json::json;

    fn config(unit_name: &str) -> ProjectConfig {
        ConfigParser::new()
            .parse_yaml(
                &format!(
                    "project:\n  name: demo\nstacks:\n  - name: infra\n    units:\n      - name: {unit_name}\n        type: printer\n"
                ),
                None,
            )
            .expect("parse")
    }

    #[test]
    fn test_config_hash_deterministic() {
        let hasher = ConfigHasher::new();
        assert_eq!(hasher.hash_config(&config("net")), hasher.hash_config(&config("net")));
        assert_ne!(hasher.hash_config(&config("net")), hasher.hash_config(&config("db")));
    }

    #[test]
    fn test_value_hash_ignores_key_order() {
        let hasher = ConfigHasher::new();
        let a: Value = serde_json::from_str(r#"{"a": 1, "b": [1, 2]}"#).expect("json");
        let b: Value = serde_json::from_str(r#"{"b": [1, 2], "a": 1}"#).expect("json");
        assert_eq!(hasher.hash_value(&a), hasher.hash_value(&b));
        assert_ne!(hasher.hash_value(&a), hasher.hash_value(&json!({"a": 2})));
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }

    #[test]
    fn test_hashes_match() {
        assert!(ConfigHasher::hashes_match("abc123", "abc123"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc124"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc12"));
    }
}

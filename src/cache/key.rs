//! Versioned cache key derivation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Request parameters for key derivation.
///
/// A `BTreeMap` keeps field order lexicographic, so logically identical
/// parameter sets serialize identically regardless of construction order.
pub type Params = BTreeMap<String, serde_json::Value>;

/// A derived cache key: plain-text namespace prefix plus a hex digest.
///
/// The namespace prefix is what makes namespace-glob invalidation possible;
/// the digest covers namespace, content version, and canonical parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub namespace: String,
    pub digest: String,
}

impl CacheKey {
    pub fn new(namespace: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            digest: digest.into(),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.digest)
    }
}

/// Derives keys of the form `namespace ":" hex(sha256(namespace || version ||
/// canonical(params)))`.
///
/// The content version is folded into the digest rather than stored per
/// entry: bumping the version makes every prior key unreachable with no scan,
/// because a `get` under the new version simply hashes to keys that were
/// never written.
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator;

impl KeyGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn derive(&self, namespace: &str, version: &str, params: &Params) -> CacheKey {
        let canonical = serde_json::to_string(params).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(version.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());
        let digest: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        CacheKey::new(namespace, digest)
    }
}

/// Convenience for single-identifier lookups (warming, tests).
pub fn identifier_params(identifier: &str) -> Params {
    let mut params = Params::new();
    params.insert("id".to_string(), serde_json::Value::from(identifier));
    params
}

// crates/xgate-core/src/hashing.rs
// ============================================================================
// Module: Canonical Hashing
// Description: Canonical JSON serialization and SHA-256 digests.
// Purpose: Give the Evidence Tracker and Explanation Service one stable
//          content-hash primitive (spec §4.13a: same input, same hash).
// Dependencies: serde_jcs, serde_json, sha2
// ============================================================================

//! ## Overview
//! Content hashing is used in two places: evidence-file integrity checks
//! (`xgate-evidence`) and explanation content hashes (`xgate-explanation`,
//! spec invariant 8). Both need the same canonical-JSON-then-SHA-256 recipe,
//! the one `decision-gate-mcp::evidence::ensure_evidence_hash` uses for
//! provider-response integrity.

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

/// A SHA-256 digest, rendered as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Returns the digest as a lowercase hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when a value cannot be canonicalized for hashing.
#[derive(Debug, thiserror::Error)]
#[error("canonical serialization failed: {0}")]
pub struct CanonicalizeError(String);

/// Serializes `value` with sorted object keys (RFC 8785-style canonical
/// JSON), so that semantically identical values always hash the same way
/// regardless of field insertion order.
///
/// # Errors
///
/// Returns [`CanonicalizeError`] when `value` cannot be serialized.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalizeError> {
    serde_jcs::to_string(value).map(String::into_bytes).map_err(|err| CanonicalizeError(err.to_string()))
}

/// Hashes raw bytes with SHA-256.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    let digest = Sha256::digest(bytes);
    ContentHash(hex_encode(&digest))
}

/// Canonicalizes `value` and hashes the result with SHA-256.
///
/// # Errors
///
/// Returns [`CanonicalizeError`] when `value` cannot be canonicalized.
pub fn hash_value<T: Serialize>(value: &T) -> Result<ContentHash, CanonicalizeError> {
    canonical_json_bytes(value).map(|bytes| hash_bytes(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_deterministic_regardless_of_key_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(hash_value(&a).expect("hash"), hash_value(&b).expect("hash"));
    }

    #[test]
    fn different_values_hash_differently() {
        let a = hash_value(&json!({"a": 1})).expect("hash");
        let b = hash_value(&json!({"a": 2})).expect("hash");
        assert_ne!(a, b);
    }
}

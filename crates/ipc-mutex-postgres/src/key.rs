//! Advisory-lock key derivation.

use sha2::{Digest, Sha256};

/// Derives the 64-bit advisory-lock key for a resource name.
///
/// First 8 bytes of SHA-256 over the name, little-endian. Stable across
/// processes and releases; distinct names collide only with hash-collision
/// probability.
pub fn advisory_key(resource: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(resource.as_bytes());
    let hash = hasher.finalize();

    let mut result = 0i64;
    for i in (0..8).rev() {
        result = (result << 8) | (hash[i] as i64);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_and_distinct() {
        assert_eq!(advisory_key("test"), advisory_key("test"));
        assert_ne!(advisory_key("test"), advisory_key("other"));
    }
}

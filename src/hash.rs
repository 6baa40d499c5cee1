//! Locator hashing — stable dedup and correlation keys.
//!
//! Every pass keys its work by a digest of the locator string, so two
//! document nodes sharing one image reference collapse into a single
//! fetch and are rewritten together. FNV-1a is plenty: the key is a
//! correlation handle, not a security boundary.

use fnv::FnvHasher;
use std::hash::Hasher;

/// Hash a locator string into a 16-char lowercase hex key.
///
/// Deterministic and total: identical input always yields the identical
/// key, and no input can fail.
pub fn hash_locator(locator: &str) -> String {
    let mut hasher = FnvHasher::default();
    hasher.write(locator.as_bytes());
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let a = hash_locator("https://example.com/x.png");
        let b = hash_locator("https://example.com/x.png");
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_distinguishes_inputs() {
        assert_ne!(
            hash_locator("https://example.com/x.png"),
            hash_locator("https://example.com/y.png")
        );
    }

    #[test]
    fn test_hash_format() {
        let key = hash_locator("assets/foo.png");
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_empty_input() {
        // Total function: empty string is a valid input.
        let key = hash_locator("");
        assert_eq!(key.len(), 16);
    }
}

//! SHA3-256 hashing behind a minimal trait seam.
//!
//! Trie nodes and state keys are hashed the same way everywhere: absorb
//! byte fields in their canonical order, take the 32-byte digest. The
//! [`HashFunction`] trait keeps that surface small enough to swap the
//! algorithm in one place, and [`hash_bytes`] covers the one-shot case.

use sha3::{Digest, Sha3_256};

use crate::types::StdByteArray;

/// Incremental hash over a sequence of byte fields.
///
/// Field order is part of the digest; callers feed fields in the same
/// canonical order they are encoded in.
pub trait HashFunction {
    /// Absorb one field.
    fn update(&mut self, data: impl AsRef<[u8]>);

    /// Produce the digest of everything absorbed since the last `finish`,
    /// resetting the hasher for reuse.
    fn finish(&mut self) -> StdByteArray;
}

/// The hash every keystone trie and state key uses: SHA3-256.
#[derive(Clone, Default)]
pub struct DefaultHash {
    hasher: Sha3_256,
}

impl DefaultHash {
    pub fn new() -> Self {
        DefaultHash {
            hasher: Sha3_256::new(),
        }
    }
}

impl HashFunction for DefaultHash {
    fn update(&mut self, data: impl AsRef<[u8]>) {
        self.hasher.update(data);
    }

    fn finish(&mut self) -> StdByteArray {
        self.hasher.finalize_reset().into()
    }
}

/// One-shot digest of a single byte string.
pub fn hash_bytes(data: impl AsRef<[u8]>) -> StdByteArray {
    let mut hasher = DefaultHash::new();
    hasher.update(data);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_resets_for_reuse() {
        let mut hasher = DefaultHash::new();
        hasher.update(b"keystone");
        let first = hasher.finish();

        hasher.update(b"keystone");
        assert_eq!(hasher.finish(), first);

        hasher.update(b"other");
        assert_ne!(hasher.finish(), first);
    }

    #[test]
    fn test_field_order_is_part_of_the_digest() {
        let mut hasher = DefaultHash::new();
        hasher.update(b"ab");
        hasher.update(b"cd");
        let forward = hasher.finish();

        hasher.update(b"cd");
        hasher.update(b"ab");
        assert_ne!(hasher.finish(), forward);
    }

    #[test]
    fn test_hash_bytes_matches_incremental() {
        let mut hasher = DefaultHash::new();
        hasher.update(b"address");
        assert_eq!(hash_bytes(b"address"), hasher.finish());
    }
}

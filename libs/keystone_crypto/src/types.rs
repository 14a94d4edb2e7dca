//! Common type aliases used across cryptographic components.

/// Standard byte array length used for hashes and keys (32 bytes).
pub const STANDARD_ARRAY_LENGTH: usize = 32;
/// Fixed-size 32-byte array (commonly used for hashes and trie roots).
pub type StdByteArray = [u8; STANDARD_ARRAY_LENGTH];

/// The all-zero hash. Stands in for "empty": the root of a trie with no
/// entries, or the birth place of an account no transaction created.
pub const EMPTY_HASH: StdByteArray = [0u8; STANDARD_ARRAY_LENGTH];

/// Render bytes as lowercase hex for logs and debug output.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

//! DEK (Data Encryption Key) caching.
//!
//! # Lifecycle
//!
//! 1. Every write generates a fresh DEK; its plaintext lives only for the
//!    duration of that transform call.
//! 2. On read, the encrypted DEK from the envelope is the cache key. A miss
//!    asks the provider's KMS plugin to decrypt it and stores the result in
//!    [`DekCache`].
//! 3. Entries are evicted least-recently-used once the configured capacity is
//!    reached; capacity 0 disables caching.
//!
//! # Security invariants
//!
//! - The plaintext DEK is **never** written to disk, logged, or included in traces.
//! - Decrypted DEKs are zeroed when dropped.
//! - Failed decrypts are never cached.

pub mod cache;

pub use cache::{DekBytes, DekCache, DekError};

use sha2::{Digest, Sha256};

/// Short, log-safe fingerprint of an encrypted DEK: the first 8 bytes of its
/// SHA-256, hex encoded.
pub fn fingerprint(encrypted_dek: &[u8]) -> String {
    Sha256::digest(encrypted_dek)[..8]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = fingerprint(b"encrypted-dek");
        assert_eq!(a.len(), 16);
        assert_eq!(a, fingerprint(b"encrypted-dek"));
        assert_ne!(a, fingerprint(b"other-dek"));
    }
}
